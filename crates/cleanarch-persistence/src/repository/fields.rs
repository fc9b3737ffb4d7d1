//! Field selection and assignment shared by all backends.

use cleanarch_domain::{
    unknown_field, DomainError, DomainResult, Entity, FieldError, FieldValue, Filter, UUID_FIELD,
};

/// Fields touched by `update`: the requested ones, or every non-identity
/// field.
pub(crate) fn update_fields<E: Entity>(fields: Option<&[&str]>) -> DomainResult<Vec<&'static str>> {
    let Some(fields) = fields else {
        return Ok(E::schema()
            .iter()
            .filter(|def| !def.is_identity())
            .map(|def| def.name)
            .collect());
    };

    let mut resolved = Vec::with_capacity(fields.len());
    let mut errors = Vec::new();
    for name in fields {
        match E::field_def(name) {
            None => errors.push(FieldError::new(*name, "unknown field")),
            Some(def) if def.is_identity() => {
                errors.push(FieldError::new(*name, "identity fields cannot be updated"));
            }
            Some(def) => resolved.push(def.name),
        }
    }
    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(DomainError::invalid_fields(E::NAME, errors))
    }
}

/// Check `update_by_filter` values against the schema.
pub(crate) fn validate_values<E: Entity>(values: &[(&str, FieldValue)]) -> DomainResult<()> {
    let mut errors = Vec::new();
    for (name, value) in values {
        match E::field_def(name) {
            None => errors.push(FieldError::new(*name, "unknown field")),
            Some(def) if def.is_identity() => {
                errors.push(FieldError::new(*name, "identity fields cannot be updated"));
            }
            Some(def) if !def.accepts(value) => errors.push(FieldError::new(
                *name,
                format!("{} field cannot hold {value:?}", def.kind),
            )),
            Some(_) => {}
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::invalid_fields(E::NAME, errors))
    }
}

/// Copy `fields` from `source` onto `target`.
pub(crate) fn copy_fields<E: Entity>(target: &mut E, source: &E, fields: &[&str]) -> DomainResult<()> {
    for name in fields {
        let value = source
            .field(name)
            .ok_or_else(|| unknown_field(E::NAME, name))?;
        target.set_field(name, value)?;
    }
    Ok(())
}

/// Assign already validated values onto `target`.
pub(crate) fn assign_values<E: Entity>(target: &mut E, values: &[(&str, FieldValue)]) -> DomainResult<()> {
    for (name, value) in values {
        target.set_field(name, value.clone())?;
    }
    Ok(())
}

/// Caller filter (or none) narrowed to `entity`'s external identifier.
///
/// `None` when the caller's filter already names a different identifier,
/// so nothing can match.
pub(crate) fn pinned_filter<E: Entity>(entity: &E, filter: Option<&Filter>) -> Option<Filter> {
    let uuid = FieldValue::Uuid(entity.uuid());
    let filter = filter.cloned().unwrap_or_default();
    match filter.predicate(UUID_FIELD) {
        Some(requested) if *requested != uuid => None,
        _ => Some(filter.eq(UUID_FIELD, uuid)),
    }
}

/// Validate an optional filter.
pub(crate) fn validate_filter<E: Entity>(filter: Option<&Filter>) -> DomainResult<()> {
    filter.map_or(Ok(()), Filter::validate::<E>)
}
