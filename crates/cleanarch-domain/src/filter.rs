//! Partial-match filters and ordering expressions.

use uuid::Uuid;

use crate::entity::{Entity, FieldValue, ID_FIELD, UUID_FIELD};
use crate::error::{DomainError, DomainResult, FieldError};

/// Marker prefixing a descending ordering key.
pub const DESCENDING_MARKER: char = '-';

/// One key of an ordering expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub descending: bool,
}

/// Parse `"name,-created_at"` into ordering keys.
///
/// Segments are trimmed and lower-cased; empty segments are skipped.
#[must_use]
pub fn parse_order_by(expr: &str) -> Vec<OrderKey> {
    expr.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            let (field, descending) = segment
                .strip_prefix(DESCENDING_MARKER)
                .map_or((segment, false), |rest| (rest.trim(), true));
            (!field.is_empty()).then(|| OrderKey {
                field: field.to_lowercase(),
                descending,
            })
        })
        .collect()
}

/// Entity filter: explicitly set equality predicates plus optional ordering.
///
/// Only predicates that were set take part in matching, so an empty filter
/// matches every entity. A predicate set to `FieldValue::Null` matches
/// entities whose field is null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<(String, FieldValue)>,
    order_by: Option<String>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by_id(id: i64) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    #[must_use]
    pub fn by_uuid(uuid: Uuid) -> Self {
        Self::new().eq(UUID_FIELD, uuid)
    }

    /// Add (or replace) an equality predicate.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// In-place variant of [`Filter::eq`].
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        let value = value.into();
        match self.predicates.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.predicates.push((field, value)),
        }
    }

    #[must_use]
    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by = Some(expr.into());
        self
    }

    #[must_use]
    pub fn predicates(&self) -> &[(String, FieldValue)] {
        &self.predicates
    }

    #[must_use]
    pub fn predicate(&self, field: &str) -> Option<&FieldValue> {
        self.predicates
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn order_expr(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    #[must_use]
    pub fn order_keys(&self) -> Vec<OrderKey> {
        self.order_by.as_deref().map(parse_order_by).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Field-by-field equality over every set predicate.
    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.predicates
            .iter()
            .all(|(field, expected)| entity.field(field).is_some_and(|actual| actual == *expected))
    }

    /// Check predicate and ordering fields against `E`'s schema.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every unknown field and every
    /// predicate value the field cannot hold.
    pub fn validate<E: Entity>(&self) -> DomainResult<()> {
        let mut errors = Vec::new();
        for (field, value) in &self.predicates {
            match E::field_def(field) {
                None => errors.push(FieldError::new(field.as_str(), "unknown filter field")),
                Some(def) if !def.accepts(value) => errors.push(FieldError::new(
                    field.as_str(),
                    format!("cannot compare {} field with {value:?}", def.kind),
                )),
                Some(_) => {}
            }
        }
        for key in self.order_keys() {
            if E::field_def(&key.field).is_none() {
                errors.push(FieldError::new(key.field, "unknown ordering field"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::invalid_fields(E::NAME, errors))
        }
    }
}
