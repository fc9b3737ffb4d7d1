//! Entity model: scalar field values, static schemas and the `Entity` trait.
//!
//! Repositories never reflect over entity structs. Each entity publishes a
//! static schema of named, typed fields and exposes typed get/set by name,
//! which is all the filtering, ordering and relational mapping code needs.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::filter::Filter;

/// Name of the store-assigned surrogate identity field.
pub const ID_FIELD: &str = "id";

/// Name of the externally visible identifier field.
pub const UUID_FIELD: &str = "uuid";

// =============================================================================
// FIELD KINDS & SCHEMA
// =============================================================================

/// Scalar kind of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
}

impl FieldKind {
    /// Whether `value` can be stored in a field of this kind.
    #[must_use]
    pub const fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Bool, FieldValue::Bool(_))
                | (Self::Int, FieldValue::Int(_))
                | (Self::Float, FieldValue::Float(_) | FieldValue::Int(_))
                | (Self::Text, FieldValue::Text(_))
                | (Self::Uuid, FieldValue::Uuid(_))
                | (Self::Timestamp, FieldValue::Timestamp(_))
        )
    }

    /// Parse a raw string (e.g. a CLI argument) into a value of this kind.
    #[must_use]
    pub fn parse(self, raw: &str) -> Option<FieldValue> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("null") {
            return Some(FieldValue::Null);
        }
        match self {
            Self::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(FieldValue::Bool(true)),
                "false" | "0" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            Self::Int => raw.parse().ok().map(FieldValue::Int),
            Self::Float => raw.parse().ok().map(FieldValue::Float),
            Self::Text => Some(FieldValue::Text(raw.to_string())),
            Self::Uuid => Uuid::parse_str(raw).ok().map(FieldValue::Uuid),
            Self::Timestamp => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc))),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Static description of one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Whether this is one of the two identity fields.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.name == ID_FIELD || self.name == UUID_FIELD
    }

    /// Whether `value` is storable in this field.
    #[must_use]
    pub const fn accepts(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Null => self.nullable,
            other => self.kind.accepts(other),
        }
    }
}

/// Schema entries for the identity fields every entity carries.
pub const IDENTITY_FIELDS: [FieldDef; 2] = [
    FieldDef::new(ID_FIELD, FieldKind::Int).nullable(),
    FieldDef::new(UUID_FIELD, FieldKind::Uuid),
];

// =============================================================================
// FIELD VALUES
// =============================================================================

/// A single scalar field value.
///
/// Values carry a total order: variants rank `Null < Bool < numbers < Text <
/// Uuid < Timestamp`, numbers compare numerically across `Int` and `Float`,
/// and floats use IEEE total ordering. Equality follows the order.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::Uuid(_) => 4,
            Self::Timestamp(_) => 5,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Kind of a non-null value.
    #[must_use]
    pub const fn kind(&self) -> Option<FieldKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(FieldKind::Bool),
            Self::Int(_) => Some(FieldKind::Int),
            Self::Float(_) => Some(FieldKind::Float),
            Self::Text(_) => Some(FieldKind::Text),
            Self::Uuid(_) => Some(FieldKind::Uuid),
            Self::Timestamp(_) => Some(FieldKind::Timestamp),
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    // Typed extraction used by `Entity::set_field` implementations.

    pub fn into_bool(self, entity_type: &'static str, field: &str) -> DomainResult<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(mismatch(entity_type, field, FieldKind::Bool, &other)),
        }
    }

    pub fn into_int(self, entity_type: &'static str, field: &str) -> DomainResult<i64> {
        match self {
            Self::Int(v) => Ok(v),
            other => Err(mismatch(entity_type, field, FieldKind::Int, &other)),
        }
    }

    pub fn into_opt_int(self, entity_type: &'static str, field: &str) -> DomainResult<Option<i64>> {
        match self {
            Self::Null => Ok(None),
            other => other.into_int(entity_type, field).map(Some),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn into_float(self, entity_type: &'static str, field: &str) -> DomainResult<f64> {
        match self {
            Self::Float(v) => Ok(v),
            Self::Int(v) => Ok(v as f64),
            other => Err(mismatch(entity_type, field, FieldKind::Float, &other)),
        }
    }

    pub fn into_text(self, entity_type: &'static str, field: &str) -> DomainResult<String> {
        match self {
            Self::Text(v) => Ok(v),
            other => Err(mismatch(entity_type, field, FieldKind::Text, &other)),
        }
    }

    pub fn into_opt_text(
        self,
        entity_type: &'static str,
        field: &str,
    ) -> DomainResult<Option<String>> {
        match self {
            Self::Null => Ok(None),
            other => other.into_text(entity_type, field).map(Some),
        }
    }

    pub fn into_uuid(self, entity_type: &'static str, field: &str) -> DomainResult<Uuid> {
        match self {
            Self::Uuid(v) => Ok(v),
            other => Err(mismatch(entity_type, field, FieldKind::Uuid, &other)),
        }
    }

    pub fn into_timestamp(
        self,
        entity_type: &'static str,
        field: &str,
    ) -> DomainResult<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Ok(v),
            other => Err(mismatch(entity_type, field, FieldKind::Timestamp, &other)),
        }
    }

    pub fn into_opt_timestamp(
        self,
        entity_type: &'static str,
        field: &str,
    ) -> DomainResult<Option<DateTime<Utc>>> {
        match self {
            Self::Null => Ok(None),
            other => other.into_timestamp(entity_type, field).map(Some),
        }
    }

    /// Timestamp rebuilt from microseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(Self::Timestamp)
    }
}

fn mismatch(
    entity_type: &'static str,
    field: &str,
    expected: FieldKind,
    got: &FieldValue,
) -> DomainError {
    let got = got.kind().map_or_else(|| "null".to_string(), |k| k.to_string());
    DomainError::invalid_field(entity_type, field, format!("expected {expected}, got {got}"))
}

/// Validation error for a field name the entity does not have.
pub fn unknown_field(entity_type: &'static str, field: &str) -> DomainError {
    DomainError::invalid_field(entity_type, field, "unknown field")
}

impl Ord for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// Argument of a repository `get`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// Store-assigned surrogate identity.
    Id(i64),
    /// External identifier.
    Uuid(Uuid),
    /// Entity-defined lookup key, resolved by `Entity::filter_for_key`.
    Key(String),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Uuid(uuid) => write!(f, "{uuid}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Id(value)
    }
}

impl From<Uuid> for EntityKey {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

/// A persisted record with a surrogate identity and an external identifier.
///
/// `Default` must produce a fresh random `uuid`; the surrogate `id` stays
/// `None` until a repository `add` assigns it.
pub trait Entity:
    Clone + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Type name used in error context.
    const NAME: &'static str;

    /// Key namespace / table name.
    const COLLECTION: &'static str;

    /// Every field of the entity, identity fields included.
    fn schema() -> &'static [FieldDef];

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn uuid(&self) -> Uuid;

    /// Current value of `name`, `None` for unknown fields.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Type-checked assignment of `name`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown fields or mismatched kinds.
    fn set_field(&mut self, name: &str, value: FieldValue) -> DomainResult<()>;

    /// Filter used by `get` when called with a string key.
    ///
    /// # Errors
    ///
    /// The default accepts UUID strings only.
    fn filter_for_key(key: &str) -> DomainResult<Filter> {
        Uuid::parse_str(key.trim())
            .map(Filter::by_uuid)
            .map_err(|_| {
                DomainError::invalid_field(Self::NAME, UUID_FIELD, format!("not a uuid: {key}"))
            })
    }

    fn field_def(name: &str) -> Option<&'static FieldDef> {
        Self::schema().iter().find(|def| def.name == name)
    }

    /// All `(field, value)` pairs in schema order.
    fn values(&self) -> Vec<(&'static str, FieldValue)> {
        Self::schema()
            .iter()
            .map(|def| (def.name, self.field(def.name).unwrap_or(FieldValue::Null)))
            .collect()
    }
}
