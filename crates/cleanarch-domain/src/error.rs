//! Domain error taxonomy shared by every repository backend.

use std::fmt;

/// A single offending field inside a validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Domain-level errors.
///
/// Backends map every driver failure onto one of these variants before it
/// leaves the repository contract.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{entity_type} not found: {key}")]
    NotFound {
        entity_type: &'static str,
        key: String,
    },

    #[error("{entity_type} already exists: {key}")]
    AlreadyExists {
        entity_type: &'static str,
        key: String,
    },

    #[error("invalid {entity_type}: {message}")]
    Validation {
        entity_type: &'static str,
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("concurrency violation on {entity_type}: {message}")]
    ConcurrencyViolation {
        entity_type: &'static str,
        message: String,
    },

    #[error("{resource} is busy, gave up after {waited_ms}ms")]
    ResourceBusy { resource: String, waited_ms: u64 },

    #[error("{backend} backend unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },

    #[error("corrupted {entity_type} record {key}: {message}")]
    Corrupted {
        entity_type: &'static str,
        key: String,
        message: String,
    },
}

impl DomainError {
    pub fn not_found(entity_type: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            entity_type,
            key: key.to_string(),
        }
    }

    pub fn already_exists(entity_type: &'static str, key: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            entity_type,
            key: key.to_string(),
        }
    }

    /// Validation failure pinned to one field.
    pub fn invalid_field(
        entity_type: &'static str,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let field_error = FieldError::new(field, message);
        Self::Validation {
            entity_type,
            message: field_error.to_string(),
            fields: vec![field_error],
        }
    }

    /// Validation failure aggregating several field errors.
    pub fn invalid_fields(entity_type: &'static str, fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation {
            entity_type,
            message,
            fields,
        }
    }

    pub fn concurrency(entity_type: &'static str, message: impl Into<String>) -> Self {
        Self::ConcurrencyViolation {
            entity_type,
            message: message.into(),
        }
    }

    /// HTTP-style status code for front ends.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } | Self::ConcurrencyViolation { .. } => 409,
            Self::Validation { .. } => 400,
            Self::ResourceBusy { .. } | Self::BackendUnavailable { .. } => 503,
            Self::Corrupted { .. } => 500,
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::ConcurrencyViolation { .. } => "CONCURRENCY_VIOLATION",
            Self::ResourceBusy { .. } => "RESOURCE_BUSY",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::Corrupted { .. } => "CORRUPTED_RECORD",
        }
    }

    /// Field errors attached to a validation failure, empty otherwise.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

pub type DomainResult<T> = std::result::Result<T, DomainError>;
