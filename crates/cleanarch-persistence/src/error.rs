//! Persistence layer error types
//!
//! Driver failures are collected here and mapped onto the domain taxonomy
//! before they cross the repository contract.

#[cfg(feature = "sqlite")]
use std::time::Duration;

use cleanarch_domain::DomainError;
use thiserror::Error;

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("SQLite database locked after {waited_ms}ms: {message}")]
    SqliteBusy { message: String, waited_ms: u64 },

    #[error("Snapshot is stale: {0}")]
    StaleSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock {key} not acquired within {timeout_ms}ms")]
    LockTimeout { key: String, timeout_ms: u64 },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Session state poisoned: {0}")]
    Poisoned(String),
}

impl PersistenceError {
    const fn backend(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Sqlite(_) | Self::SqliteBusy { .. } | Self::StaleSnapshot(_) => "sqlite",
            Self::Serialization(_)
            | Self::LockTimeout { .. }
            | Self::Configuration(_)
            | Self::Poisoned(_) => "persistence",
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for PersistenceError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl PersistenceError {
    /// SQLite error from a connection that waits `busy_timeout` for locks.
    ///
    /// Promoting a read transaction whose snapshot another connection has
    /// since written past fails without waiting.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(err: rusqlite::Error, busy_timeout: Duration) -> Self {
        let message = err.to_string();
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            if failure.extended_code == rusqlite::ffi::SQLITE_BUSY_SNAPSHOT {
                return Self::StaleSnapshot(message);
            }
        }
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                Self::SqliteBusy {
                    message,
                    waited_ms: u64::try_from(busy_timeout.as_millis()).unwrap_or(u64::MAX),
                }
            }
            _ => Self::Sqlite(message),
        }
    }
}

impl From<PersistenceError> for DomainError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::LockTimeout { key, timeout_ms } => Self::ResourceBusy {
                resource: key,
                waited_ms: timeout_ms,
            },
            PersistenceError::SqliteBusy { message, waited_ms } => Self::ResourceBusy {
                resource: format!("sqlite ({message})"),
                waited_ms,
            },
            PersistenceError::StaleSnapshot(message) => Self::ConcurrencyViolation {
                entity_type: "record",
                message: format!("{message}; begin a new session"),
            },
            PersistenceError::Serialization(message) => Self::Corrupted {
                entity_type: "record",
                key: String::new(),
                message,
            },
            other => Self::BackendUnavailable {
                backend: other.backend(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_maps_to_resource_busy() {
        let err: DomainError = PersistenceError::LockTimeout {
            key: "products:seq:lock".into(),
            timeout_ms: 5000,
        }
        .into();
        assert!(matches!(
            err,
            DomainError::ResourceBusy { ref resource, waited_ms: 5000 } if resource == "products:seq:lock"
        ));
    }

    #[test]
    fn test_transport_errors_map_to_backend_unavailable() {
        let err: DomainError = PersistenceError::Redis("connection refused".into()).into();
        assert!(matches!(
            err,
            DomainError::BackendUnavailable { backend: "redis", .. }
        ));
    }

    #[cfg(feature = "sqlite")]
    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_busy_reports_busy_timeout() {
        let timeout = Duration::from_millis(250);
        for code in [rusqlite::ffi::SQLITE_BUSY, rusqlite::ffi::SQLITE_LOCKED] {
            let err: DomainError = PersistenceError::sqlite(sqlite_failure(code), timeout).into();
            assert!(matches!(
                err,
                DomainError::ResourceBusy { ref resource, waited_ms: 250 } if resource.starts_with("sqlite")
            ));
        }
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_stale_snapshot_is_concurrency_violation() {
        let failure = sqlite_failure(rusqlite::ffi::SQLITE_BUSY_SNAPSHOT);
        let err: DomainError = PersistenceError::sqlite(failure, Duration::from_secs(5)).into();
        assert_eq!(err.error_code(), "CONCURRENCY_VIOLATION");

        let other = PersistenceError::sqlite(sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT), Duration::ZERO);
        assert!(matches!(
            DomainError::from(other),
            DomainError::BackendUnavailable { backend: "sqlite", .. }
        ));
    }

    #[test]
    fn test_serialization_maps_to_corrupted() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DomainError = PersistenceError::from(json_err).into();
        assert_eq!(err.error_code(), "CORRUPTED_RECORD");
    }
}
