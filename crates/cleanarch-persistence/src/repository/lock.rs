//! Per-instance session lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use cleanarch_domain::{DomainError, DomainResult};

/// Exclusive lock held by a session for its whole lifetime.
#[derive(Debug, Clone)]
pub(crate) struct SessionLock {
    inner: Arc<Mutex<()>>,
    entity_type: &'static str,
}

pub(crate) type SessionGuard = OwnedMutexGuard<()>;

impl SessionLock {
    pub(crate) fn new(entity_type: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            entity_type,
        }
    }

    /// Acquire without waiting.
    pub(crate) fn try_acquire(&self) -> DomainResult<SessionGuard> {
        self.inner.clone().try_lock_owned().map_err(|_| {
            tracing::warn!(entity = self.entity_type, "session already open");
            DomainError::concurrency(
                self.entity_type,
                "a session is already open on this repository",
            )
        })
    }

    /// Wait for the lock, giving up after `timeout`.
    pub(crate) async fn acquire_timeout(&self, timeout: Duration) -> DomainResult<SessionGuard> {
        tokio::time::timeout(timeout, self.inner.clone().lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(entity = self.entity_type, ?timeout, "session lock wait timed out");
                DomainError::ResourceBusy {
                    resource: format!("{} repository session", self.entity_type),
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
            })
    }
}
