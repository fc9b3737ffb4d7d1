//! Key-value backend configuration and key layout.

use std::time::Duration;

use uuid::Uuid;

/// Key-value backend configuration
#[derive(Debug, Clone)]
pub struct KvConfig {
    pub url: String,
    /// Key namespace; defaults to the entity collection name.
    pub prefix: Option<String>,
    /// Expiry applied to every record written.
    pub ttl: Option<Duration>,
    /// How long `add` waits for the identity counter lock.
    pub lock_timeout: Duration,
    /// Expiry of the identity counter lock itself.
    pub lock_ttl: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: None,
            ttl: None,
            lock_timeout: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(10),
        }
    }
}

impl KvConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Keys owned by one repository under prefix `P`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `P:rec:{uuid}`
    pub fn record(&self, uuid: &Uuid) -> String {
        format!("{}:rec:{uuid}", self.prefix)
    }

    /// `P:rec:*`
    pub fn records(&self) -> String {
        format!("{}:rec:*", self.prefix)
    }

    /// `P:idx:{id}`
    pub fn index(&self, id: i64) -> String {
        format!("{}:idx:{id}", self.prefix)
    }

    /// `P:seq`
    pub fn sequence(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    /// `P:seq:lock`
    pub fn sequence_lock(&self) -> String {
        format!("{}:seq:lock", self.prefix)
    }
}
