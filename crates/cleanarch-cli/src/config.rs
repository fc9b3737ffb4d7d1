//! # CLI Configuration
//!
//! Environment-based configuration for the repository driver.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use cleanarch_persistence::{KvConfig, SqlConfig};

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    #[default]
    Mock,
    Redis,
    Sqlite,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mock => "mock",
            Self::Redis => "redis",
            Self::Sqlite => "sqlite",
        })
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "memory" => Ok(Self::Mock),
            "redis" | "kv" => Ok(Self::Redis),
            "sqlite" | "sql" => Ok(Self::Sqlite),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend used when no `--backend` flag is given
    pub backend: Backend,

    /// Redis configuration
    pub redis: KvConfig,

    /// SQLite configuration
    pub sqlite: SqlConfig,

    /// Logging level
    pub log_level: String,

    /// Emit JSON log lines
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let backend = match var("CLEANARCH_BACKEND") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => Backend::default(),
        };

        let mut redis = KvConfig::with_url(
            var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
        );
        if let Some(prefix) = var("REDIS_PREFIX").filter(|p| !p.trim().is_empty()) {
            redis = redis.prefix(prefix);
        }
        if let Some(secs) = var("REDIS_TTL_SECS").and_then(|v| v.parse().ok()) {
            redis = redis.ttl(Duration::from_secs(secs));
        }

        let mut sqlite = SqlConfig::with_path(
            var("SQLITE_PATH").unwrap_or_else(|| SqlConfig::default().path),
        );
        if let Some(ms) = var("SQLITE_BUSY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            sqlite.busy_timeout = Duration::from_millis(ms);
        }

        Ok(Self {
            backend,
            redis,
            sqlite,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: var("LOG_JSON").is_some_and(|v| v == "true" || v == "1"),
        })
    }
}
