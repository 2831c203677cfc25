//! Sync engine configuration.
//!
//! # Responsibility
//! - Declare tunables for scope resolution and remote dispatch.
//! - Parse and validate configuration from JSON.
//!
//! # Invariants
//! - Missing fields fall back to defaults; unknown fields are rejected.
//! - A validated config always has a non-zero remote timeout and queue capacity.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ANONYMOUS_SCOPE: &str = "guest";
pub const DEFAULT_COLLECTION: &str = "symptom_entries";
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REMOTE_QUEUE_CAPACITY: usize = 64;
const REMOTE_TIMEOUT_MAX_MS: u64 = 5 * 60 * 1000;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read sync config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse sync config: {err}"),
            Self::Invalid(message) => write!(f, "invalid sync config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Tunables for [`crate::sync::engine::EntrySyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Scope used when nobody is signed in.
    pub anonymous_scope: String,
    /// Remote collection name under `users/{scope}/`.
    pub collection: String,
    /// Upper bound for every remote call.
    pub remote_timeout_ms: u64,
    /// Per-scope bound on queued background remote writes.
    pub remote_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            anonymous_scope: DEFAULT_ANONYMOUS_SCOPE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            remote_queue_capacity: DEFAULT_REMOTE_QUEUE_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anonymous_scope.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "anonymous_scope cannot be empty".to_string(),
            ));
        }
        if !is_path_segment(&self.collection) {
            return Err(ConfigError::Invalid(format!(
                "collection `{}` must be a non-empty [a-z0-9_-] name",
                self.collection
            )));
        }
        if self.remote_timeout_ms == 0 || self.remote_timeout_ms > REMOTE_TIMEOUT_MAX_MS {
            return Err(ConfigError::Invalid(format!(
                "remote_timeout_ms must be within 1..={REMOTE_TIMEOUT_MAX_MS}, got {}",
                self.remote_timeout_ms
            )));
        }
        if self.remote_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "remote_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
