//! Entry domain model.
//!
//! # Responsibility
//! - Define the canonical log record shared by local and remote stores.
//! - Carry identity and version metadata next to an opaque payload.
//!
//! # Invariants
//! - `id` is caller-assigned and never changes for the life of an entry.
//! - `created_at` and `updated_at` are epoch milliseconds and never negative.
//! - `updated_at >= created_at`.
//! - `owner_scope == None` marks a legacy record awaiting migration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one log entry.
pub type EntryId = Uuid;

/// Partition key naming whose entries an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScopeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Validation errors for entry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValidationError {
    NegativeTimestamp { field: &'static str, value: i64 },
    UpdatedBeforeCreated { created_at: i64, updated_at: i64 },
    EmptyScope,
}

impl Display for EntryValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeTimestamp { field, value } => {
                write!(f, "{field} must not be negative, got {value}")
            }
            Self::UpdatedBeforeCreated {
                created_at,
                updated_at,
            } => write!(
                f,
                "updated_at ({updated_at}) must not be earlier than created_at ({created_at})"
            ),
            Self::EmptyScope => write!(f, "owner scope must not be blank"),
        }
    }
}

impl Error for EntryValidationError {}

/// One health-log record as seen by the sync engine.
///
/// The payload is opaque here; see [`crate::model::symptom::SymptomLog`] for
/// the application shape carried inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub created_at: i64,
    pub updated_at: i64,
    pub owner_scope: Option<ScopeId>,
    pub payload: Vec<u8>,
}

impl Entry {
    /// Creates an unscoped entry with a generated id.
    ///
    /// Both timestamps start at `now_ms`; the store re-stamps `updated_at`
    /// on save.
    pub fn new(payload: Vec<u8>, now_ms: i64) -> Self {
        Self::with_id(Uuid::new_v4(), payload, now_ms)
    }

    /// Creates an unscoped entry with a caller-provided id.
    pub fn with_id(id: EntryId, payload: Vec<u8>, now_ms: i64) -> Self {
        Self {
            id,
            created_at: now_ms,
            updated_at: now_ms,
            owner_scope: None,
            payload,
        }
    }

    /// Returns a copy bound to `scope`.
    pub fn in_scope(mut self, scope: &ScopeId) -> Self {
        self.owner_scope = Some(scope.clone());
        self
    }

    /// Returns whether this record predates scope partitioning.
    pub fn is_legacy(&self) -> bool {
        self.owner_scope.is_none()
    }

    /// Serializes a typed payload into an entry body.
    pub fn encode_payload<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(value)
    }

    /// Decodes the payload as a typed JSON document.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Validates metadata invariants.
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        if self.created_at < 0 {
            return Err(EntryValidationError::NegativeTimestamp {
                field: "created_at",
                value: self.created_at,
            });
        }
        if self.updated_at < 0 {
            return Err(EntryValidationError::NegativeTimestamp {
                field: "updated_at",
                value: self.updated_at,
            });
        }
        if self.updated_at < self.created_at {
            return Err(EntryValidationError::UpdatedBeforeCreated {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        if let Some(scope) = &self.owner_scope {
            if scope.as_str().trim().is_empty() {
                return Err(EntryValidationError::EmptyScope);
            }
        }
        Ok(())
    }
}
