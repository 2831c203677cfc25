//! Remote store adapter contracts.
//!
//! # Responsibility
//! - Define the best-effort, per-scope mirror the sync engine pushes to and
//!   pulls from.
//! - Define the wire document shape and its entry conversion.
//! - Bound every remote call with a timeout.
//!
//! # Invariants
//! - Every method may fail; failures never corrupt local state.
//! - `put` and `delete` are idempotent.
//! - Undecodable remote documents are skipped by `fetch_all`, never fatal.

use crate::model::entry::{Entry, EntryId, EntryValidationError, ScopeId};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub mod fs;
pub mod memory;

pub use fs::FsRemoteStore;
pub use memory::{InMemoryRemoteStore, RemoteStats};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote failure. All variants degrade to the local-only result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Unavailable(String),
    Unauthorized(String),
    Rejected(String),
    Timeout(Duration),
}

impl RemoteError {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "remote_unavailable",
            Self::Unauthorized(_) => "remote_unauthorized",
            Self::Rejected(_) => "remote_rejected",
            Self::Timeout(_) => "remote_timeout",
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "remote store unavailable: {reason}"),
            Self::Unauthorized(reason) => write!(f, "remote store refused credentials: {reason}"),
            Self::Rejected(reason) => write!(f, "remote store rejected request: {reason}"),
            Self::Timeout(limit) => {
                write!(f, "remote call exceeded {} ms", limit.as_millis())
            }
        }
    }
}

impl Error for RemoteError {}

/// Best-effort per-scope mirror of entries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns every decodable entry stored for `scope`.
    async fn fetch_all(&self, scope: &ScopeId) -> RemoteResult<Vec<Entry>>;
    /// Idempotent upsert keyed by entry id.
    async fn put(&self, entry: &Entry, scope: &ScopeId) -> RemoteResult<()>;
    /// Idempotent delete; an absent id is not an error.
    async fn delete(&self, id: EntryId, scope: &ScopeId) -> RemoteResult<()>;
    /// Deletes every document of `scope`. Returns the number removed.
    async fn delete_all_for_scope(&self, scope: &ScopeId) -> RemoteResult<usize>;
}

/// Runs one remote call under `limit`; elapsing maps to [`RemoteError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}

/// Wire shape of one remote document.
///
/// Field names follow the remote collection schema; the payload travels as
/// standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentDecodeError {
    InvalidId(String),
    InvalidPayload(String),
    Invalid(EntryValidationError),
}

impl Display for DocumentDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(value) => write!(f, "invalid document id `{value}`"),
            Self::InvalidPayload(reason) => write!(f, "invalid document payload: {reason}"),
            Self::Invalid(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DocumentDecodeError {}

impl RemoteDocument {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            id: entry.id.to_string(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            payload: BASE64.encode(&entry.payload),
        }
    }

    /// Decodes this document into an entry owned by `scope`.
    pub fn to_entry(&self, scope: &ScopeId) -> Result<Entry, DocumentDecodeError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|_| DocumentDecodeError::InvalidId(self.id.clone()))?;
        let payload = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|err| DocumentDecodeError::InvalidPayload(err.to_string()))?;
        let entry = Entry {
            id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            owner_scope: Some(scope.clone()),
            payload,
        };
        entry.validate().map_err(DocumentDecodeError::Invalid)?;
        Ok(entry)
    }
}

/// Remote collection path for one scope, e.g. `users/u1/symptom_entries`.
pub fn collection_path(scope: &ScopeId, collection: &str) -> String {
    format!("users/{}/{collection}", scope.as_str())
}

/// Decodes documents, skipping (and logging) the ones that do not decode.
pub fn decode_documents<'a>(
    scope: &ScopeId,
    documents: impl IntoIterator<Item = &'a RemoteDocument>,
) -> Vec<Entry> {
    let mut entries = Vec::new();
    for document in documents {
        match document.to_entry(scope) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!(
                "event=remote_decode module=remote status=skipped scope={} document_id={} error={}",
                scope, document.id, err
            ),
        }
    }
    entries
}

/// Returns whether `scope` can be used as a single path segment.
pub fn is_safe_scope_segment(scope: &ScopeId) -> bool {
    let value = scope.as_str();
    !value.is_empty()
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '@' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::{
        collection_path, decode_documents, is_safe_scope_segment, with_timeout,
        DocumentDecodeError, RemoteDocument, RemoteError,
    };
    use crate::model::entry::{Entry, ScopeId};
    use std::time::Duration;

    #[test]
    fn document_carries_payload_as_base64() {
        let entry = Entry::new(b"{\"severity\":4}".to_vec(), 1_000);
        let document = RemoteDocument::from_entry(&entry);
        assert_eq!(document.payload, "eyJzZXZlcml0eSI6NH0=");

        let json = serde_json::to_value(&document).expect("document should serialize");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());

        let scope = ScopeId::new("user-a");
        let decoded = document.to_entry(&scope).expect("document should decode");
        assert_eq!(decoded, entry.in_scope(&scope));
    }

    #[test]
    fn undecodable_documents_are_skipped() {
        let scope = ScopeId::new("user-a");
        let good = RemoteDocument::from_entry(&Entry::new(Vec::new(), 5));
        let bad_id = RemoteDocument {
            id: "not-a-uuid".to_string(),
            ..good.clone()
        };
        let bad_payload = RemoteDocument {
            payload: "%%%".to_string(),
            ..good.clone()
        };

        assert!(matches!(
            bad_id.to_entry(&scope),
            Err(DocumentDecodeError::InvalidId(_))
        ));
        assert!(matches!(
            bad_payload.to_entry(&scope),
            Err(DocumentDecodeError::InvalidPayload(_))
        ));

        let decoded = decode_documents(&scope, [&good, &bad_id, &bad_payload]);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn scope_segments_reject_path_tricks() {
        assert!(is_safe_scope_segment(&ScopeId::new("Xy12_ab-CD")));
        assert!(!is_safe_scope_segment(&ScopeId::new("..")));
        assert!(!is_safe_scope_segment(&ScopeId::new("a/b")));
        assert!(!is_safe_scope_segment(&ScopeId::new("")));
        assert_eq!(
            collection_path(&ScopeId::new("u1"), "symptom_entries"),
            "users/u1/symptom_entries"
        );
    }

    #[tokio::test]
    async fn with_timeout_maps_elapsed_to_timeout() {
        let limit = Duration::from_millis(10);
        let result: Result<(), RemoteError> = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(RemoteError::Timeout(limit)));
    }
}
