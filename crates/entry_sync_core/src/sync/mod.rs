//! Offline-first reconciliation between the local store and the remote mirror.
//!
//! # Responsibility
//! - Expose the caller-facing entry API (`fetch_entries`, `save`, `delete`,
//!   `delete_all`).
//! - Merge local and remote views with whole-record last-write-wins.
//! - Keep remote failures away from callers.
//!
//! # Invariants
//! - Local writes are authoritative and visible before any remote call.
//! - Only `StorageUnavailable`/`InvalidEntry` reach callers.
//! - Operations on one scope never interleave.

use crate::model::entry::{EntryValidationError, ScopeId};
use crate::repo::entry_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod dispatcher;
pub mod engine;
pub mod merge;
pub mod scope_lock;

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to engine callers.
#[derive(Debug)]
pub enum SyncError {
    /// The local durable medium could not be read or written.
    StorageUnavailable(RepoError),
    /// The caller supplied an entry that violates metadata invariants.
    InvalidEntry(EntryValidationError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageUnavailable(err) => write!(f, "local entry storage unavailable: {err}"),
            Self::InvalidEntry(err) => write!(f, "invalid entry: {err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StorageUnavailable(err) => Some(err),
            Self::InvalidEntry(err) => Some(err),
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::InvalidEntry(err),
            other => Self::StorageUnavailable(other),
        }
    }
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No identity or no remote configured; the remote was not contacted.
    LocalOnly,
    /// The remote read failed; no merge happened.
    Offline,
    /// Local and remote views were merged.
    Merged,
}

impl ReconcileOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::Offline => "offline",
            Self::Merged => "merged",
        }
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scope: ScopeId,
    pub outcome: ReconcileOutcome,
    /// Remote versions written locally.
    pub pulled: usize,
    /// Local versions queued for upload.
    pub pushed: usize,
    /// Remote deletes queued to honor local deletes.
    pub remote_deleted: usize,
    pub unchanged: usize,
    /// Remote writes skipped because the scope queue was full or closed.
    pub skipped: usize,
}

impl ReconcileReport {
    pub(crate) fn empty(scope: &ScopeId, outcome: ReconcileOutcome) -> Self {
        Self {
            scope: scope.clone(),
            outcome,
            pulled: 0,
            pushed: 0,
            remote_deleted: 0,
            unchanged: 0,
            skipped: 0,
        }
    }
}
