//! Offline-first entry synchronization core.
//! Local SQLite storage is the source of truth; a per-user remote mirror is
//! reconciled opportunistically with last-write-wins.

pub mod clock;
pub mod config;
pub mod db;
pub mod export;
pub mod identity;
pub mod logging;
pub mod model;
pub mod remote;
pub mod repo;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use export::{export_entries_json, ExportError};
pub use identity::{IdentityProvider, ResolvedScope, ScopeResolver, SessionIdentity};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::entry::{Entry, EntryId, EntryValidationError, ScopeId};
pub use model::symptom::SymptomLog;
pub use remote::{FsRemoteStore, InMemoryRemoteStore, RemoteError, RemoteResult, RemoteStore};
pub use repo::entry_repo::{EntryRepository, RepoError, RepoResult, SqliteEntryRepository};
pub use sync::engine::EntrySyncEngine;
pub use sync::{ReconcileOutcome, ReconcileReport, SyncError, SyncResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
