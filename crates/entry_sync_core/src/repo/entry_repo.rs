//! Entry repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the durable, synchronous local store for one or more scopes.
//! - Keep SQL details inside the core persistence boundary.
//! - Own the bookkeeping the sync engine needs between passes: pending remote
//!   deletes, the scope clear watermark and the last successful sync time.
//!
//! # Invariants
//! - Rows are keyed by `(id, owner_scope)`; `owner_scope IS NULL` marks legacy rows.
//! - Every multi-row write runs in one `IMMEDIATE` transaction; a failure leaves
//!   no partial scope state behind.
//! - Read paths reject invalid persisted state instead of masking it.
//! - No operation here performs network I/O.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::entry::{Entry, EntryId, EntryValidationError, ScopeId};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const ENTRY_SELECT_SQL: &str = "SELECT
    id,
    owner_scope,
    created_at,
    updated_at,
    payload
FROM entries";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for local entry persistence.
///
/// Every variant is a `StorageUnavailable` condition from the caller's view.
#[derive(Debug)]
pub enum RepoError {
    Validation(EntryValidationError),
    Db(DbError),
    InvalidData(String),
    ScopeMismatch { expected: ScopeId, found: ScopeId },
    LockPoisoned,
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted entry data: {message}"),
            Self::ScopeMismatch { expected, found } => {
                write!(f, "entry belongs to scope `{found}`, expected `{expected}`")
            }
            Self::LockPoisoned => write!(f, "entry store connection lock is poisoned"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) | Self::ScopeMismatch { .. } | Self::LockPoisoned => None,
        }
    }
}

impl From<EntryValidationError> for RepoError {
    fn from(value: EntryValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Remote delete that has been applied locally but not yet confirmed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDelete {
    pub id: EntryId,
    pub deleted_at: i64,
}

/// Per-scope sync bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeSyncState {
    /// Time of the last reconciliation pass that reached the remote.
    pub last_sync_at: Option<i64>,
    /// Time of a scope-wide clear whose remote side is not yet confirmed.
    pub cleared_at: Option<i64>,
}

/// Outcome of one legacy migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyMigration {
    /// Legacy rows assigned to the target scope.
    pub migrated: usize,
    /// Legacy rows left in place because the id already exists in the scope.
    pub conflicting: usize,
}

/// One write inside a transactional batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalWrite {
    /// Insert-or-replace keeping the entry's own timestamps.
    Upsert(Entry),
    Delete(EntryId),
    /// Records that a remote delete for `id` is still owed.
    MarkDeleted { id: EntryId, deleted_at: i64 },
    ForgetDeleted(EntryId),
    /// Removes every entry and pending delete of the scope. With `cleared_at`
    /// set, records a watermark so older remote copies are deleted rather
    /// than pulled back.
    ClearScope { cleared_at: Option<i64> },
    ForgetClear,
    MarkSynced(i64),
}

/// Local store contract consumed by the sync engine.
pub trait EntryRepository: Send + Sync {
    /// Lists entries of `scope`, newest `created_at` first.
    fn fetch_all(&self, scope: &ScopeId) -> RepoResult<Vec<Entry>>;
    fn get(&self, id: EntryId, scope: &ScopeId) -> RepoResult<Option<Entry>>;
    /// Insert-or-replace keyed by `(id, owner_scope)`; the entry must be scoped.
    fn upsert(&self, entry: &Entry) -> RepoResult<()>;
    /// Writes `entry` under `scope`, keeping the stored `created_at` and
    /// stamping a strictly newer `updated_at`. Returns the stored version.
    fn save_stamped(&self, entry: &Entry, scope: &ScopeId, now_ms: i64) -> RepoResult<Entry>;
    /// Removes one entry. Returns `false` when nothing was stored.
    fn delete(&self, id: EntryId, scope: &ScopeId) -> RepoResult<bool>;
    fn delete_all_for_scope(&self, scope: &ScopeId) -> RepoResult<usize>;
    /// Applies all writes atomically.
    fn apply_batch(&self, scope: &ScopeId, writes: &[LocalWrite]) -> RepoResult<()>;
    /// Assigns every legacy row to `scope`.
    fn migrate_legacy(&self, scope: &ScopeId) -> RepoResult<LegacyMigration>;
    /// Stores a pre-partition record. Used by import paths and tests.
    fn insert_legacy(&self, entry: &Entry) -> RepoResult<()>;
    fn legacy_count(&self) -> RepoResult<usize>;
    fn pending_deletes(&self, scope: &ScopeId) -> RepoResult<Vec<PendingDelete>>;
    fn sync_state(&self, scope: &ScopeId) -> RepoResult<ScopeSyncState>;
}

/// SQLite-backed entry repository owning its connection.
pub struct SqliteEntryRepository {
    conn: Mutex<Connection>,
}

impl SqliteEntryRepository {
    /// Wraps a migrated connection.
    ///
    /// Rejects connections whose schema is not at the latest version.
    pub fn try_new(conn: Connection) -> RepoResult<Self> {
        let version = current_user_version(&conn)?;
        let latest = latest_version();
        if version > latest {
            return Err(RepoError::Db(DbError::UnsupportedSchemaVersion {
                db_version: version,
                latest_supported: latest,
            }));
        }
        if version < latest {
            return Err(RepoError::InvalidData(format!(
                "entry database schema version {version} is not migrated to {latest}"
            )));
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::try_new(open_db(path)?)
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepoError::LockPoisoned)
    }
}

impl EntryRepository for SqliteEntryRepository {
    fn fetch_all(&self, scope: &ScopeId) -> RepoResult<Vec<Entry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{ENTRY_SELECT_SQL}
             WHERE owner_scope = ?1
             ORDER BY created_at DESC, id ASC;"
        ))?;
        let mut rows = stmt.query([scope.as_str()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }

    fn get(&self, id: EntryId, scope: &ScopeId) -> RepoResult<Option<Entry>> {
        let conn = self.lock()?;
        select_entry(&conn, id, scope)
    }

    fn upsert(&self, entry: &Entry) -> RepoResult<()> {
        let scope = entry.owner_scope.clone().ok_or_else(|| {
            RepoError::InvalidData(format!(
                "entry {} has no owner scope; use insert_legacy for unscoped rows",
                entry.id
            ))
        })?;
        self.apply_batch(&scope, &[LocalWrite::Upsert(entry.clone())])
    }

    fn save_stamped(&self, entry: &Entry, scope: &ScopeId, now_ms: i64) -> RepoResult<Entry> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = select_entry(&tx, entry.id, scope)?;
        let created_at = previous
            .as_ref()
            .map_or(entry.created_at, |stored| stored.created_at);
        // The floor also covers versions issued before a delete or clear.
        let deleted_at: Option<i64> = tx
            .query_row(
                "SELECT deleted_at FROM entry_tombstones WHERE id = ?1 AND owner_scope = ?2;",
                params![entry.id.to_string(), scope.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let cleared_at: Option<i64> = tx
            .query_row(
                "SELECT cleared_at FROM scope_sync_state WHERE owner_scope = ?1;",
                [scope.as_str()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        let floor = [
            previous.as_ref().map(|stored| stored.updated_at),
            deleted_at,
            cleared_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .map_or(i64::MIN, |issued| issued.saturating_add(1));

        let stamped = Entry {
            id: entry.id,
            created_at,
            updated_at: now_ms.max(floor).max(created_at),
            owner_scope: Some(scope.clone()),
            payload: entry.payload.clone(),
        };
        write_upsert(&tx, scope, &stamped)?;
        tx.execute(
            "DELETE FROM entry_tombstones WHERE id = ?1 AND owner_scope = ?2;",
            params![stamped.id.to_string(), scope.as_str()],
        )?;
        tx.commit()?;

        Ok(stamped)
    }

    fn delete(&self, id: EntryId, scope: &ScopeId) -> RepoResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM entries WHERE id = ?1 AND owner_scope = ?2;",
            params![id.to_string(), scope.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn delete_all_for_scope(&self, scope: &ScopeId) -> RepoResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM entries WHERE owner_scope = ?1;",
            [scope.as_str()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn apply_batch(&self, scope: &ScopeId, writes: &[LocalWrite]) -> RepoResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for write in writes {
            apply_write(&tx, scope, write)?;
        }
        tx.commit()?;

        debug!(
            "event=entry_batch module=repo status=ok scope={} writes={}",
            scope,
            writes.len()
        );
        Ok(())
    }

    fn migrate_legacy(&self, scope: &ScopeId) -> RepoResult<LegacyMigration> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // OR IGNORE leaves rows whose id already exists in the scope untouched.
        let migrated = tx.execute(
            "UPDATE OR IGNORE entries SET owner_scope = ?1 WHERE owner_scope IS NULL;",
            [scope.as_str()],
        )?;
        let conflicting = count_legacy(&tx)?;
        tx.commit()?;

        let outcome = LegacyMigration {
            migrated,
            conflicting,
        };
        if migrated > 0 {
            info!(
                "event=legacy_migrate module=repo status=ok scope={} migrated={} conflicting={}",
                scope, outcome.migrated, outcome.conflicting
            );
        }
        if conflicting > 0 {
            warn!(
                "event=legacy_migrate module=repo status=partial scope={} conflicting={}",
                scope, conflicting
            );
        }
        Ok(outcome)
    }

    fn insert_legacy(&self, entry: &Entry) -> RepoResult<()> {
        if let Some(scope) = &entry.owner_scope {
            return Err(RepoError::InvalidData(format!(
                "entry {} is already scoped to `{scope}`",
                entry.id
            )));
        }
        entry.validate()?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entries (id, owner_scope, created_at, updated_at, payload)
             VALUES (?1, NULL, ?2, ?3, ?4);",
            params![
                entry.id.to_string(),
                entry.created_at,
                entry.updated_at,
                entry.payload.as_slice(),
            ],
        )?;
        Ok(())
    }

    fn legacy_count(&self) -> RepoResult<usize> {
        let conn = self.lock()?;
        count_legacy(&conn)
    }

    fn pending_deletes(&self, scope: &ScopeId) -> RepoResult<Vec<PendingDelete>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, deleted_at
             FROM entry_tombstones
             WHERE owner_scope = ?1
             ORDER BY deleted_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query([scope.as_str()])?;
        let mut pending = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            pending.push(PendingDelete {
                id: parse_entry_id(&id_text, "entry_tombstones.id")?,
                deleted_at: row.get("deleted_at")?,
            });
        }
        Ok(pending)
    }

    fn sync_state(&self, scope: &ScopeId) -> RepoResult<ScopeSyncState> {
        let conn = self.lock()?;
        let state = conn
            .query_row(
                "SELECT last_sync_at, cleared_at
                 FROM scope_sync_state
                 WHERE owner_scope = ?1;",
                [scope.as_str()],
                |row| {
                    Ok(ScopeSyncState {
                        last_sync_at: row.get("last_sync_at")?,
                        cleared_at: row.get("cleared_at")?,
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_default())
    }
}

fn apply_write(conn: &Connection, scope: &ScopeId, write: &LocalWrite) -> RepoResult<()> {
    match write {
        LocalWrite::Upsert(entry) => write_upsert(conn, scope, entry),
        LocalWrite::Delete(id) => {
            conn.execute(
                "DELETE FROM entries WHERE id = ?1 AND owner_scope = ?2;",
                params![id.to_string(), scope.as_str()],
            )?;
            Ok(())
        }
        LocalWrite::MarkDeleted { id, deleted_at } => {
            conn.execute(
                "INSERT INTO entry_tombstones (id, owner_scope, deleted_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (id, owner_scope) DO UPDATE SET
                    deleted_at = MAX(deleted_at, excluded.deleted_at);",
                params![id.to_string(), scope.as_str(), deleted_at],
            )?;
            Ok(())
        }
        LocalWrite::ForgetDeleted(id) => {
            conn.execute(
                "DELETE FROM entry_tombstones WHERE id = ?1 AND owner_scope = ?2;",
                params![id.to_string(), scope.as_str()],
            )?;
            Ok(())
        }
        LocalWrite::ClearScope { cleared_at } => {
            conn.execute(
                "DELETE FROM entries WHERE owner_scope = ?1;",
                [scope.as_str()],
            )?;
            conn.execute(
                "DELETE FROM entry_tombstones WHERE owner_scope = ?1;",
                [scope.as_str()],
            )?;
            if let Some(cleared_at) = cleared_at {
                conn.execute(
                    "INSERT INTO scope_sync_state (owner_scope, cleared_at)
                     VALUES (?1, ?2)
                     ON CONFLICT (owner_scope) DO UPDATE SET
                        cleared_at = MAX(COALESCE(cleared_at, 0), excluded.cleared_at);",
                    params![scope.as_str(), cleared_at],
                )?;
            }
            Ok(())
        }
        LocalWrite::ForgetClear => {
            conn.execute(
                "UPDATE scope_sync_state SET cleared_at = NULL WHERE owner_scope = ?1;",
                [scope.as_str()],
            )?;
            Ok(())
        }
        LocalWrite::MarkSynced(at) => {
            conn.execute(
                "INSERT INTO scope_sync_state (owner_scope, last_sync_at)
                 VALUES (?1, ?2)
                 ON CONFLICT (owner_scope) DO UPDATE SET
                    last_sync_at = excluded.last_sync_at;",
                params![scope.as_str(), at],
            )?;
            Ok(())
        }
    }
}

fn write_upsert(conn: &Connection, scope: &ScopeId, entry: &Entry) -> RepoResult<()> {
    if let Some(owner) = &entry.owner_scope {
        if owner != scope {
            return Err(RepoError::ScopeMismatch {
                expected: scope.clone(),
                found: owner.clone(),
            });
        }
    }
    entry.validate()?;

    conn.execute(
        "INSERT INTO entries (id, owner_scope, created_at, updated_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (id, owner_scope) DO UPDATE SET
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            payload = excluded.payload;",
        params![
            entry.id.to_string(),
            scope.as_str(),
            entry.created_at,
            entry.updated_at,
            entry.payload.as_slice(),
        ],
    )?;
    Ok(())
}

fn select_entry(conn: &Connection, id: EntryId, scope: &ScopeId) -> RepoResult<Option<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "{ENTRY_SELECT_SQL}
         WHERE id = ?1
           AND owner_scope = ?2;"
    ))?;
    let mut rows = stmt.query(params![id.to_string(), scope.as_str()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_entry_row(row)?));
    }
    Ok(None)
}

fn count_legacy(conn: &Connection) -> RepoResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries WHERE owner_scope IS NULL;",
        [],
        |row| row.get(0),
    )?;
    usize::try_from(count)
        .map_err(|_| RepoError::InvalidData(format!("invalid legacy row count `{count}`")))
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<Entry> {
    let id_text: String = row.get("id")?;
    let owner_scope: Option<String> = row.get("owner_scope")?;

    let entry = Entry {
        id: parse_entry_id(&id_text, "entries.id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        owner_scope: owner_scope.map(ScopeId::from),
        payload: row.get("payload")?,
    };
    entry.validate()?;
    Ok(entry)
}

fn parse_entry_id(value: &str, column: &str) -> RepoResult<EntryId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}
