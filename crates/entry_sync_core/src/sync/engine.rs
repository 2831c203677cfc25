//! Caller-facing sync engine.
//!
//! # Responsibility
//! - Resolve the active scope on every call and serialize same-scope work.
//! - Commit every mutation locally before any remote call is attempted.
//! - Reconcile the local store with the remote mirror on reads.
//!
//! # Invariants
//! - Remote failures are logged and absorbed; callers only observe local
//!   storage and validation errors.
//! - Without a signed-in identity or a remote store the engine is local-only.
//! - Authenticated deletes leave markers that keep remote copies from being
//!   pulled back until the remote side is confirmed gone.
//! - A pass holds the scope lock for at most one remote timeout plus local work.

use super::dispatcher::{RemoteDispatcher, RemoteOp};
use super::merge::plan_merge;
use super::scope_lock::ScopeLocks;
use super::{ReconcileOutcome, ReconcileReport, SyncResult};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::identity::{IdentityProvider, ResolvedScope, ScopeResolver};
use crate::model::entry::{Entry, EntryId, ScopeId};
use crate::remote::{with_timeout, RemoteStore};
use crate::repo::entry_repo::{EntryRepository, LocalWrite};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

pub struct EntrySyncEngine {
    local: Arc<dyn EntryRepository>,
    remote: Option<Arc<dyn RemoteStore>>,
    dispatcher: Option<RemoteDispatcher>,
    scopes: ScopeResolver,
    clock: Arc<dyn Clock>,
    locks: ScopeLocks,
    migrated: Mutex<HashSet<ScopeId>>,
    config: SyncConfig,
}

impl EntrySyncEngine {
    /// Builds a local-only engine. Attach a mirror with [`Self::with_remote`].
    pub fn new(
        local: Arc<dyn EntryRepository>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            remote: None,
            dispatcher: None,
            scopes: ScopeResolver::new(identity, config.anonymous_scope.clone()),
            clock: Arc::new(SystemClock),
            locks: ScopeLocks::new(),
            migrated: Mutex::new(HashSet::new()),
            config,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.dispatcher = Some(RemoteDispatcher::new(
            Arc::clone(&remote),
            self.config.remote_timeout(),
            self.config.remote_queue_capacity,
        ));
        self.remote = Some(remote);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn current_scope(&self) -> ResolvedScope {
        self.scopes.resolve()
    }

    /// Returns the entries of the active scope, newest first.
    ///
    /// Signed-in callers get a reconciliation pass first; if the remote
    /// cannot be read the local view is returned unchanged.
    pub async fn fetch_entries(&self) -> SyncResult<Vec<Entry>> {
        let resolved = self.scopes.resolve();
        let _guard = self.locks.acquire(&resolved.scope).await;
        self.reconcile_locked(&resolved).await?;
        Ok(self.local.fetch_all(&resolved.scope)?)
    }

    /// Runs one reconciliation pass for the active scope.
    pub async fn reconcile(&self) -> SyncResult<ReconcileReport> {
        let resolved = self.scopes.resolve();
        let _guard = self.locks.acquire(&resolved.scope).await;
        self.reconcile_locked(&resolved).await
    }

    /// Upserts `entry` into the active scope and returns the stored version.
    ///
    /// `created_at` of an existing record is preserved and `updated_at` is
    /// stamped strictly newer than the previous version.
    pub async fn save(&self, entry: Entry) -> SyncResult<Entry> {
        let resolved = self.scopes.resolve();
        let _guard = self.locks.acquire(&resolved.scope).await;
        if resolved.authenticated {
            self.ensure_migrated(&resolved.scope)?;
        }

        let stored = self
            .local
            .save_stamped(&entry, &resolved.scope, self.clock.now_ms())?;
        debug!(
            "event=entry_save module=sync status=ok scope={} entry_id={} updated_at={}",
            resolved.scope, stored.id, stored.updated_at
        );

        if resolved.authenticated {
            self.dispatch(&resolved.scope, RemoteOp::Put(stored.clone()));
        }
        Ok(stored)
    }

    /// Removes one entry from the active scope. Absent ids are not an error.
    pub async fn delete(&self, id: EntryId) -> SyncResult<()> {
        let resolved = self.scopes.resolve();
        let _guard = self.locks.acquire(&resolved.scope).await;
        if resolved.authenticated {
            self.ensure_migrated(&resolved.scope)?;
        }
        let track = self.tracks_remote(&resolved);

        let mut writes = vec![LocalWrite::Delete(id)];
        if track {
            let existing = self.local.get(id, &resolved.scope)?;
            let deleted_at = existing
                .map_or(i64::MIN, |entry| entry.updated_at)
                .max(self.clock.now_ms());
            writes.push(LocalWrite::MarkDeleted { id, deleted_at });
        }
        self.local.apply_batch(&resolved.scope, &writes)?;
        debug!(
            "event=entry_delete module=sync status=ok scope={} entry_id={}",
            resolved.scope, id
        );

        if track {
            self.dispatch(&resolved.scope, RemoteOp::Delete(id));
        }
        Ok(())
    }

    /// Clears every entry of the active scope.
    pub async fn delete_all(&self) -> SyncResult<()> {
        let resolved = self.scopes.resolve();
        let _guard = self.locks.acquire(&resolved.scope).await;
        if resolved.authenticated {
            self.ensure_migrated(&resolved.scope)?;
        }
        let track = self.tracks_remote(&resolved);

        let cleared_at = if track {
            // The watermark must cover every version this device has seen.
            let newest_entry = self
                .local
                .fetch_all(&resolved.scope)?
                .iter()
                .map(|entry| entry.updated_at)
                .max();
            let newest_delete = self
                .local
                .pending_deletes(&resolved.scope)?
                .iter()
                .map(|pending| pending.deleted_at)
                .max();
            Some(
                self.clock
                    .now_ms()
                    .max(newest_entry.unwrap_or(i64::MIN))
                    .max(newest_delete.unwrap_or(i64::MIN)),
            )
        } else {
            None
        };
        self.local
            .apply_batch(&resolved.scope, &[LocalWrite::ClearScope { cleared_at }])?;
        info!(
            "event=entry_clear module=sync status=ok scope={} remote={}",
            resolved.scope, track
        );

        if track {
            self.dispatch(&resolved.scope, RemoteOp::DeleteAll);
        }
        Ok(())
    }

    /// Waits for queued remote writes of the active scope to finish.
    pub async fn flush_remote(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.flush(&self.scopes.resolve().scope).await;
        }
    }

    /// Time of the last pass that reached the remote for the active scope.
    pub fn last_synced_at(&self) -> SyncResult<Option<i64>> {
        let scope = self.scopes.resolve().scope;
        Ok(self.local.sync_state(&scope)?.last_sync_at)
    }

    /// Cancels queued and in-flight remote writes.
    pub async fn shutdown(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown().await;
        }
    }

    async fn reconcile_locked(&self, resolved: &ResolvedScope) -> SyncResult<ReconcileReport> {
        let scope = &resolved.scope;
        if !resolved.authenticated {
            return Ok(ReconcileReport::empty(scope, ReconcileOutcome::LocalOnly));
        }
        self.ensure_migrated(scope)?;
        let (Some(remote), Some(dispatcher)) = (&self.remote, &self.dispatcher) else {
            return Ok(ReconcileReport::empty(scope, ReconcileOutcome::LocalOnly));
        };

        let started_at = Instant::now();
        // One limit covers draining queued writes and the read.
        let remote_read = async {
            dispatcher.flush(scope).await;
            remote.fetch_all(scope).await
        };
        let remote_entries =
            match with_timeout(self.config.remote_timeout(), remote_read).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        "event=reconcile module=sync status=offline scope={} error_code={} error={}",
                        scope,
                        err.code(),
                        err
                    );
                    return Ok(ReconcileReport::empty(scope, ReconcileOutcome::Offline));
                }
            };

        let local_entries = self.local.fetch_all(scope)?;
        let pending_deletes = self.local.pending_deletes(scope)?;
        let state = self.local.sync_state(scope)?;
        let plan = plan_merge(
            &local_entries,
            &remote_entries,
            &pending_deletes,
            state.cleared_at,
        );

        let converged = plan.is_noop();
        let mut writes = plan.local_writes;
        writes.push(LocalWrite::MarkSynced(self.clock.now_ms()));
        self.local.apply_batch(scope, &writes)?;

        let mut report = ReconcileReport::empty(scope, ReconcileOutcome::Merged);
        report.pulled = plan.pulled;
        report.unchanged = plan.unchanged;
        for entry in plan.remote_puts {
            if dispatcher.enqueue(scope, RemoteOp::Put(entry)) {
                report.pushed += 1;
            } else {
                report.skipped += 1;
            }
        }
        for id in plan.remote_deletes {
            if dispatcher.enqueue(scope, RemoteOp::Delete(id)) {
                report.remote_deleted += 1;
            } else {
                report.skipped += 1;
            }
        }

        if converged {
            debug!(
                "event=reconcile module=sync status=converged scope={} unchanged={} duration_ms={}",
                scope,
                report.unchanged,
                started_at.elapsed().as_millis()
            );
        } else {
            info!(
                "event=reconcile module=sync status={} scope={} pulled={} pushed={} remote_deleted={} unchanged={} skipped={} duration_ms={}",
                report.outcome.as_str(),
                scope,
                report.pulled,
                report.pushed,
                report.remote_deleted,
                report.unchanged,
                report.skipped,
                started_at.elapsed().as_millis()
            );
        }
        Ok(report)
    }

    fn ensure_migrated(&self, scope: &ScopeId) -> SyncResult<()> {
        if self
            .migrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(scope)
        {
            return Ok(());
        }
        self.scopes
            .migrate_legacy_if_needed(scope, self.local.as_ref())?;
        self.migrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope.clone());
        Ok(())
    }

    fn tracks_remote(&self, resolved: &ResolvedScope) -> bool {
        resolved.authenticated && self.dispatcher.is_some()
    }

    fn dispatch(&self, scope: &ScopeId, op: RemoteOp) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.enqueue(scope, op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EntrySyncEngine;
    use crate::clock::ManualClock;
    use crate::config::SyncConfig;
    use crate::identity::SessionIdentity;
    use crate::model::entry::Entry;
    use crate::remote::{InMemoryRemoteStore, RemoteStats};
    use crate::repo::entry_repo::SqliteEntryRepository;
    use crate::sync::ReconcileOutcome;
    use std::sync::Arc;

    fn engine(session: Arc<SessionIdentity>) -> (EntrySyncEngine, Arc<InMemoryRemoteStore>) {
        let repo = Arc::new(SqliteEntryRepository::open_in_memory().expect("repo should open"));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let engine = EntrySyncEngine::new(repo, session, SyncConfig::default())
            .with_remote(remote.clone())
            .with_clock(Arc::new(ManualClock::new(1_000)));
        (engine, remote)
    }

    #[tokio::test]
    async fn anonymous_engine_never_contacts_remote() {
        let (engine, remote) = engine(Arc::new(SessionIdentity::anonymous()));

        engine
            .save(Entry::new(b"{}".to_vec(), 1_000))
            .await
            .expect("save should succeed");
        assert_eq!(engine.fetch_entries().await.expect("fetch").len(), 1);
        engine.delete_all().await.expect("clear should succeed");
        engine.flush_remote().await;

        assert_eq!(remote.stats(), RemoteStats::default());
        assert_eq!(
            engine.reconcile().await.expect("reconcile").outcome,
            ReconcileOutcome::LocalOnly
        );
    }

    #[tokio::test]
    async fn save_preserves_created_at_and_bumps_updated_at() {
        let (engine, _remote) = engine(Arc::new(SessionIdentity::signed_in("user-a")));
        let first = engine
            .save(Entry::new(b"v1".to_vec(), 500))
            .await
            .expect("save should succeed");
        assert_eq!(first.created_at, 500);
        assert_eq!(first.updated_at, 1_000);

        let mut edited = first.clone();
        edited.created_at = 900;
        edited.payload = b"v2".to_vec();
        let second = engine.save(edited).await.expect("resave should succeed");
        assert_eq!(second.created_at, 500);
        assert_eq!(second.updated_at, 1_001);
    }

    #[tokio::test]
    async fn delete_of_missing_id_succeeds() {
        let (engine, _remote) = engine(Arc::new(SessionIdentity::signed_in("user-a")));
        engine
            .delete(uuid::Uuid::new_v4())
            .await
            .expect("deleting an unknown id is not an error");
    }

    #[tokio::test]
    async fn invalid_entry_is_reported() {
        let (engine, _remote) = engine(Arc::new(SessionIdentity::anonymous()));
        let err = engine
            .save(Entry::new(Vec::new(), -5))
            .await
            .expect_err("negative created_at must be rejected");
        assert!(matches!(err, crate::sync::SyncError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn successful_pass_records_last_sync_time() {
        let (engine, _remote) = engine(Arc::new(SessionIdentity::signed_in("user-a")));
        assert_eq!(engine.last_synced_at().expect("state"), None);
        engine.fetch_entries().await.expect("fetch should succeed");
        assert_eq!(engine.last_synced_at().expect("state"), Some(1_000));
    }
}
