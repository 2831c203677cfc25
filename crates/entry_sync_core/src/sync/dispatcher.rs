//! Background dispatch of remote writes.
//!
//! # Responsibility
//! - Run fire-and-forget remote puts/deletes off the caller's path.
//! - Keep remote writes of one scope in submission order.
//!
//! # Invariants
//! - One bounded queue and one worker task per scope.
//! - A full queue drops the operation; the next reconciliation pass re-derives
//!   it from local state.
//! - Every remote call is bounded by the configured timeout; failures are
//!   logged and absorbed.

use crate::model::entry::{Entry, EntryId, ScopeId};
use crate::remote::{with_timeout, RemoteStore};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Remote mutation queued for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Put(Entry),
    Delete(EntryId),
    DeleteAll,
}

impl RemoteOp {
    fn kind(&self) -> &'static str {
        match self {
            Self::Put(_) => "put",
            Self::Delete(_) => "delete",
            Self::DeleteAll => "delete_all",
        }
    }
}

enum Job {
    Op(RemoteOp),
    Flush(oneshot::Sender<()>),
}

struct ScopeWorker {
    sender: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

pub struct RemoteDispatcher {
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    capacity: usize,
    workers: Mutex<HashMap<ScopeId, ScopeWorker>>,
    closed: AtomicBool,
}

impl RemoteDispatcher {
    pub fn new(remote: Arc<dyn RemoteStore>, timeout: Duration, capacity: usize) -> Self {
        Self {
            remote,
            timeout,
            capacity: capacity.max(1),
            workers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queues `op` without waiting. Returns `false` when it was dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, scope: &ScopeId, op: RemoteOp) -> bool {
        let kind = op.kind();
        if self.closed.load(Ordering::SeqCst) {
            debug!(
                "event=remote_dispatch module=sync status=dropped reason=shutdown scope={} op={}",
                scope, kind
            );
            return false;
        }
        match self.sender_for(scope).try_send(Job::Op(op)) {
            Ok(()) => {
                debug!(
                    "event=remote_dispatch module=sync status=queued scope={} op={}",
                    scope, kind
                );
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "event=remote_dispatch module=sync status=dropped reason=queue_full scope={} op={} capacity={}",
                    scope, kind, self.capacity
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    "event=remote_dispatch module=sync status=dropped reason=worker_stopped scope={} op={}",
                    scope, kind
                );
                false
            }
        }
    }

    /// Waits until every operation queued for `scope` before this call has
    /// finished (successfully or not).
    pub async fn flush(&self, scope: &ScopeId) {
        let Some(sender) = self.existing_sender(scope) else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if sender.send(Job::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Number of operations currently queued for `scope`.
    pub fn pending(&self, scope: &ScopeId) -> usize {
        self.existing_sender(scope)
            .map_or(0, |sender| sender.max_capacity() - sender.capacity())
    }

    /// Stops every worker. Queued and in-flight operations are cancelled; the
    /// next reconciliation pass re-issues whatever is still owed.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let workers: Vec<ScopeWorker> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain().map(|(_, worker)| worker).collect()
        };
        for worker in workers {
            drop(worker.sender);
            worker.task.abort();
            let _ = worker.task.await;
        }
        debug!("event=remote_dispatch module=sync status=shutdown");
    }

    fn sender_for(&self, scope: &ScopeId) -> mpsc::Sender<Job> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, worker| !worker.task.is_finished());
        if let Some(worker) = workers.get(scope) {
            return worker.sender.clone();
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let task = tokio::spawn(run_worker(
            scope.clone(),
            Arc::clone(&self.remote),
            self.timeout,
            receiver,
        ));
        workers.insert(
            scope.clone(),
            ScopeWorker {
                sender: sender.clone(),
                task,
            },
        );
        sender
    }

    fn existing_sender(&self, scope: &ScopeId) -> Option<mpsc::Sender<Job>> {
        let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers
            .get(scope)
            .filter(|worker| !worker.task.is_finished())
            .map(|worker| worker.sender.clone())
    }
}

impl Drop for RemoteDispatcher {
    fn drop(&mut self) {
        let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for worker in workers.values() {
            worker.task.abort();
        }
    }
}

async fn run_worker(
    scope: ScopeId,
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    mut receiver: mpsc::Receiver<Job>,
) {
    while let Some(job) = receiver.recv().await {
        match job {
            Job::Flush(done) => {
                let _ = done.send(());
            }
            Job::Op(op) => execute(&scope, remote.as_ref(), timeout, op).await,
        }
    }
}

async fn execute(scope: &ScopeId, remote: &dyn RemoteStore, timeout: Duration, op: RemoteOp) {
    let started_at = Instant::now();
    let result = match &op {
        RemoteOp::Put(entry) => with_timeout(timeout, remote.put(entry, scope)).await,
        RemoteOp::Delete(id) => with_timeout(timeout, remote.delete(*id, scope)).await,
        RemoteOp::DeleteAll => with_timeout(timeout, remote.delete_all_for_scope(scope))
            .await
            .map(|_| ()),
    };

    match result {
        Ok(()) => debug!(
            "event=remote_write module=sync status=ok scope={} op={} duration_ms={}",
            scope,
            op.kind(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event=remote_write module=sync status=error scope={} op={} duration_ms={} error_code={} retry=next_pass error={}",
            scope,
            op.kind(),
            started_at.elapsed().as_millis(),
            err.code(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{RemoteDispatcher, RemoteOp};
    use crate::model::entry::{Entry, ScopeId};
    use crate::remote::{InMemoryRemoteStore, RemoteStore};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn queued_writes_apply_in_order_after_flush() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let dispatcher = RemoteDispatcher::new(remote.clone(), Duration::from_secs(1), 8);
        let scope = ScopeId::new("user-a");
        let entry = Entry::new(b"x".to_vec(), 1).in_scope(&scope);

        assert!(dispatcher.enqueue(&scope, RemoteOp::Put(entry.clone())));
        assert!(dispatcher.enqueue(&scope, RemoteOp::Delete(entry.id)));
        assert!(dispatcher.enqueue(&scope, RemoteOp::Put(entry.clone())));
        dispatcher.flush(&scope).await;

        assert_eq!(dispatcher.pending(&scope), 0);
        let stored = remote.fetch_all(&scope).await.expect("fetch should succeed");
        assert_eq!(stored, vec![entry]);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set_latency(Duration::from_millis(200));
        let dispatcher = RemoteDispatcher::new(remote.clone(), Duration::from_secs(1), 1);
        let scope = ScopeId::new("user-a");

        let mut accepted = 0;
        for _ in 0..5 {
            if dispatcher.enqueue(&scope, RemoteOp::Put(Entry::new(Vec::new(), 1))) {
                accepted += 1;
            }
        }
        assert!(accepted < 5, "a capacity-1 queue cannot accept five writes at once");
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn failures_are_absorbed() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set_online(false);
        let dispatcher = RemoteDispatcher::new(remote.clone(), Duration::from_secs(1), 4);
        let scope = ScopeId::new("user-a");

        assert!(dispatcher.enqueue(&scope, RemoteOp::DeleteAll));
        dispatcher.flush(&scope).await;
        assert_eq!(remote.stats().clears, 0);
    }

    #[tokio::test]
    async fn flush_without_worker_returns_immediately() {
        let dispatcher =
            RemoteDispatcher::new(Arc::new(InMemoryRemoteStore::new()), Duration::from_secs(1), 4);
        dispatcher.flush(&ScopeId::new("nobody")).await;
        assert_eq!(dispatcher.pending(&ScopeId::new("nobody")), 0);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_rejected() {
        let dispatcher =
            RemoteDispatcher::new(Arc::new(InMemoryRemoteStore::new()), Duration::from_secs(1), 4);
        dispatcher.shutdown().await;
        assert!(!dispatcher.enqueue(&ScopeId::new("user-a"), RemoteOp::DeleteAll));
    }
}
