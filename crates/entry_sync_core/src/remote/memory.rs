//! In-process remote store.
//!
//! Stores wire documents per scope so the base64 encoding path is exercised
//! exactly like a networked backend. Connectivity and latency can be
//! switched at runtime to simulate offline devices and slow links.

use super::{decode_documents, RemoteDocument, RemoteError, RemoteResult, RemoteStore};
use crate::model::entry::{Entry, EntryId, ScopeId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Counters of remote calls that reached the store while online.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStats {
    pub fetches: usize,
    pub puts: usize,
    pub deletes: usize,
    pub clears: usize,
}

pub struct InMemoryRemoteStore {
    collections: RwLock<HashMap<ScopeId, BTreeMap<String, RemoteDocument>>>,
    online: AtomicBool,
    latency_ms: AtomicU64,
    fetches: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    clears: AtomicUsize,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            fetches: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    /// Toggles connectivity; offline calls fail with `Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delays every call by `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Writes a document directly, bypassing connectivity. Models a write
    /// made by another device.
    pub async fn insert_document(&self, scope: &ScopeId, document: RemoteDocument) {
        self.collections
            .write()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(document.id.clone(), document);
    }

    /// Snapshot of the raw documents of `scope`, ordered by id.
    pub async fn documents(&self, scope: &ScopeId) -> Vec<RemoteDocument> {
        self.collections
            .read()
            .await
            .get(scope)
            .map(|collection| collection.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the decoded entries of `scope`, bypassing connectivity.
    pub async fn entries(&self, scope: &ScopeId) -> Vec<Entry> {
        let documents = self.documents(scope).await;
        decode_documents(scope, documents.iter())
    }

    pub fn stats(&self) -> RemoteStats {
        RemoteStats {
            fetches: self.fetches.load(Ordering::SeqCst),
            puts: self.puts.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            clears: self.clears.load(Ordering::SeqCst),
        }
    }

    async fn gate(&self) -> RemoteResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("remote store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn fetch_all(&self, scope: &ScopeId) -> RemoteResult<Vec<Entry>> {
        self.gate().await?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries(scope).await)
    }

    async fn put(&self, entry: &Entry, scope: &ScopeId) -> RemoteResult<()> {
        self.gate().await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert_document(scope, RemoteDocument::from_entry(entry))
            .await;
        Ok(())
    }

    async fn delete(&self, id: EntryId, scope: &ScopeId) -> RemoteResult<()> {
        self.gate().await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Some(collection) = self.collections.write().await.get_mut(scope) {
            collection.remove(&id.to_string());
        }
        Ok(())
    }

    async fn delete_all_for_scope(&self, scope: &ScopeId) -> RemoteResult<usize> {
        self.gate().await?;
        self.clears.fetch_add(1, Ordering::SeqCst);
        let removed = self
            .collections
            .write()
            .await
            .remove(scope)
            .map_or(0, |collection| collection.len());
        Ok(removed)
    }
}
