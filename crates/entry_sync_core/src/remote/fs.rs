//! Directory-backed remote store.
//!
//! # Responsibility
//! - Mirror the remote collection layout on a shared directory:
//!   `<root>/users/<scope>/<collection>/<entry-id>.json`.
//! - Let several local stores ("devices") sync through one directory.
//!
//! # Invariants
//! - Documents are written to a temp file and renamed into place, so readers
//!   never observe a half-written document.
//! - Scopes that are not safe path segments are rejected.
//! - A staging file that never reached its final name is removed.

use super::{
    collection_path, decode_documents, is_safe_scope_segment, RemoteDocument, RemoteError,
    RemoteResult, RemoteStore,
};
use crate::model::entry::{Entry, EntryId, ScopeId};
use async_trait::async_trait;
use log::warn;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DOCUMENT_EXTENSION: &str = "json";

pub struct FsRemoteStore {
    root: PathBuf,
    collection: String,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            collection: collection.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, scope: &ScopeId) -> RemoteResult<PathBuf> {
        if !is_safe_scope_segment(scope) {
            return Err(RemoteError::Rejected(format!(
                "scope `{scope}` is not a valid collection segment"
            )));
        }
        Ok(self.root.join(collection_path(scope, &self.collection)))
    }

    async fn list_documents(&self, dir: &Path) -> RemoteResult<Vec<PathBuf>> {
        let mut reader = match tokio::fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(dir, &err)),
        };

        let mut paths = Vec::new();
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|err| io_error(dir, &err))?
        {
            let path = item.path();
            if is_document_path(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn read_documents(&self, dir: &Path) -> RemoteResult<Vec<RemoteDocument>> {
        let mut documents = Vec::new();
        for path in self.list_documents(dir).await? {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                // Removed by a concurrent clear between listing and reading.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error(&path, &err)),
            };
            match serde_json::from_slice::<RemoteDocument>(&raw) {
                Ok(document) => documents.push(document),
                Err(err) => warn!(
                    "event=remote_decode module=remote status=skipped path={} error={}",
                    path.display(),
                    err
                ),
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl RemoteStore for FsRemoteStore {
    async fn fetch_all(&self, scope: &ScopeId) -> RemoteResult<Vec<Entry>> {
        let dir = self.collection_dir(scope)?;
        let documents = self.read_documents(&dir).await?;
        Ok(decode_documents(scope, documents.iter()))
    }

    async fn put(&self, entry: &Entry, scope: &ScopeId) -> RemoteResult<()> {
        let dir = self.collection_dir(scope)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| io_error(&dir, &err))?;

        let body = serde_json::to_vec_pretty(&RemoteDocument::from_entry(entry))
            .map_err(|err| RemoteError::Rejected(err.to_string()))?;
        let target = dir.join(document_file_name(entry.id));
        let staging = StagingFile::new(dir.join(format!(
            ".{}.{}.tmp",
            entry.id,
            Uuid::new_v4()
        )));

        tokio::fs::write(staging.path(), body)
            .await
            .map_err(|err| io_error(staging.path(), &err))?;
        tokio::fs::rename(staging.path(), &target)
            .await
            .map_err(|err| io_error(&target, &err))?;
        staging.persisted();
        Ok(())
    }

    async fn delete(&self, id: EntryId, scope: &ScopeId) -> RemoteResult<()> {
        let path = self.collection_dir(scope)?.join(document_file_name(id));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&path, &err)),
        }
    }

    async fn delete_all_for_scope(&self, scope: &ScopeId) -> RemoteResult<usize> {
        let dir = self.collection_dir(scope)?;
        let mut removed = 0;
        for path in self.list_documents(&dir).await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_error(&path, &err)),
            }
        }
        Ok(removed)
    }
}

/// Staging path of an in-progress `put`.
///
/// Removed on drop unless the rename landed, so failed writes and calls
/// cancelled by a timeout leave no hidden `.tmp` files behind.
struct StagingFile {
    path: PathBuf,
    armed: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persisted(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "event=remote_write module=remote status=cleanup_failed path={} error={}",
                self.path.display(),
                err
            ),
        }
    }
}

fn document_file_name(id: EntryId) -> String {
    format!("{id}.{DOCUMENT_EXTENSION}")
}

fn is_document_path(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));
    !hidden && path.extension().and_then(|ext| ext.to_str()) == Some(DOCUMENT_EXTENSION)
}

fn io_error(path: &Path, err: &std::io::Error) -> RemoteError {
    RemoteError::Unavailable(format!("{}: {err}", path.display()))
}
