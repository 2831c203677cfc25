//! Per-scope serialization of engine operations.

use crate::model::entry::ScopeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per scope. Same-scope callers queue; other scopes proceed.
#[derive(Default)]
pub struct ScopeLocks {
    locks: Mutex<HashMap<ScopeId, Arc<AsyncMutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `scope`; released when the guard drops.
    ///
    /// Locks nobody holds or waits on are evicted here, so the map only keeps
    /// scopes that are in use.
    pub async fn acquire(&self, scope: &ScopeId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(scope.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of scopes currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::ScopeLocks;
    use crate::model::entry::ScopeId;
    use std::time::Duration;

    #[tokio::test]
    async fn same_scope_is_exclusive_and_other_scopes_are_not() {
        let locks = ScopeLocks::new();
        let scope_a = ScopeId::new("user-a");

        let held = locks.acquire(&scope_a).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&scope_a)).await;
        assert!(blocked.is_err(), "second acquire on the same scope must wait");

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&ScopeId::new("user-b")),
        )
        .await;
        assert!(other.is_ok(), "a different scope must not wait");

        drop(held);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&scope_a)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn idle_scopes_are_evicted() {
        let locks = ScopeLocks::new();
        let held = locks.acquire(&ScopeId::new("user-a")).await;
        for user in ["user-b", "user-c", "user-d"] {
            drop(locks.acquire(&ScopeId::new(user)).await);
        }

        // Only the held scope and the one just acquired survive.
        drop(locks.acquire(&ScopeId::new("user-e")).await);
        assert_eq!(locks.tracked(), 2);
        drop(held);
    }
}
