//! Identity scope resolution and legacy record migration.
//!
//! # Responsibility
//! - Map the currently signed-in identity to a partition key.
//! - Move pre-partition (legacy) local records into the first real scope.
//!
//! # Invariants
//! - Scope is recomputed on every call; sign-in/out takes effect on the next
//!   operation.
//! - The anonymous scope never receives legacy records.
//! - Migration never touches already-scoped records.

use crate::model::entry::ScopeId;
use crate::repo::entry_repo::{EntryRepository, LegacyMigration, RepoResult};
use std::sync::{Arc, PoisonError, RwLock};

/// Source of the authenticated user identity.
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in user id, or `None` when nobody is signed in.
    fn current_identity(&self) -> Option<String>;
}

/// In-process session identity with explicit sign-in/out.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<String>>,
}

impl SessionIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Some(user_id.into())),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.into());
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_identity(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Scope an operation runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub scope: ScopeId,
    /// `true` when the scope comes from a signed-in identity; only then is
    /// the remote store contacted.
    pub authenticated: bool,
}

/// Computes partition keys from an injected identity provider.
#[derive(Clone)]
pub struct ScopeResolver {
    provider: Arc<dyn IdentityProvider>,
    anonymous: ScopeId,
}

impl ScopeResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>, anonymous_scope: impl Into<String>) -> Self {
        Self {
            provider,
            anonymous: ScopeId::new(anonymous_scope),
        }
    }

    pub fn anonymous_scope(&self) -> &ScopeId {
        &self.anonymous
    }

    /// Resolves the active scope. Blank identities count as signed out.
    pub fn resolve(&self) -> ResolvedScope {
        match self.provider.current_identity() {
            Some(identity) if !identity.trim().is_empty() => ResolvedScope {
                scope: ScopeId::new(identity.trim()),
                authenticated: true,
            },
            _ => ResolvedScope {
                scope: self.anonymous.clone(),
                authenticated: false,
            },
        }
    }

    /// Assigns legacy records to `target` unless it is the anonymous scope.
    pub fn migrate_legacy_if_needed(
        &self,
        target: &ScopeId,
        repo: &dyn EntryRepository,
    ) -> RepoResult<LegacyMigration> {
        if *target == self.anonymous {
            return Ok(LegacyMigration::default());
        }
        repo.migrate_legacy(target)
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityProvider, ScopeResolver, SessionIdentity};
    use crate::model::entry::{Entry, ScopeId};
    use crate::repo::entry_repo::{EntryRepository, SqliteEntryRepository};
    use std::sync::Arc;

    #[test]
    fn resolve_tracks_sign_in_and_out() {
        let session = Arc::new(SessionIdentity::anonymous());
        let resolver = ScopeResolver::new(session.clone(), "guest");

        let resolved = resolver.resolve();
        assert_eq!(resolved.scope.as_str(), "guest");
        assert!(!resolved.authenticated);

        session.sign_in("user-a");
        let resolved = resolver.resolve();
        assert_eq!(resolved.scope.as_str(), "user-a");
        assert!(resolved.authenticated);

        session.sign_out();
        assert!(!resolver.resolve().authenticated);
    }

    #[test]
    fn blank_identity_resolves_to_anonymous() {
        let session = Arc::new(SessionIdentity::signed_in("   "));
        assert_eq!(session.current_identity().as_deref(), Some("   "));
        let resolver = ScopeResolver::new(session, "guest");
        assert_eq!(resolver.resolve().scope.as_str(), "guest");
    }

    #[test]
    fn anonymous_scope_never_absorbs_legacy_records() {
        let repo = SqliteEntryRepository::open_in_memory().expect("repo should open");
        repo.insert_legacy(&Entry::new(b"{}".to_vec(), 10))
            .expect("legacy insert should succeed");

        let resolver = ScopeResolver::new(Arc::new(SessionIdentity::anonymous()), "guest");
        let outcome = resolver
            .migrate_legacy_if_needed(&ScopeId::new("guest"), &repo)
            .expect("migration should succeed");
        assert_eq!(outcome.migrated, 0);
        assert_eq!(repo.legacy_count().expect("count should succeed"), 1);

        let outcome = resolver
            .migrate_legacy_if_needed(&ScopeId::new("user-a"), &repo)
            .expect("migration should succeed");
        assert_eq!(outcome.migrated, 1);
        assert_eq!(repo.legacy_count().expect("count should succeed"), 0);
    }
}
