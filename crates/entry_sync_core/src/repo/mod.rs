//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the local store contract consumed by the sync engine.
//! - Isolate SQLite query details from reconciliation logic.
//!
//! # Invariants
//! - Repository writes validate entries before persistence.
//! - Deleting an absent entry is not an error.

pub mod entry_repo;
