//! Domain model for synchronized health-log entries.
//!
//! # Responsibility
//! - Define the canonical entry shape used by local and remote stores.
//! - Define the application payload carried opaquely inside entries.
//!
//! # Invariants
//! - Every entry is identified by a stable `EntryId` within its scope.
//! - Deletion is a hard delete; pending remote deletes are tracked by the
//!   repository, not the model.

pub mod entry;
pub mod symptom;
