//! Append-only vote store over SQLite or MySQL.
//!
//! Every store owns one connection and one worker task. Operations are queued
//! to the worker and run strictly in submission order. Records are never
//! updated in place: only insert, bulk wipe, and copy-out by migration.

pub mod backend;
pub mod error;
pub mod migrate;
pub mod store;
pub mod types;

pub use backend::BackendSettings;
pub use error::{StoreError, StoreResult};
pub use migrate::{migrate, migrate_between, MigrationOutcome};
pub use store::EventStore;
pub use types::{NewVote, StoredVote};
