//! quill-core - Core library for Quill
//!
//! Offline-first journal storage: entries and their messages live in a local
//! SQLite store, every mutation is queued, and the sync engine pushes the
//! queue to a remote store and pulls remote changes back.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    EntityKey, EntityType, LocalEntry, LocalId, LocalMessage, Operation, QueueItem, SyncStatus,
    SyncSummary,
};
pub use store::LocalStore;
