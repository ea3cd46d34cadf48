//! Offline-first synchronization engine.
//!
//! Local mutations are queued by [`crate::store::LocalStore`]; this module
//! pushes them to a [`RemoteStore`], pulls remote changes back, and
//! coordinates when either happens.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod memory;
pub mod pull;
pub mod push;
pub mod schedule;
pub mod transport;
pub mod wire;

pub use config::{RetryPolicy, SyncConfig};
pub use coordinator::{
    Command, Connectivity, CoordinatorState, DrainReport, Phase, SyncCoordinator, SyncEvent,
    SyncStats,
};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteLedger};
pub use pull::{MergeDecision, PullReconciler, PullReport, SkipReason};
pub use push::{PushReconciler, PushReport};
pub use schedule::PendingIndex;
pub use transport::RemoteStore;
pub use wire::{ApplyResult, PullRequest, PullResponse, RemoteEntry, RemoteMessage, WireOperation};
