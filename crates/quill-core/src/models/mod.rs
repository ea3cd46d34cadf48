//! Data models for Quill

mod entry;
mod id;
mod message;
mod queue;
mod sync_status;

pub use entry::{
    EntryCategory, EntryChanges, EntryFilter, EntryPayload, EntryStatus, LocalEntry, NewEntry,
};
pub use id::LocalId;
pub use message::{
    LocalMessage, MessageChanges, MessageKind, MessagePayload, MessageRole, NewMessage,
};
pub use queue::{EntityKey, EntityType, Operation, QueueItem};
pub use sync_status::{SyncStatus, SyncSummary};
