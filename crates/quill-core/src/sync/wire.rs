//! JSON shapes exchanged with the remote store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{
    EntityType, EntryCategory, EntryStatus, LocalId, MessageKind, MessageRole, Operation,
    QueueItem,
};

/// One queued operation as sent to the apply endpoint.
///
/// Carries no server id; the remote resolves entities by `localId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    pub operation: Operation,
    pub entity_type: EntityType,
    pub local_id: LocalId,
    #[serde(default)]
    pub payload: Value,
}

impl From<&QueueItem> for WireOperation {
    fn from(item: &QueueItem) -> Self {
        Self {
            operation: item.operation,
            entity_type: item.entity_type,
            local_id: item.local_id,
            payload: item.payload.clone(),
        }
    }
}

/// Outcome of one operation, positionally aligned with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub local_id: LocalId,
    #[serde(default)]
    pub server_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyResult {
    /// A successful result
    pub fn ok(local_id: LocalId, server_id: Option<String>) -> Self {
        Self {
            local_id,
            server_id,
            success: true,
            error: None,
        }
    }

    /// A rejected result
    pub fn rejected(local_id: LocalId, error: impl Into<String>) -> Self {
        Self {
            local_id,
            server_id: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Body of the pull endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Only records with `revision` strictly greater; absent on first pull
    #[serde(default)]
    pub since: Option<i64>,
    pub owner_id: String,
}

/// Remote changes since a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub entries: Vec<RemoteEntry>,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
    /// Remote clock when the response was produced
    pub synced_at: i64,
}

impl PullResponse {
    /// Highest `revision` among the returned records; the next cursor
    pub fn max_revision(&self) -> Option<i64> {
        self.entries
            .iter()
            .map(|e| e.revision)
            .chain(self.messages.iter().map(|m| m.revision))
            .max()
    }

    /// Total number of returned records
    pub fn len(&self) -> usize {
        self.entries.len() + self.messages.len()
    }

    /// True when nothing changed remotely
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An entry as held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub server_id: String,
    pub local_id: LocalId,
    pub owner_id: String,
    pub category: EntryCategory,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: i64,
    /// Client edit time, compared for last-write-wins
    pub updated_at: i64,
    /// Remote-assigned change stamp, strictly increasing across the store
    pub revision: i64,
    /// Tombstone: the entry was deleted remotely
    #[serde(default)]
    pub deleted: bool,
}

/// A message as held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub server_id: String,
    pub local_id: LocalId,
    pub entry_local_id: LocalId,
    pub role: MessageRole,
    #[serde(default)]
    pub kind: MessageKind,
    pub content: String,
    pub created_at: i64,
    /// Client edit time, compared for last-write-wins
    pub updated_at: i64,
    /// Remote-assigned change stamp, strictly increasing across the store
    pub revision: i64,
    /// Tombstone: the message was deleted remotely
    #[serde(default)]
    pub deleted: bool,
}
