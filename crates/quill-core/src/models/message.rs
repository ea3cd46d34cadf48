//! Conversation message model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{LocalId, SyncStatus};
use crate::error::Error;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(Error::InvalidInput(format!("unknown message role: {other}"))),
        }
    }
}

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain conversational text
    #[default]
    Text,
    /// Structured artifact rendered from the conversation
    Artifact,
    /// Lifecycle marker (session started, mode switched, ...)
    Event,
}

impl MessageKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Artifact => "artifact",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "artifact" => Ok(Self::Artifact),
            "event" => Ok(Self::Event),
            other => Err(Error::InvalidInput(format!("unknown message kind: {other}"))),
        }
    }
}

/// A message attached to an entry, as mirrored on this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMessage {
    /// Device-local identifier
    pub local_id: LocalId,
    /// Owning entry, by its local id (the entry may not be synced yet)
    pub entry_local_id: LocalId,
    /// Identifier assigned by the remote store on first successful sync
    pub server_id: Option<String>,
    /// Author role
    pub role: MessageRole,
    /// Content type tag
    pub kind: MessageKind,
    /// Text content
    pub content: String,
    /// Derived sync indicator
    pub sync_status: SyncStatus,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl LocalMessage {
    /// Create a new, not yet synced message under `entry_local_id`
    #[must_use]
    pub fn new(entry_local_id: LocalId, new_message: NewMessage) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            local_id: LocalId::new(),
            entry_local_id,
            server_id: None,
            role: new_message.role,
            kind: new_message.kind,
            content: new_message.content,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot of the creatable fields, sent with the `create` operation
    #[must_use]
    pub fn create_payload(&self) -> MessagePayload {
        MessagePayload {
            entry_local_id: Some(self.entry_local_id),
            role: Some(self.role),
            kind: Some(self.kind),
            content: Some(self.content.clone()),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }

    /// Merge `changes` into this message, returning the changed fields if any
    pub fn apply_changes(&mut self, changes: &MessageChanges, now: i64) -> Option<MessagePayload> {
        let mut payload = MessagePayload::default();

        if let Some(kind) = changes.kind.filter(|k| *k != self.kind) {
            self.kind = kind;
            payload.kind = Some(kind);
        }
        if let Some(content) = changes.content.as_ref().filter(|c| **c != self.content) {
            self.content.clone_from(content);
            payload.content = Some(content.clone());
        }

        if payload.kind.is_none() && payload.content.is_none() {
            return None;
        }

        self.updated_at = now.max(self.updated_at);
        self.sync_status = SyncStatus::Pending;
        payload.updated_at = Some(self.updated_at);
        Some(payload)
    }
}

/// Fields supplied when creating a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
}

impl NewMessage {
    /// A plain text message
    #[must_use]
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            kind: MessageKind::Text,
            content: content.into(),
        }
    }

    /// Override the content kind
    #[must_use]
    pub const fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Partial update for a message; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageChanges {
    pub kind: Option<MessageKind>,
    pub content: Option<String>,
}

impl MessageChanges {
    /// Replace the content
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Change the kind
    #[must_use]
    pub const fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Message fields carried by queued operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_local_id: Option<LocalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}
