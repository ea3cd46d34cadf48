//! Journal entry model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::{LocalId, SyncStatus};
use crate::error::Error;
use crate::util::normalize_text_option;

/// What kind of journal an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryCategory {
    /// Free-form notebook page
    Notebook,
    /// Daily journal
    Journal,
    /// Planning session
    Plan,
    /// Reflection on past entries
    Reflection,
}

impl EntryCategory {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notebook => "notebook",
            Self::Journal => "journal",
            Self::Plan => "plan",
            Self::Reflection => "reflection",
        }
    }
}

impl fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notebook" => Ok(Self::Notebook),
            "journal" => Ok(Self::Journal),
            "plan" => Ok(Self::Plan),
            "reflection" => Ok(Self::Reflection),
            other => Err(Error::InvalidInput(format!("unknown entry category: {other}"))),
        }
    }
}

/// Lifecycle status of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Visible and editable
    #[default]
    Active,
    /// Hidden from default listings
    Archived,
}

impl EntryStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(Error::InvalidInput(format!("unknown entry status: {other}"))),
        }
    }
}

/// A journal entry as mirrored on this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Device-local identifier
    pub local_id: LocalId,
    /// Identifier assigned by the remote store on first successful sync
    pub server_id: Option<String>,
    /// Owner of the entry
    pub owner_id: String,
    /// Journal category
    pub category: EntryCategory,
    /// Lifecycle status
    pub status: EntryStatus,
    /// Optional display title
    pub title: Option<String>,
    /// Free-form metadata
    pub metadata: Map<String, Value>,
    /// Derived sync indicator
    pub sync_status: SyncStatus,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl LocalEntry {
    /// Create a new, not yet synced entry
    #[must_use]
    pub fn new(owner_id: impl Into<String>, new_entry: NewEntry) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            local_id: LocalId::new(),
            server_id: None,
            owner_id: owner_id.into(),
            category: new_entry.category,
            status: EntryStatus::Active,
            title: normalize_text_option(new_entry.title),
            metadata: new_entry.metadata,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot of the creatable fields, sent with the `create` operation
    #[must_use]
    pub fn create_payload(&self) -> EntryPayload {
        EntryPayload {
            owner_id: Some(self.owner_id.clone()),
            category: Some(self.category),
            status: Some(self.status),
            title: self.title.clone(),
            metadata: Some(self.metadata.clone()),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }

    /// Merge `changes` into this entry.
    ///
    /// Returns the partial payload of fields that actually changed, or `None`
    /// when the change set leaves the entry as it was.
    pub fn apply_changes(&mut self, changes: &EntryChanges, now: i64) -> Option<EntryPayload> {
        let mut payload = EntryPayload::default();

        if let Some(category) = changes.category.filter(|c| *c != self.category) {
            self.category = category;
            payload.category = Some(category);
        }
        if let Some(status) = changes.status.filter(|s| *s != self.status) {
            self.status = status;
            payload.status = Some(status);
        }
        if let Some(title) = changes.title.as_ref() {
            let title = normalize_text_option(Some(title.clone()));
            if title != self.title {
                payload.title = Some(title.clone().unwrap_or_default());
                self.title = title;
            }
        }
        if let Some(metadata) = changes.metadata.as_ref().filter(|m| **m != self.metadata) {
            self.metadata.clone_from(metadata);
            payload.metadata = Some(metadata.clone());
        }

        if payload.is_empty() {
            return None;
        }

        self.updated_at = now.max(self.updated_at);
        self.sync_status = SyncStatus::Pending;
        payload.updated_at = Some(self.updated_at);
        Some(payload)
    }
}

/// Fields supplied when creating an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Journal category
    pub category: EntryCategory,
    /// Optional title
    pub title: Option<String>,
    /// Initial metadata
    pub metadata: Map<String, Value>,
}

impl NewEntry {
    /// Minimal entry of the given category
    #[must_use]
    pub fn new(category: EntryCategory) -> Self {
        Self {
            category,
            title: None,
            metadata: Map::new(),
        }
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Attach initial metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl From<EntryCategory> for NewEntry {
    fn from(category: EntryCategory) -> Self {
        Self::new(category)
    }
}

/// Partial update for an entry; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryChanges {
    /// New category
    pub category: Option<EntryCategory>,
    /// New status
    pub status: Option<EntryStatus>,
    /// New title; blank clears it
    pub title: Option<String>,
    /// Replacement metadata map
    pub metadata: Option<Map<String, Value>>,
}

impl EntryChanges {
    /// Change the category
    #[must_use]
    pub const fn category(mut self, category: EntryCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Change the status
    #[must_use]
    pub const fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Change the title; a blank title clears it
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Replace the metadata map
    #[must_use]
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Listing filter for entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Only entries of this category
    pub category: Option<EntryCategory>,
    /// Only entries with this status
    pub status: Option<EntryStatus>,
    /// Only entries with this sync status
    pub sync_status: Option<SyncStatus>,
    /// Maximum number of entries returned
    pub limit: Option<usize>,
}

impl EntryFilter {
    /// Filter on category
    #[must_use]
    pub const fn category(mut self, category: EntryCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Filter on status
    #[must_use]
    pub const fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter on sync status
    #[must_use]
    pub const fn sync_status(mut self, sync_status: SyncStatus) -> Self {
        self.sync_status = Some(sync_status);
        self
    }

    /// Cap the number of results
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Entry fields carried by queued operations.
///
/// A `create` carries every field; an `update` carries only the fields that
/// changed plus `updatedAt`. An empty `title` in an update clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<EntryCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl EntryPayload {
    fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.status.is_none()
            && self.title.is_none()
            && self.metadata.is_none()
    }
}
