//! In-memory remote store.
//!
//! [`RemoteLedger`] holds the authoritative records and implements the apply
//! and pull contract; the reference server wraps it behind HTTP and
//! [`MemoryRemote`] wraps it directly for tests and offline demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use super::transport::RemoteStore;
use super::wire::{
    ApplyResult, PullRequest, PullResponse, RemoteEntry, RemoteMessage, WireOperation,
};
use crate::models::{EntityType, EntryPayload, LocalId, MessagePayload, Operation};
use crate::util::{normalize_text_option, now_millis};

/// Authoritative record set, keyed by client local id.
///
/// Every applied change is stamped with a ledger revision taken from the
/// ledger's own clock, so pulls never depend on client timestamps.
#[derive(Debug, Clone, Default)]
pub struct RemoteLedger {
    entries: BTreeMap<LocalId, RemoteEntry>,
    messages: BTreeMap<LocalId, RemoteMessage>,
    clock: i64,
}

impl RemoteLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply operations in order, one result per operation.
    pub fn apply(&mut self, operations: &[WireOperation]) -> Vec<ApplyResult> {
        operations
            .iter()
            .map(|op| match self.apply_one(op) {
                Ok(server_id) => ApplyResult::ok(op.local_id, server_id),
                Err(error) => ApplyResult::rejected(op.local_id, error),
            })
            .collect()
    }

    fn apply_one(&mut self, op: &WireOperation) -> Result<Option<String>, String> {
        match op.entity_type {
            EntityType::Entry => {
                let payload: EntryPayload = serde_json::from_value(op.payload.clone())
                    .map_err(|e| format!("invalid entry payload: {e}"))?;
                match op.operation {
                    Operation::Create => self.create_entry(op.local_id, payload),
                    Operation::Update => self.update_entry(op.local_id, &payload),
                    Operation::Delete => Ok(self.delete_entry(op.local_id)),
                }
            }
            EntityType::Message => {
                let payload: MessagePayload = serde_json::from_value(op.payload.clone())
                    .map_err(|e| format!("invalid message payload: {e}"))?;
                match op.operation {
                    Operation::Create => self.create_message(op.local_id, payload),
                    Operation::Update => self.update_message(op.local_id, &payload),
                    Operation::Delete => Ok(self.delete_message(op.local_id)),
                }
            }
        }
    }

    fn create_entry(
        &mut self,
        local_id: LocalId,
        payload: EntryPayload,
    ) -> Result<Option<String>, String> {
        if let Some(existing) = self.entries.get(&local_id) {
            return Ok(Some(existing.server_id.clone()));
        }

        let owner_id = payload.owner_id.ok_or("create entry requires ownerId")?;
        let category = payload.category.ok_or("create entry requires category")?;
        let now = now_millis();
        let created_at = payload.created_at.unwrap_or(now);
        let revision = tick(&mut self.clock);
        let entry = RemoteEntry {
            server_id: new_server_id(),
            local_id,
            owner_id,
            category,
            status: payload.status.unwrap_or_default(),
            title: normalize_text_option(payload.title),
            metadata: payload.metadata.unwrap_or_default(),
            created_at,
            updated_at: payload.updated_at.unwrap_or(created_at),
            revision,
            deleted: false,
        };

        let server_id = entry.server_id.clone();
        self.entries.insert(local_id, entry);
        Ok(Some(server_id))
    }

    fn update_entry(
        &mut self,
        local_id: LocalId,
        payload: &EntryPayload,
    ) -> Result<Option<String>, String> {
        let entry = self
            .entries
            .get_mut(&local_id)
            .ok_or_else(|| format!("unknown entry {local_id}"))?;
        if entry.deleted {
            return Ok(Some(entry.server_id.clone()));
        }

        if let Some(category) = payload.category {
            entry.category = category;
        }
        if let Some(status) = payload.status {
            entry.status = status;
        }
        if let Some(title) = &payload.title {
            entry.title = normalize_text_option(Some(title.clone()));
        }
        if let Some(metadata) = &payload.metadata {
            entry.metadata.clone_from(metadata);
        }
        entry.updated_at = payload.updated_at.unwrap_or_else(now_millis).max(entry.updated_at);
        entry.revision = tick(&mut self.clock);
        Ok(Some(entry.server_id.clone()))
    }

    fn delete_entry(&mut self, local_id: LocalId) -> Option<String> {
        let entry = self.entries.get_mut(&local_id)?;
        if !entry.deleted {
            let now = now_millis().max(entry.updated_at + 1);
            entry.deleted = true;
            entry.updated_at = now;
            entry.revision = tick(&mut self.clock);
            for message in self
                .messages
                .values_mut()
                .filter(|m| m.entry_local_id == local_id && !m.deleted)
            {
                message.deleted = true;
                message.updated_at = now.max(message.updated_at + 1);
                message.revision = tick(&mut self.clock);
            }
        }
        Some(entry.server_id.clone())
    }

    fn create_message(
        &mut self,
        local_id: LocalId,
        payload: MessagePayload,
    ) -> Result<Option<String>, String> {
        if let Some(existing) = self.messages.get(&local_id) {
            return Ok(Some(existing.server_id.clone()));
        }

        let entry_local_id = payload
            .entry_local_id
            .ok_or("create message requires entryLocalId")?;
        // A create under a deleted entry is recorded as already deleted.
        let parent_deleted = match self.entries.get(&entry_local_id) {
            Some(entry) => entry.deleted,
            None => return Err(format!("unknown entry {entry_local_id}")),
        };
        let role = payload.role.ok_or("create message requires role")?;
        let now = now_millis();
        let created_at = payload.created_at.unwrap_or(now);
        let message = RemoteMessage {
            server_id: new_server_id(),
            local_id,
            entry_local_id,
            role,
            kind: payload.kind.unwrap_or_default(),
            content: payload.content.unwrap_or_default(),
            created_at,
            updated_at: payload.updated_at.unwrap_or(created_at),
            revision: tick(&mut self.clock),
            deleted: parent_deleted,
        };

        let server_id = message.server_id.clone();
        self.messages.insert(local_id, message);
        Ok(Some(server_id))
    }

    fn update_message(
        &mut self,
        local_id: LocalId,
        payload: &MessagePayload,
    ) -> Result<Option<String>, String> {
        let message = self
            .messages
            .get_mut(&local_id)
            .ok_or_else(|| format!("unknown message {local_id}"))?;
        if message.deleted {
            return Ok(Some(message.server_id.clone()));
        }

        if let Some(kind) = payload.kind {
            message.kind = kind;
        }
        if let Some(content) = &payload.content {
            message.content.clone_from(content);
        }
        message.updated_at = payload
            .updated_at
            .unwrap_or_else(now_millis)
            .max(message.updated_at);
        message.revision = tick(&mut self.clock);
        Ok(Some(message.server_id.clone()))
    }

    fn delete_message(&mut self, local_id: LocalId) -> Option<String> {
        let message = self.messages.get_mut(&local_id)?;
        if !message.deleted {
            message.deleted = true;
            message.updated_at = now_millis().max(message.updated_at + 1);
            message.revision = tick(&mut self.clock);
        }
        Some(message.server_id.clone())
    }

    /// Every record of the owner with a revision after `request.since`.
    pub fn pull(&self, request: &PullRequest) -> PullResponse {
        let changed = |revision: i64| request.since.map_or(true, |since| revision > since);

        let entries: Vec<RemoteEntry> = self
            .entries
            .values()
            .filter(|e| e.owner_id == request.owner_id && changed(e.revision))
            .cloned()
            .collect();
        let messages = self
            .messages
            .values()
            .filter(|m| changed(m.revision))
            .filter(|m| {
                self.entries
                    .get(&m.entry_local_id)
                    .is_some_and(|e| e.owner_id == request.owner_id)
            })
            .cloned()
            .collect();

        PullResponse {
            entries,
            messages,
            synced_at: now_millis(),
        }
    }

    /// Look up an entry, tombstones included
    pub fn entry(&self, local_id: &LocalId) -> Option<&RemoteEntry> {
        self.entries.get(local_id)
    }

    /// Look up a message, tombstones included
    pub fn message(&self, local_id: &LocalId) -> Option<&RemoteMessage> {
        self.messages.get(local_id)
    }

    /// Number of entries that are not deleted
    pub fn live_entry_count(&self) -> usize {
        self.entries.values().filter(|e| !e.deleted).count()
    }

    /// Number of messages that are not deleted
    pub fn live_message_count(&self) -> usize {
        self.messages.values().filter(|m| !m.deleted).count()
    }

    /// Write an entry directly, as another device's sync would; restamps its revision
    pub fn put_entry(&mut self, mut entry: RemoteEntry) {
        entry.revision = tick(&mut self.clock);
        self.entries.insert(entry.local_id, entry);
    }

    /// Write a message directly, as another device's sync would; restamps its revision
    pub fn put_message(&mut self, mut message: RemoteMessage) {
        message.revision = tick(&mut self.clock);
        self.messages.insert(message.local_id, message);
    }
}

fn new_server_id() -> String {
    Uuid::now_v7().to_string()
}

/// Next ledger revision: wall-clock millis, strictly increasing.
fn tick(clock: &mut i64) -> i64 {
    *clock = now_millis().max(*clock + 1);
    *clock
}

/// [`RemoteStore`] over a shared [`RemoteLedger`], with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    ledger: Arc<Mutex<RemoteLedger>>,
    faults: Arc<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    offline: AtomicBool,
    truncate_results: AtomicBool,
    rejections: Mutex<HashMap<LocalId, String>>,
    latency: Mutex<Option<Duration>>,
    apply_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl MemoryRemote {
    /// Create a remote over an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the ledger
    pub fn with_ledger<T>(&self, f: impl FnOnce(&mut RemoteLedger) -> T) -> T {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut ledger)
    }

    /// Make every request fail with a retryable transport error
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop the last result of every apply response
    pub fn set_truncate_results(&self, truncate: bool) {
        self.faults.truncate_results.store(truncate, Ordering::SeqCst);
    }

    /// Delay every request by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self
            .faults
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Reject every operation on `local_id` with `error`
    pub fn reject(&self, local_id: LocalId, error: impl Into<String>) {
        self.faults
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local_id, error.into());
    }

    /// Stop rejecting operations on `local_id`
    pub fn accept(&self, local_id: &LocalId) {
        self.faults
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(local_id);
    }

    /// Apply requests received so far
    pub fn apply_calls(&self) -> usize {
        self.faults.apply_calls.load(Ordering::SeqCst)
    }

    /// Pull requests received so far
    pub fn pull_calls(&self) -> usize {
        self.faults.pull_calls.load(Ordering::SeqCst)
    }

    async fn before_request(&self) -> SyncResult<()> {
        let latency = *self
            .faults
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("remote store unreachable"));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    async fn apply(&self, operations: &[WireOperation]) -> SyncResult<Vec<ApplyResult>> {
        self.faults.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.before_request().await?;

        let rejections = self
            .faults
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut results = self.with_ledger(|ledger| {
            operations
                .iter()
                .map(|op| match rejections.get(&op.local_id) {
                    Some(error) => ApplyResult::rejected(op.local_id, error.clone()),
                    None => ledger
                        .apply(std::slice::from_ref(op))
                        .pop()
                        .unwrap_or_else(|| ApplyResult::rejected(op.local_id, "no result")),
                })
                .collect::<Vec<_>>()
        });

        if self.faults.truncate_results.load(Ordering::SeqCst) {
            results.pop();
        }
        Ok(results)
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.faults.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.before_request().await?;
        Ok(self.with_ledger(|ledger| ledger.pull(request)))
    }
}
