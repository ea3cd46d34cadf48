//! Durable local store shared by the UI and the sync engine.
//!
//! Every mutation writes the entity row and its queue item in one `SQLite`
//! transaction, so a crash leaves either both or neither.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Transaction;
use serde_json::{json, Value};

use crate::db::{
    Database, EntryRepository, MessageRepository, QueueRepository, StateRepository,
    StatusRepository,
};
use crate::models::{
    EntityKey, EntityType, EntryChanges, EntryFilter, LocalEntry, LocalId, LocalMessage,
    MessageChanges, NewEntry, NewMessage, Operation, QueueItem, SyncStatus, SyncSummary,
};
use crate::sync::RetryPolicy;
use crate::util::now_millis;
use crate::{Error, Result};

/// Thread-safe handle to the on-device store.
///
/// Clones share one connection; every write is serialised through it.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    retry: RetryPolicy,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?, retry))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory(retry: RetryPolicy) -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?, retry))
    }

    /// Wrap an already opened database.
    pub fn from_database(db: Database, retry: RetryPolicy) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            retry,
        }
    }

    /// Retry policy used to derive `failed` status and queue summaries.
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Database("local store lock poisoned".to_string()))
    }

    /// Run `f` inside one write transaction; nothing is applied if it fails.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut db = self.lock()?;
        let tx = db.connection_mut().transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let db = self.lock()?;
        f(db.connection())
    }

    // ---- Entries ----

    /// Create an entry and queue its `create` operation.
    pub fn create_entry(&self, owner_id: &str, new_entry: NewEntry) -> Result<LocalEntry> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(Error::InvalidInput("owner id is required".to_string()));
        }

        let entry = LocalEntry::new(owner_id, new_entry);
        let payload = serde_json::to_value(entry.create_payload())?;
        self.write(|tx| {
            EntryRepository::new(tx).insert(&entry)?;
            QueueRepository::new(tx).enqueue(
                Operation::Create,
                EntityType::Entry,
                entry.local_id,
                &payload,
                entry.created_at,
            )?;
            Ok(())
        })?;

        tracing::debug!(local_id = %entry.local_id, "Created entry");
        Ok(entry)
    }

    /// Apply a partial update to an entry.
    ///
    /// Returns `None` if the entry does not exist. A change set that changes
    /// nothing returns the entry as stored and queues nothing.
    pub fn update_entry(
        &self,
        local_id: &LocalId,
        changes: &EntryChanges,
    ) -> Result<Option<LocalEntry>> {
        self.write(|tx| {
            let repo = EntryRepository::new(tx);
            let Some(mut entry) = repo.get(local_id)? else {
                return Ok(None);
            };

            let now = now_millis();
            let Some(payload) = entry.apply_changes(changes, now) else {
                return Ok(Some(entry));
            };

            repo.save(&entry)?;
            QueueRepository::new(tx).enqueue(
                Operation::Update,
                EntityType::Entry,
                entry.local_id,
                &serde_json::to_value(payload)?,
                now,
            )?;
            Ok(Some(entry))
        })
    }

    /// Delete an entry and its messages, queueing one remote `delete`.
    ///
    /// Deleting an unknown entry is a no-op. Queued operations for the
    /// entry's messages are dropped: the remote delete cascades to them.
    pub fn delete_entry(&self, local_id: &LocalId) -> Result<()> {
        let deleted = self.write(|tx| {
            let children = message_keys_under(tx, local_id)?;
            if !EntryRepository::new(tx).delete(local_id)? {
                return Ok(false);
            }
            let queue = QueueRepository::new(tx);
            let mut dropped = 0;
            for key in children {
                dropped += queue.remove_for(key)?;
            }
            if dropped > 0 {
                tracing::debug!(entry = %local_id, dropped, "Dropped queued message operations");
            }
            queue.enqueue(
                Operation::Delete,
                EntityType::Entry,
                *local_id,
                &json!({}),
                now_millis(),
            )?;
            Ok(true)
        })?;

        if deleted {
            tracing::debug!(%local_id, "Deleted entry");
        }
        Ok(())
    }

    /// Get an entry by local ID
    pub fn get_entry(&self, local_id: &LocalId) -> Result<Option<LocalEntry>> {
        self.read(|conn| EntryRepository::new(conn).get(local_id))
    }

    /// List an owner's entries, newest first
    pub fn list_entries(&self, owner_id: &str, filter: &EntryFilter) -> Result<Vec<LocalEntry>> {
        self.read(|conn| EntryRepository::new(conn).list(owner_id, filter))
    }

    // ---- Messages ----

    /// Create a message under an existing entry and queue its `create`.
    pub fn create_message(
        &self,
        entry_local_id: &LocalId,
        new_message: NewMessage,
    ) -> Result<LocalMessage> {
        let message = LocalMessage::new(*entry_local_id, new_message);
        let payload = serde_json::to_value(message.create_payload())?;
        self.write(|tx| {
            if EntryRepository::new(tx).get(entry_local_id)?.is_none() {
                return Err(Error::NotFound(format!("entry {entry_local_id}")));
            }
            MessageRepository::new(tx).insert(&message)?;
            QueueRepository::new(tx).enqueue(
                Operation::Create,
                EntityType::Message,
                message.local_id,
                &payload,
                message.created_at,
            )?;
            Ok(())
        })?;

        tracing::debug!(local_id = %message.local_id, entry = %entry_local_id, "Created message");
        Ok(message)
    }

    /// Apply a partial update to a message; same contract as [`Self::update_entry`].
    pub fn update_message(
        &self,
        local_id: &LocalId,
        changes: &MessageChanges,
    ) -> Result<Option<LocalMessage>> {
        self.write(|tx| {
            let repo = MessageRepository::new(tx);
            let Some(mut message) = repo.get(local_id)? else {
                return Ok(None);
            };

            let now = now_millis();
            let Some(payload) = message.apply_changes(changes, now) else {
                return Ok(Some(message));
            };

            repo.save(&message)?;
            QueueRepository::new(tx).enqueue(
                Operation::Update,
                EntityType::Message,
                message.local_id,
                &serde_json::to_value(payload)?,
                now,
            )?;
            Ok(Some(message))
        })
    }

    /// Delete a message, queueing a remote `delete`; unknown ids are a no-op.
    pub fn delete_message(&self, local_id: &LocalId) -> Result<()> {
        self.write(|tx| {
            if MessageRepository::new(tx).delete(local_id)? {
                QueueRepository::new(tx).enqueue(
                    Operation::Delete,
                    EntityType::Message,
                    *local_id,
                    &json!({}),
                    now_millis(),
                )?;
            }
            Ok(())
        })
    }

    /// Get a message by local ID
    pub fn get_message(&self, local_id: &LocalId) -> Result<Option<LocalMessage>> {
        self.read(|conn| MessageRepository::new(conn).get(local_id))
    }

    /// List the messages of an entry, oldest first
    pub fn list_messages(&self, entry_local_id: &LocalId) -> Result<Vec<LocalMessage>> {
        self.read(|conn| MessageRepository::new(conn).list_for_entry(entry_local_id))
    }

    // ---- Sync bookkeeping ----

    /// Record the server id (if not already set) and re-derive `sync_status`.
    ///
    /// Returns the resulting status, or `None` if the entity no longer exists.
    pub fn mark_synced(
        &self,
        entity_type: EntityType,
        local_id: &LocalId,
        server_id: Option<&str>,
    ) -> Result<Option<SyncStatus>> {
        let key = EntityKey::new(entity_type, *local_id);
        self.write(|tx| mark_synced_in(tx, key, server_id, self.retry))
    }

    /// Remove an acknowledged queue item and mark its entity synced.
    ///
    /// Only a `create` acknowledgment may assign the server id.
    pub fn acknowledge(&self, item: &QueueItem, server_id: Option<&str>) -> Result<()> {
        self.write(|tx| acknowledge_in(tx, item, server_id, self.retry))
    }

    /// Record one failed delivery attempt for `item`.
    pub fn record_failure(&self, item: &QueueItem, error: &str) -> Result<Option<SyncStatus>> {
        self.write(|tx| record_failure_in(tx, item, error, now_millis(), self.retry))
    }

    /// Record the same failure against every item of a batch at once.
    pub fn record_batch_failure(&self, items: &[QueueItem], error: &str) -> Result<()> {
        let now = now_millis();
        self.write(|tx| {
            for item in items {
                record_failure_in(tx, item, error, now, self.retry)?;
            }
            Ok(())
        })
    }

    /// Full FIFO snapshot of the queue, abandoned items included
    pub fn queue_items(&self) -> Result<Vec<QueueItem>> {
        self.read(|conn| QueueRepository::new(conn).list_all())
    }

    /// Counts for sync indicators
    pub fn sync_summary(&self) -> Result<SyncSummary> {
        self.read(|conn| QueueRepository::new(conn).summary(self.retry.max_attempts))
    }

    /// Give abandoned items a fresh set of attempts.
    ///
    /// Each abandoned item (optionally only those of one entity) is replaced
    /// by a new item at the same queue position. Returns how many were reset.
    pub fn retry_abandoned(&self, key: Option<EntityKey>) -> Result<usize> {
        let count = self.write(|tx| {
            let queue = QueueRepository::new(tx);
            let status = StatusRepository::new(tx);
            let abandoned = queue.abandoned(self.retry.max_attempts, key)?;
            for item in &abandoned {
                queue.replace_with_fresh(item)?;
                status.refresh(item.key(), self.retry.max_attempts)?;
            }
            Ok(abandoned.len())
        })?;

        if count > 0 {
            tracing::info!(count, "Re-queued abandoned sync operations");
        }
        Ok(count)
    }

    /// Highest remote `updated_at` merged by a pull, absent before the first pull
    pub fn pull_cursor(&self) -> Result<Option<i64>> {
        self.read(|conn| StateRepository::new(conn).pull_cursor())
    }
}

/// Messages of an entry that may still have queued operations, including
/// ones already deleted locally whose `create` is still queued.
fn message_keys_under(
    tx: &Transaction<'_>,
    entry_local_id: &LocalId,
) -> Result<BTreeSet<EntityKey>> {
    let parent = entry_local_id.as_str();
    let mut keys: BTreeSet<EntityKey> = MessageRepository::new(tx)
        .list_for_entry(entry_local_id)?
        .iter()
        .map(|message| EntityKey::new(EntityType::Message, message.local_id))
        .collect();
    keys.extend(
        QueueRepository::new(tx)
            .list_all()?
            .iter()
            .filter(|item| item.entity_type == EntityType::Message)
            .filter(|item| {
                item.payload.get("entryLocalId").and_then(Value::as_str) == Some(parent.as_str())
            })
            .map(QueueItem::key),
    );
    Ok(keys)
}

fn mark_synced_in(
    tx: &Transaction<'_>,
    key: EntityKey,
    server_id: Option<&str>,
    retry: RetryPolicy,
) -> Result<Option<SyncStatus>> {
    let status = StatusRepository::new(tx);
    if let Some(server_id) = server_id {
        status.assign_server_id(key, server_id)?;
    }
    status.refresh(key, retry.max_attempts)
}

fn acknowledge_in(
    tx: &Transaction<'_>,
    item: &QueueItem,
    server_id: Option<&str>,
    retry: RetryPolicy,
) -> Result<()> {
    QueueRepository::new(tx).remove(item.id)?;
    let server_id = server_id.filter(|_| item.operation == Operation::Create);
    mark_synced_in(tx, item.key(), server_id, retry)?;
    Ok(())
}

fn record_failure_in(
    tx: &Transaction<'_>,
    item: &QueueItem,
    error: &str,
    now: i64,
    retry: RetryPolicy,
) -> Result<Option<SyncStatus>> {
    let Some(attempts) = QueueRepository::new(tx).record_failure(item.id, error, now)? else {
        return Ok(None);
    };
    if retry.is_abandoned(attempts) {
        tracing::warn!(
            entity = %item.key(),
            operation = %item.operation,
            attempts,
            "Abandoning sync operation: {error}"
        );
    }
    StatusRepository::new(tx).refresh(item.key(), retry.max_attempts)
}
