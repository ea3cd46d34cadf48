//! Server id assignment and `sync_status` derivation for both entity tables

use crate::error::Result;
use crate::models::{EntityKey, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension};

use super::QueueRepository;

/// Cross-table sync bookkeeping keyed by [`EntityKey`]
pub struct StatusRepository<'a> {
    conn: &'a Connection,
}

impl<'a> StatusRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record the remote identifier unless one is already set.
    ///
    /// Returns true when the row took the new value.
    pub fn assign_server_id(&self, key: EntityKey, server_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE {} SET server_id = ? WHERE local_id = ? AND server_id IS NULL",
                key.entity_type.table()
            ),
            params![server_id, key.local_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Current server id of an entity
    pub fn server_id(&self, key: EntityKey) -> Result<Option<String>> {
        let server_id = self
            .conn
            .query_row(
                &format!(
                    "SELECT server_id FROM {} WHERE local_id = ?",
                    key.entity_type.table()
                ),
                params![key.local_id.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(server_id.flatten())
    }

    /// Overwrite the stored status
    pub fn set(&self, key: EntityKey, status: SyncStatus) -> Result<()> {
        self.conn.execute(
            &format!(
                "UPDATE {} SET sync_status = ? WHERE local_id = ?",
                key.entity_type.table()
            ),
            params![status.as_str(), key.local_id.as_str()],
        )?;
        Ok(())
    }

    /// Re-derive an entity's status from its queue items and server id.
    ///
    /// Abandoned items make it `failed`, any other outstanding item keeps it
    /// `pending`, and with an empty queue it is `synced` once a server id
    /// exists. Returns `None` when the entity no longer exists locally.
    pub fn refresh(&self, key: EntityKey, max_attempts: u32) -> Result<Option<SyncStatus>> {
        let exists: bool = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE local_id = ?)",
                key.entity_type.table()
            ),
            params![key.local_id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }

        let (total, abandoned) = QueueRepository::new(self.conn).counts_for(key, max_attempts)?;
        let status = if abandoned > 0 {
            SyncStatus::Failed
        } else if total > 0 || self.server_id(key)?.is_none() {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };

        self.set(key, status)?;
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, EntryRepository};
    use crate::models::{EntityType, EntryCategory, LocalEntry, LocalId, NewEntry, Operation};
    use serde_json::json;

    fn setup() -> (Database, EntityKey) {
        let db = Database::open_in_memory().unwrap();
        let entry = LocalEntry::new("owner-1", NewEntry::new(EntryCategory::Journal));
        EntryRepository::new(db.connection()).insert(&entry).unwrap();
        (db, EntityKey::new(EntityType::Entry, entry.local_id))
    }

    #[test]
    fn test_server_id_assigned_once() {
        let (db, key) = setup();
        let repo = StatusRepository::new(db.connection());

        assert!(repo.assign_server_id(key, "srv-1").unwrap());
        assert!(!repo.assign_server_id(key, "srv-2").unwrap());
        assert_eq!(repo.server_id(key).unwrap().as_deref(), Some("srv-1"));
    }

    #[test]
    fn test_refresh_derives_status() {
        let (db, key) = setup();
        let repo = StatusRepository::new(db.connection());
        let queue = QueueRepository::new(db.connection());

        // No queue items and no server id yet.
        assert_eq!(repo.refresh(key, 5).unwrap(), Some(SyncStatus::Pending));

        repo.assign_server_id(key, "srv-1").unwrap();
        assert_eq!(repo.refresh(key, 5).unwrap(), Some(SyncStatus::Synced));

        let item = queue
            .enqueue(Operation::Update, key.entity_type, key.local_id, &json!({}), 1)
            .unwrap();
        assert_eq!(repo.refresh(key, 5).unwrap(), Some(SyncStatus::Pending));

        queue.record_failure(item.id, "down", 2).unwrap();
        assert_eq!(repo.refresh(key, 1).unwrap(), Some(SyncStatus::Failed));
    }

    #[test]
    fn test_refresh_missing_entity() {
        let (db, _key) = setup();
        let repo = StatusRepository::new(db.connection());
        let missing = EntityKey::new(EntityType::Message, LocalId::new());
        assert_eq!(repo.refresh(missing, 5).unwrap(), None);
    }
}
