//! Pending-operation queue repository

use crate::error::Result;
use crate::models::{EntityKey, EntityType, LocalId, Operation, QueueItem, SyncSummary};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{parse_column, parse_json_column};

const QUEUE_COLUMNS: &str =
    "id, operation, entity_type, local_id, payload, attempts, last_attempt, error, created_at";

/// Row access for the `sync_queue` table.
///
/// Items are only ever appended, removed on acknowledgment, or have their
/// attempt bookkeeping bumped.
pub struct QueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> QueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        Ok(QueueItem {
            id: row.get(0)?,
            operation: parse_column(row, 1)?,
            entity_type: parse_column(row, 2)?,
            local_id: parse_column(row, 3)?,
            payload: parse_json_column(row, 4)?,
            attempts: row.get(5)?,
            last_attempt: row.get(6)?,
            error: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Append a new item with zero attempts
    pub fn enqueue(
        &self,
        operation: Operation,
        entity_type: EntityType,
        local_id: LocalId,
        payload: &Value,
        now: i64,
    ) -> Result<QueueItem> {
        self.conn.execute(
            "INSERT INTO sync_queue (operation, entity_type, local_id, payload, attempts, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
            params![
                operation.as_str(),
                entity_type.as_str(),
                local_id.as_str(),
                serde_json::to_string(payload)?,
                now,
            ],
        )?;

        Ok(QueueItem {
            id: self.conn.last_insert_rowid(),
            operation,
            entity_type,
            local_id,
            payload: payload.clone(),
            attempts: 0,
            last_attempt: None,
            error: None,
            created_at: now,
        })
    }

    /// Get an item by sequence number
    pub fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?"),
                params![id],
                Self::parse_item,
            )
            .optional()?;
        Ok(item)
    }

    /// Every item in FIFO order, abandoned ones included
    pub fn list_all(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY created_at ASC, id ASC"
        ))?;
        let items = stmt
            .query_map([], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Items that exhausted their attempts, optionally for one entity
    pub fn abandoned(&self, max_attempts: u32, key: Option<EntityKey>) -> Result<Vec<QueueItem>> {
        let items = self
            .list_all()?
            .into_iter()
            .filter(|item| item.attempts >= max_attempts)
            .filter(|item| key.map_or(true, |key| item.key() == key))
            .collect();
        Ok(items)
    }

    /// Remove an acknowledged item
    pub fn remove(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    /// Drop every item for one entity, returning how many went
    pub fn remove_for(&self, key: EntityKey) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE entity_type = ? AND local_id = ?",
            params![key.entity_type.as_str(), key.local_id.as_str()],
        )?;
        Ok(rows)
    }

    /// Record a failed delivery attempt.
    ///
    /// Returns the attempt count afterwards, or `None` if the item is gone.
    pub fn record_failure(&self, id: i64, error: &str, now: i64) -> Result<Option<u32>> {
        self.conn.execute(
            "UPDATE sync_queue SET attempts = attempts + 1, last_attempt = ?, error = ?
             WHERE id = ?",
            params![now, error, id],
        )?;

        let attempts = self
            .conn
            .query_row(
                "SELECT attempts FROM sync_queue WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempts)
    }

    /// Swap an abandoned item for a fresh one at the same queue position
    pub fn replace_with_fresh(&self, item: &QueueItem) -> Result<QueueItem> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![item.id])?;
        self.conn.execute(
            &format!(
                "INSERT INTO sync_queue ({QUEUE_COLUMNS}) VALUES (?, ?, ?, ?, ?, 0, NULL, NULL, ?)"
            ),
            params![
                item.id,
                item.operation.as_str(),
                item.entity_type.as_str(),
                item.local_id.as_str(),
                serde_json::to_string(&item.payload)?,
                item.created_at,
            ],
        )?;

        Ok(QueueItem {
            attempts: 0,
            last_attempt: None,
            error: None,
            ..item.clone()
        })
    }

    /// Outstanding (total, abandoned) item counts for one entity
    pub fn counts_for(&self, key: EntityKey, max_attempts: u32) -> Result<(usize, usize)> {
        let (total, abandoned): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN attempts >= ? THEN 1 ELSE 0 END), 0)
             FROM sync_queue WHERE entity_type = ? AND local_id = ?",
            params![max_attempts, key.entity_type.as_str(), key.local_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((to_count(total), to_count(abandoned)))
    }

    /// True while any item references the entity
    pub fn has_items(&self, key: EntityKey) -> Result<bool> {
        Ok(self.counts_for(key, u32::MAX)?.0 > 0)
    }

    /// Queue-wide counts for sync indicators
    pub fn summary(&self, max_attempts: u32) -> Result<SyncSummary> {
        let (pending, failed): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN attempts < ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN attempts >= ?1 THEN 1 ELSE 0 END), 0)
             FROM sync_queue",
            params![max_attempts],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(SyncSummary {
            pending_count: to_count(pending),
            failed_count: to_count(failed),
        })
    }
}

fn to_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_enqueue_starts_with_zero_attempts() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());

        let id = LocalId::new();
        let item = repo
            .enqueue(Operation::Create, EntityType::Entry, id, &json!({"a": 1}), 100)
            .unwrap();

        assert_eq!(item.attempts, 0);
        assert_eq!(repo.get(item.id).unwrap().unwrap(), item);
    }

    #[test]
    fn test_list_all_orders_by_created_then_id() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());
        let id = LocalId::new();

        let late = repo
            .enqueue(Operation::Update, EntityType::Entry, id, &json!({}), 200)
            .unwrap();
        let tie_a = repo
            .enqueue(Operation::Create, EntityType::Entry, id, &json!({}), 100)
            .unwrap();
        let tie_b = repo
            .enqueue(Operation::Update, EntityType::Entry, id, &json!({}), 100)
            .unwrap();

        let ids: Vec<i64> = repo.list_all().unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![tie_a.id, tie_b.id, late.id]);
    }

    #[test]
    fn test_record_failure_bumps_attempts() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());
        let item = repo
            .enqueue(Operation::Create, EntityType::Message, LocalId::new(), &json!({}), 1)
            .unwrap();

        assert_eq!(repo.record_failure(item.id, "boom", 10).unwrap(), Some(1));
        assert_eq!(repo.record_failure(item.id, "again", 20).unwrap(), Some(2));

        let stored = repo.get(item.id).unwrap().unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_attempt, Some(20));
        assert_eq!(stored.error.as_deref(), Some("again"));

        assert_eq!(repo.record_failure(9_999, "gone", 30).unwrap(), None);
    }

    #[test]
    fn test_summary_splits_pending_and_abandoned() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());

        let stuck = repo
            .enqueue(Operation::Create, EntityType::Entry, LocalId::new(), &json!({}), 1)
            .unwrap();
        repo.enqueue(Operation::Create, EntityType::Entry, LocalId::new(), &json!({}), 2)
            .unwrap();
        for n in 0..3 {
            repo.record_failure(stuck.id, "down", n).unwrap();
        }

        let summary = repo.summary(3).unwrap();
        assert_eq!(summary.pending_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(repo.abandoned(3, None).unwrap().len(), 1);
        assert_eq!(repo.counts_for(stuck.key(), 3).unwrap(), (1, 1));
    }

    #[test]
    fn test_replace_with_fresh_keeps_position() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());
        let id = LocalId::new();

        let first = repo
            .enqueue(Operation::Create, EntityType::Entry, id, &json!({"x": 1}), 100)
            .unwrap();
        let second = repo
            .enqueue(Operation::Update, EntityType::Entry, id, &json!({"x": 2}), 100)
            .unwrap();
        repo.record_failure(first.id, "down", 150).unwrap();

        let stored = repo.get(first.id).unwrap().unwrap();
        let fresh = repo.replace_with_fresh(&stored).unwrap();
        assert_eq!(fresh.attempts, 0);
        assert_eq!(fresh.error, None);
        assert_eq!(fresh.payload, json!({"x": 1}));

        let ids: Vec<i64> = repo.list_all().unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_remove_for_only_touches_one_entity() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());
        let target = LocalId::new();
        let other = LocalId::new();

        repo.enqueue(Operation::Create, EntityType::Message, target, &json!({}), 1)
            .unwrap();
        repo.enqueue(Operation::Update, EntityType::Message, target, &json!({}), 2)
            .unwrap();
        repo.enqueue(Operation::Create, EntityType::Message, other, &json!({}), 3)
            .unwrap();
        repo.enqueue(Operation::Create, EntityType::Entry, target, &json!({}), 4)
            .unwrap();

        let removed = repo
            .remove_for(EntityKey::new(EntityType::Message, target))
            .unwrap();
        assert_eq!(removed, 2);
        let left: Vec<(EntityType, LocalId)> = repo
            .list_all()
            .unwrap()
            .iter()
            .map(|item| (item.entity_type, item.local_id))
            .collect();
        assert_eq!(
            left,
            vec![(EntityType::Message, other), (EntityType::Entry, target)]
        );
    }

    #[test]
    fn test_remove() {
        let db = setup();
        let repo = QueueRepository::new(db.connection());
        let item = repo
            .enqueue(Operation::Delete, EntityType::Entry, LocalId::new(), &json!({}), 1)
            .unwrap();

        assert!(repo.has_items(item.key()).unwrap());
        assert!(repo.remove(item.id).unwrap());
        assert!(!repo.remove(item.id).unwrap());
        assert!(!repo.has_items(item.key()).unwrap());
    }
}
