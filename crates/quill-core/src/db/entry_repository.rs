//! Entry repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{EntryFilter, LocalEntry, LocalId};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{parse_column, parse_json_column};

const ENTRY_COLUMNS: &str =
    "local_id, server_id, owner_id, category, status, title, metadata, sync_status, created_at, updated_at";

/// Row access for the `entries` table.
///
/// Works on a plain connection or inside a transaction; callers own atomicity.
pub struct EntryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EntryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalEntry> {
        Ok(LocalEntry {
            local_id: parse_column(row, 0)?,
            server_id: row.get(1)?,
            owner_id: row.get(2)?,
            category: parse_column(row, 3)?,
            status: parse_column(row, 4)?,
            title: row.get(5)?,
            metadata: parse_json_column(row, 6)?,
            sync_status: parse_column(row, 7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    /// Insert a new entry
    pub fn insert(&self, entry: &LocalEntry) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO entries ({ENTRY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                entry.local_id.as_str(),
                entry.server_id,
                entry.owner_id,
                entry.category.as_str(),
                entry.status.as_str(),
                entry.title,
                serde_json::to_string(&entry.metadata)?,
                entry.sync_status.as_str(),
                entry.created_at,
                entry.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Insert or overwrite the local mirror of a remote entry
    pub fn upsert(&self, entry: &LocalEntry) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO entries ({ENTRY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(local_id) DO UPDATE SET
                    server_id = COALESCE(entries.server_id, excluded.server_id),
                    owner_id = excluded.owner_id,
                    category = excluded.category,
                    status = excluded.status,
                    title = excluded.title,
                    metadata = excluded.metadata,
                    sync_status = excluded.sync_status,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at"
            ),
            params![
                entry.local_id.as_str(),
                entry.server_id,
                entry.owner_id,
                entry.category.as_str(),
                entry.status.as_str(),
                entry.title,
                serde_json::to_string(&entry.metadata)?,
                entry.sync_status.as_str(),
                entry.created_at,
                entry.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get an entry by local ID
    pub fn get(&self, local_id: &LocalId) -> Result<Option<LocalEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE local_id = ?"),
                params![local_id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Persist the mutable fields of an existing entry
    pub fn save(&self, entry: &LocalEntry) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE entries
             SET category = ?, status = ?, title = ?, metadata = ?, sync_status = ?, updated_at = ?
             WHERE local_id = ?",
            params![
                entry.category.as_str(),
                entry.status.as_str(),
                entry.title,
                serde_json::to_string(&entry.metadata)?,
                entry.sync_status.as_str(),
                entry.updated_at,
                entry.local_id.as_str(),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Hard delete an entry; its messages go with it through the foreign key
    pub fn delete(&self, local_id: &LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM entries WHERE local_id = ?",
            params![local_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// List an owner's entries, newest first
    pub fn list(&self, owner_id: &str, filter: &EntryFilter) -> Result<Vec<LocalEntry>> {
        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE owner_id = ?");
        let mut values = vec![owner_id.to_string()];

        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            values.push(category.as_str().to_string());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(sync_status) = filter.sync_status {
            sql.push_str(" AND sync_status = ?");
            values.push(sync_status.as_str().to_string());
        }
        sql.push_str(" ORDER BY created_at DESC, local_id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}
