//! Message repository implementation

use crate::error::Result;
use crate::models::{LocalId, LocalMessage};
use rusqlite::{params, Connection, OptionalExtension};

use super::parse_column;

const MESSAGE_COLUMNS: &str =
    "local_id, entry_local_id, server_id, role, kind, content, sync_status, created_at, updated_at";

/// Row access for the `messages` table
pub struct MessageRepository<'a> {
    conn: &'a Connection,
}

impl<'a> MessageRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalMessage> {
        Ok(LocalMessage {
            local_id: parse_column(row, 0)?,
            entry_local_id: parse_column(row, 1)?,
            server_id: row.get(2)?,
            role: parse_column(row, 3)?,
            kind: parse_column(row, 4)?,
            content: row.get(5)?,
            sync_status: parse_column(row, 6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    /// Insert a new message
    pub fn insert(&self, message: &LocalMessage) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                message.local_id.as_str(),
                message.entry_local_id.as_str(),
                message.server_id,
                message.role.as_str(),
                message.kind.as_str(),
                message.content,
                message.sync_status.as_str(),
                message.created_at,
                message.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Insert or overwrite the local mirror of a remote message
    pub fn upsert(&self, message: &LocalMessage) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(local_id) DO UPDATE SET
                    server_id = COALESCE(messages.server_id, excluded.server_id),
                    role = excluded.role,
                    kind = excluded.kind,
                    content = excluded.content,
                    sync_status = excluded.sync_status,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at"
            ),
            params![
                message.local_id.as_str(),
                message.entry_local_id.as_str(),
                message.server_id,
                message.role.as_str(),
                message.kind.as_str(),
                message.content,
                message.sync_status.as_str(),
                message.created_at,
                message.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a message by local ID
    pub fn get(&self, local_id: &LocalId) -> Result<Option<LocalMessage>> {
        let message = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE local_id = ?"),
                params![local_id.as_str()],
                Self::parse_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Persist the mutable fields of an existing message
    pub fn save(&self, message: &LocalMessage) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE messages SET kind = ?, content = ?, sync_status = ?, updated_at = ?
             WHERE local_id = ?",
            params![
                message.kind.as_str(),
                message.content,
                message.sync_status.as_str(),
                message.updated_at,
                message.local_id.as_str(),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Hard delete a message
    pub fn delete(&self, local_id: &LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM messages WHERE local_id = ?",
            params![local_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Count the messages under an entry
    pub fn count_for_entry(&self, entry_local_id: &LocalId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE entry_local_id = ?",
            params![entry_local_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// List the messages under an entry, oldest first
    pub fn list_for_entry(&self, entry_local_id: &LocalId) -> Result<Vec<LocalMessage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE entry_local_id = ?
             ORDER BY created_at ASC, local_id ASC"
        ))?;

        let messages = stmt
            .query_map(params![entry_local_id.as_str()], Self::parse_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(messages)
    }
}
