//! Sync state repository implementation

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

const PULL_CURSOR_KEY: &str = "pull_cursor";

/// Key/value access for the `sync_state` table
pub struct StateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> StateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Read a raw state value
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a raw state value
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Highest remote `updated_at` merged so far, absent before the first pull
    pub fn pull_cursor(&self) -> Result<Option<i64>> {
        self.get(PULL_CURSOR_KEY)?
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| Error::Database(format!("corrupt pull cursor: {value}")))
            })
            .transpose()
    }

    /// Advance the pull cursor; a smaller value leaves it unchanged.
    ///
    /// Returns the cursor in effect afterwards.
    pub fn advance_pull_cursor(&self, candidate: i64) -> Result<i64> {
        let next = self
            .pull_cursor()?
            .map_or(candidate, |current| current.max(candidate));
        self.set(PULL_CURSOR_KEY, &next.to_string())?;
        Ok(next)
    }
}
