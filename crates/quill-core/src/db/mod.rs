//! Database layer for Quill

mod connection;
mod entry_repository;
mod message_repository;
mod migrations;
mod queue_repository;
mod state_repository;
mod status_repository;

use std::str::FromStr;

use rusqlite::types::Type;

pub use connection::Database;
pub use entry_repository::EntryRepository;
pub use message_repository::MessageRepository;
pub use queue_repository::QueueRepository;
pub use state_repository::StateRepository;
pub use status_repository::StatusRepository;

/// Parse a TEXT column through `FromStr` (ids, enum tags)
pub(crate) fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a TEXT column holding JSON
pub(crate) fn parse_json_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
