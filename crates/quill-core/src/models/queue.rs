//! Pending-operation queue model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::LocalId;
use crate::error::Error;

/// Mutation kind recorded in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// Which table a queued operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Entry,
    Message,
}

impl EntityType {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Message => "message",
        }
    }

    /// Local table holding entities of this type
    pub(crate) const fn table(self) -> &'static str {
        match self {
            Self::Entry => "entries",
            Self::Message => "messages",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "message" => Ok(Self::Message),
            other => Err(Error::InvalidInput(format!("unknown entity type: {other}"))),
        }
    }
}

/// Identity of a synced entity across both tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub local_id: LocalId,
}

impl EntityKey {
    #[must_use]
    pub const fn new(entity_type: EntityType, local_id: LocalId) -> Self {
        Self {
            entity_type,
            local_id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.local_id)
    }
}

/// A durable record of one local mutation awaiting remote acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Store-assigned sequence number; breaks `created_at` ties
    pub id: i64,
    pub operation: Operation,
    pub entity_type: EntityType,
    pub local_id: LocalId,
    /// Operation-specific partial data
    pub payload: Value,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Time of the last failed attempt (Unix ms)
    pub last_attempt: Option<i64>,
    /// Error reported by the last failed attempt
    pub error: Option<String>,
    /// Enqueue time (Unix ms); defines FIFO order
    pub created_at: i64,
}

impl QueueItem {
    /// The entity this item mutates
    #[must_use]
    pub const fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_and_entity_type_parse() {
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!("message".parse::<EntityType>().unwrap(), EntityType::Message);
        assert!("note".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_key_display() {
        let id = LocalId::new();
        let key = EntityKey::new(EntityType::Entry, id);
        assert_eq!(key.to_string(), format!("entry:{id}"));
    }
}
