//! Sync status indicators

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Whether outstanding queue work exists for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No queued operation references the entity and it has a server id
    Synced,
    /// At least one queued operation is awaiting acknowledgment
    #[default]
    Pending,
    /// A queued operation exhausted its attempts and was abandoned
    Failed,
}

impl SyncStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// Counts surfaced to UI sync indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Queue items still eligible for automatic delivery
    pub pending_count: usize,
    /// Queue items abandoned after exhausting their attempts
    pub failed_count: usize,
}

impl SyncSummary {
    /// True when nothing is waiting on the remote store
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.pending_count == 0 && self.failed_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_roundtrips_through_text() {
        for status in [SyncStatus::Synced, SyncStatus::Pending, SyncStatus::Failed] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_summary_idle() {
        assert!(SyncSummary::default().is_idle());
        let summary = SyncSummary {
            pending_count: 0,
            failed_count: 1,
        };
        assert!(!summary.is_idle());
    }
}
