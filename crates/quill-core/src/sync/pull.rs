//! Pull reconciliation: remote changes since the cursor -> local tables.
//!
//! Remote records win by `updated_at`, except that an entity with any
//! outstanding queue item is never touched: its local edit has not reached
//! the remote yet and will overwrite it once pushed. The cursor tracks the
//! remote's own `revision` stamps, never client clocks.

use rusqlite::Connection;

use super::error::SyncResult;
use super::transport::RemoteStore;
use super::wire::{PullRequest, PullResponse, RemoteEntry, RemoteMessage};
use crate::db::{EntryRepository, MessageRepository, QueueRepository, StateRepository};
use crate::models::{EntityKey, EntityType, LocalEntry, LocalMessage, SyncStatus};
use crate::store::LocalStore;
use crate::Result;

/// What to do with one pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Overwrite (or insert) the local copy
    Apply,
    /// Remove the local copy
    Remove,
    /// Leave the local copy alone
    Skip(SkipReason),
}

/// Why a pulled record was not merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entity has queued local changes
    PendingLocal,
    /// The local copy is newer
    Stale,
    /// Tombstone for something this device never had
    Absent,
    /// Message whose entry is unknown locally
    Orphan,
}

/// Last-write-wins decision for one record.
pub const fn decide(
    local_updated_at: Option<i64>,
    remote_updated_at: i64,
    remote_deleted: bool,
    has_pending: bool,
) -> MergeDecision {
    if has_pending {
        return MergeDecision::Skip(SkipReason::PendingLocal);
    }
    match local_updated_at {
        Some(local) if local > remote_updated_at => MergeDecision::Skip(SkipReason::Stale),
        Some(_) if remote_deleted => MergeDecision::Remove,
        None if remote_deleted => MergeDecision::Skip(SkipReason::Absent),
        _ => MergeDecision::Apply,
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Records received
    pub fetched: usize,
    /// Records written locally
    pub applied: usize,
    /// Local records removed by tombstones
    pub removed: usize,
    /// Records left alone because of queued local changes
    pub skipped_pending: usize,
    /// Records left alone for any other reason
    pub skipped_other: usize,
    /// Cursor after the pull
    pub cursor: Option<i64>,
}

impl PullReport {
    fn count(&mut self, decision: MergeDecision) {
        match decision {
            MergeDecision::Apply => self.applied += 1,
            MergeDecision::Remove => self.removed += 1,
            MergeDecision::Skip(SkipReason::PendingLocal) => self.skipped_pending += 1,
            MergeDecision::Skip(_) => self.skipped_other += 1,
        }
    }
}

/// Fetches remote changes and merges them into the local store.
pub struct PullReconciler<'a, R> {
    store: &'a LocalStore,
    remote: &'a R,
    owner_id: &'a str,
}

impl<'a, R: RemoteStore> PullReconciler<'a, R> {
    /// Create a reconciler pulling `owner_id`'s records
    pub const fn new(store: &'a LocalStore, remote: &'a R, owner_id: &'a str) -> Self {
        Self {
            store,
            remote,
            owner_id,
        }
    }

    /// Pull everything changed since the cursor and merge it.
    ///
    /// A failed fetch leaves the cursor and local tables untouched. The merge
    /// and the cursor advance commit together.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        let request = PullRequest {
            since: self.store.pull_cursor()?,
            owner_id: self.owner_id.to_string(),
        };
        let response = self.remote.pull(&request).await?;

        let max_attempts = self.store.retry_policy().max_attempts;
        let report = self
            .store
            .write(|tx| merge_response(tx, &response, max_attempts))?;

        tracing::debug!(
            fetched = report.fetched,
            applied = report.applied,
            removed = report.removed,
            skipped_pending = report.skipped_pending,
            cursor = ?report.cursor,
            "Pulled remote changes"
        );
        Ok(report)
    }
}

fn merge_response(
    conn: &Connection,
    response: &PullResponse,
    max_attempts: u32,
) -> Result<PullReport> {
    let mut report = PullReport {
        fetched: response.len(),
        ..PullReport::default()
    };

    for remote in &response.entries {
        let decision = merge_entry(conn, remote, max_attempts)?;
        report.count(decision);
    }
    for remote in &response.messages {
        let decision = merge_message(conn, remote, max_attempts)?;
        report.count(decision);
    }

    let state = StateRepository::new(conn);
    report.cursor = match response.max_revision() {
        Some(max) => Some(state.advance_pull_cursor(max)?),
        None => state.pull_cursor()?,
    };
    Ok(report)
}

fn has_pending(conn: &Connection, key: EntityKey, max_attempts: u32) -> Result<bool> {
    let (total, _) = QueueRepository::new(conn).counts_for(key, max_attempts)?;
    Ok(total > 0)
}

fn merge_entry(conn: &Connection, remote: &RemoteEntry, max_attempts: u32) -> Result<MergeDecision> {
    let entries = EntryRepository::new(conn);
    let local = entries.get(&remote.local_id)?;

    let mut pending = has_pending(
        conn,
        EntityKey::new(EntityType::Entry, remote.local_id),
        max_attempts,
    )?;
    if remote.deleted && local.is_some() && !pending {
        // Removing the entry would take queued message edits with it.
        for message in MessageRepository::new(conn).list_for_entry(&remote.local_id)? {
            let key = EntityKey::new(EntityType::Message, message.local_id);
            if has_pending(conn, key, max_attempts)? {
                pending = true;
                break;
            }
        }
    }

    let decision = decide(
        local.as_ref().map(|entry| entry.updated_at),
        remote.updated_at,
        remote.deleted,
        pending,
    );
    match decision {
        MergeDecision::Apply => entries.upsert(&entry_from_remote(remote))?,
        MergeDecision::Remove => {
            entries.delete(&remote.local_id)?;
        }
        MergeDecision::Skip(_) => {}
    }
    Ok(decision)
}

fn merge_message(
    conn: &Connection,
    remote: &RemoteMessage,
    max_attempts: u32,
) -> Result<MergeDecision> {
    let messages = MessageRepository::new(conn);
    let local = messages.get(&remote.local_id)?;

    if local.is_none()
        && !remote.deleted
        && EntryRepository::new(conn)
            .get(&remote.entry_local_id)?
            .is_none()
    {
        return Ok(MergeDecision::Skip(SkipReason::Orphan));
    }

    let pending = has_pending(
        conn,
        EntityKey::new(EntityType::Message, remote.local_id),
        max_attempts,
    )?;
    let decision = decide(
        local.as_ref().map(|message| message.updated_at),
        remote.updated_at,
        remote.deleted,
        pending,
    );
    match decision {
        MergeDecision::Apply => messages.upsert(&message_from_remote(remote))?,
        MergeDecision::Remove => {
            messages.delete(&remote.local_id)?;
        }
        MergeDecision::Skip(_) => {}
    }
    Ok(decision)
}

fn entry_from_remote(remote: &RemoteEntry) -> LocalEntry {
    LocalEntry {
        local_id: remote.local_id,
        server_id: Some(remote.server_id.clone()),
        owner_id: remote.owner_id.clone(),
        category: remote.category,
        status: remote.status,
        title: remote.title.clone(),
        metadata: remote.metadata.clone(),
        sync_status: SyncStatus::Synced,
        created_at: remote.created_at,
        updated_at: remote.updated_at,
    }
}

fn message_from_remote(remote: &RemoteMessage) -> LocalMessage {
    LocalMessage {
        local_id: remote.local_id,
        entry_local_id: remote.entry_local_id,
        server_id: Some(remote.server_id.clone()),
        role: remote.role,
        kind: remote.kind,
        content: remote.content.clone(),
        sync_status: SyncStatus::Synced,
        created_at: remote.created_at,
        updated_at: remote.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryCategory, EntryStatus, LocalId, MessageKind, MessageRole};
    use crate::sync::error::SyncError;
    use crate::sync::wire::{ApplyResult, WireOperation};
    use crate::sync::RetryPolicy;
    use serde_json::Map;
    use std::sync::Mutex;

    /// Remote that replays a fixed pull response.
    struct ScriptedRemote {
        response: Mutex<Option<PullResponse>>,
        requests: Mutex<Vec<PullRequest>>,
    }

    impl ScriptedRemote {
        fn new(response: Option<PullResponse>) -> Self {
            Self {
                response: Mutex::new(response),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl RemoteStore for ScriptedRemote {
        async fn apply(&self, _operations: &[WireOperation]) -> SyncResult<Vec<ApplyResult>> {
            Ok(Vec::new())
        }

        async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.response
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| SyncError::transport_retryable("offline"))
        }
    }

    fn remote_entry(local_id: LocalId, updated_at: i64) -> RemoteEntry {
        RemoteEntry {
            server_id: format!("srv-{local_id}"),
            local_id,
            owner_id: "owner-1".into(),
            category: EntryCategory::Journal,
            status: EntryStatus::Archived,
            title: Some("From remote".into()),
            metadata: Map::new(),
            created_at: 1,
            updated_at,
            revision: updated_at,
            deleted: false,
        }
    }

    fn store() -> LocalStore {
        LocalStore::open_in_memory(RetryPolicy::default()).unwrap()
    }

    #[test]
    fn decide_rules() {
        assert_eq!(
            decide(Some(5), 10, false, true),
            MergeDecision::Skip(SkipReason::PendingLocal)
        );
        assert_eq!(
            decide(Some(20), 10, false, false),
            MergeDecision::Skip(SkipReason::Stale)
        );
        assert_eq!(decide(Some(5), 10, false, false), MergeDecision::Apply);
        assert_eq!(decide(None, 10, false, false), MergeDecision::Apply);
        assert_eq!(decide(Some(5), 10, true, false), MergeDecision::Remove);
        assert_eq!(
            decide(None, 10, true, false),
            MergeDecision::Skip(SkipReason::Absent)
        );
    }

    #[tokio::test]
    async fn first_pull_sends_no_cursor_and_inserts_records() {
        let store = store();
        let entry_id = LocalId::new();
        let response = PullResponse {
            entries: vec![remote_entry(entry_id, 50)],
            messages: vec![RemoteMessage {
                server_id: "srv-m".into(),
                local_id: LocalId::new(),
                entry_local_id: entry_id,
                role: MessageRole::Assistant,
                kind: MessageKind::Artifact,
                content: "summary".into(),
                created_at: 2,
                updated_at: 60,
                revision: 40,
                deleted: false,
            }],
            synced_at: 100,
        };
        let remote = ScriptedRemote::new(Some(response));

        let report = PullReconciler::new(&store, &remote, "owner-1")
            .pull()
            .await
            .unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.cursor, Some(50));
        assert_eq!(remote.requests.lock().unwrap()[0].since, None);

        let entry = store.get_entry(&entry_id).unwrap().unwrap();
        assert_eq!(entry.sync_status, SyncStatus::Synced);
        assert_eq!(entry.title.as_deref(), Some("From remote"));
        assert_eq!(store.list_messages(&entry_id).unwrap().len(), 1);
        assert!(store.queue_items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_local_edit_is_not_clobbered() {
        let store = store();
        let local = store
            .create_entry("owner-1", crate::models::NewEntry::new(EntryCategory::Plan))
            .unwrap();
        let response = PullResponse {
            entries: vec![remote_entry(local.local_id, local.updated_at + 1_000)],
            messages: Vec::new(),
            synced_at: local.updated_at + 2_000,
        };
        let remote = ScriptedRemote::new(Some(response));

        let report = PullReconciler::new(&store, &remote, "owner-1")
            .pull()
            .await
            .unwrap();

        assert_eq!(report.skipped_pending, 1);
        let unchanged = store.get_entry(&local.local_id).unwrap().unwrap();
        assert_eq!(unchanged.category, EntryCategory::Plan);
        assert_eq!(unchanged.sync_status, SyncStatus::Pending);
        assert_eq!(report.cursor, Some(local.updated_at + 1_000));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_cursor() {
        let store = store();
        store
            .write(|tx| StateRepository::new(tx).advance_pull_cursor(42).map(|_| ()))
            .unwrap();
        let remote = ScriptedRemote::new(None);

        let result = PullReconciler::new(&store, &remote, "owner-1").pull().await;

        assert!(result.is_err());
        assert_eq!(store.pull_cursor().unwrap(), Some(42));
        assert_eq!(remote.requests.lock().unwrap()[0].since, Some(42));
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let store = store();
        store
            .write(|tx| StateRepository::new(tx).advance_pull_cursor(500).map(|_| ()))
            .unwrap();
        let response = PullResponse {
            entries: vec![remote_entry(LocalId::new(), 300)],
            messages: Vec::new(),
            synced_at: 600,
        };
        let remote = ScriptedRemote::new(Some(response));

        let report = PullReconciler::new(&store, &remote, "owner-1")
            .pull()
            .await
            .unwrap();
        assert_eq!(report.cursor, Some(500));
    }

    #[tokio::test]
    async fn tombstone_removes_synced_entry_and_orphans_are_skipped() {
        let store = store();
        let entry_id = LocalId::new();
        let seed = ScriptedRemote::new(Some(PullResponse {
            entries: vec![remote_entry(entry_id, 10)],
            messages: Vec::new(),
            synced_at: 10,
        }));
        PullReconciler::new(&store, &seed, "owner-1")
            .pull()
            .await
            .unwrap();

        let mut tombstone = remote_entry(entry_id, 20);
        tombstone.deleted = true;
        let orphan = RemoteMessage {
            server_id: "srv-o".into(),
            local_id: LocalId::new(),
            entry_local_id: LocalId::new(),
            role: MessageRole::User,
            kind: MessageKind::Text,
            content: "lost".into(),
            created_at: 5,
            updated_at: 25,
            revision: 25,
            deleted: false,
        };
        let remote = ScriptedRemote::new(Some(PullResponse {
            entries: vec![tombstone],
            messages: vec![orphan],
            synced_at: 30,
        }));

        let report = PullReconciler::new(&store, &remote, "owner-1")
            .pull()
            .await
            .unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.skipped_other, 1);
        assert!(store.get_entry(&entry_id).unwrap().is_none());
        assert_eq!(report.cursor, Some(25));
    }
}
