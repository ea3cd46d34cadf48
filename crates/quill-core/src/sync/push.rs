//! Push reconciliation: queue snapshot -> apply endpoint -> queue bookkeeping.

use std::collections::HashSet;

use super::error::{SyncError, SyncResult};
use super::schedule::PendingIndex;
use super::transport::RemoteStore;
use super::wire::{ApplyResult, WireOperation};
use crate::models::{EntityKey, Operation, QueueItem};
use crate::store::LocalStore;

/// Outcome of one push batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Operations sent in the batch
    pub sent: usize,
    /// Operations acknowledged and removed from the queue
    pub succeeded: usize,
    /// Entities whose operation failed in this batch
    pub failed: Vec<EntityKey>,
    /// Batch-level error, when the whole request failed
    pub error: Option<String>,
}

impl PushReport {
    /// True when there was nothing eligible to send
    pub const fn is_empty(&self) -> bool {
        self.sent == 0
    }
}

/// Drains eligible queue items to the remote store, one batch per call.
pub struct PushReconciler<'a, R> {
    store: &'a LocalStore,
    remote: &'a R,
    batch_size: usize,
}

impl<'a, R: RemoteStore> PushReconciler<'a, R> {
    /// Create a reconciler sending at most `batch_size` operations per request
    pub fn new(store: &'a LocalStore, remote: &'a R, batch_size: usize) -> Self {
        Self {
            store,
            remote,
            batch_size: batch_size.max(1),
        }
    }

    /// Take the queue snapshot a drain cycle works through.
    pub fn snapshot(&self) -> SyncResult<PendingIndex> {
        Ok(PendingIndex::new(self.store.queue_items()?))
    }

    /// Send one batch selected from `pending`.
    ///
    /// Entities in `exclude` are skipped. Acknowledged items are resolved out
    /// of `pending`. Remote failures are recorded on the queue items and
    /// reported; only local store errors are returned as `Err`.
    pub async fn push_batch(
        &self,
        pending: &mut PendingIndex,
        exclude: &HashSet<EntityKey>,
    ) -> SyncResult<PushReport> {
        let policy = self.store.retry_policy();
        let batch = pending.next_batch(policy, exclude, self.batch_size);
        if batch.is_empty() {
            return Ok(PushReport::default());
        }

        let operations: Vec<WireOperation> = batch.iter().map(WireOperation::from).collect();
        tracing::debug!(
            batch = batch.len(),
            queued = pending.eligible_count(policy),
            "Pushing sync batch"
        );

        let results = match self.remote.apply(&operations).await {
            Ok(results) => results,
            Err(error) => return self.fail_batch(&batch, &error),
        };
        if let Err(error) = validate_results(&batch, &results) {
            return self.fail_batch(&batch, &error);
        }

        let mut report = PushReport {
            sent: batch.len(),
            ..PushReport::default()
        };
        for (item, result) in batch.iter().zip(&results) {
            match outcome(item, result) {
                Ok(server_id) => {
                    self.store.acknowledge(item, server_id)?;
                    pending.resolve(item.id);
                    report.succeeded += 1;
                }
                Err(message) => {
                    tracing::debug!(entity = %item.key(), "Remote rejected operation: {message}");
                    self.store.record_failure(item, &message)?;
                    report.failed.push(item.key());
                }
            }
        }

        Ok(report)
    }

    fn fail_batch(&self, batch: &[QueueItem], error: &SyncError) -> SyncResult<PushReport> {
        let message = error.to_string();
        tracing::warn!(batch = batch.len(), "Sync batch failed: {message}");
        self.store.record_batch_failure(batch, &message)?;

        Ok(PushReport {
            sent: batch.len(),
            succeeded: 0,
            failed: batch.iter().map(QueueItem::key).collect(),
            error: Some(message),
        })
    }
}

/// A response must hold one result per operation, in request order.
fn validate_results(batch: &[QueueItem], results: &[ApplyResult]) -> Result<(), SyncError> {
    if results.len() != batch.len() {
        return Err(SyncError::Protocol(format!(
            "expected {} results, got {}",
            batch.len(),
            results.len()
        )));
    }
    if let Some((item, result)) = batch
        .iter()
        .zip(results)
        .find(|(item, result)| item.local_id != result.local_id)
    {
        return Err(SyncError::Protocol(format!(
            "result for {} does not match operation for {}",
            result.local_id, item.local_id
        )));
    }
    Ok(())
}

/// Server id to record on success, or the failure message.
fn outcome<'r>(item: &QueueItem, result: &'r ApplyResult) -> Result<Option<&'r str>, String> {
    if !result.success {
        return Err(result
            .error
            .clone()
            .unwrap_or_else(|| "rejected by remote store".to_string()));
    }
    match (item.operation, result.server_id.as_deref()) {
        (Operation::Create, None) => Err("create acknowledged without a server id".to_string()),
        (_, server_id) => Ok(server_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, EntryCategory, NewEntry, SyncStatus};
    use crate::sync::memory::MemoryRemote;
    use crate::sync::RetryPolicy;
    use serde_json::json;

    fn store() -> LocalStore {
        LocalStore::open_in_memory(RetryPolicy::new(3)).unwrap()
    }

    fn queued_item(local_id: crate::models::LocalId, operation: Operation) -> QueueItem {
        QueueItem {
            id: 1,
            operation,
            entity_type: EntityType::Entry,
            local_id,
            payload: json!({}),
            attempts: 0,
            last_attempt: None,
            error: None,
            created_at: 1,
        }
    }

    async fn push_once(store: &LocalStore, remote: &MemoryRemote) -> PushReport {
        let push = PushReconciler::new(store, remote, 10);
        let mut pending = push.snapshot().unwrap();
        push.push_batch(&mut pending, &HashSet::new()).await.unwrap()
    }

    #[tokio::test]
    async fn successful_batch_clears_queue_and_assigns_server_ids() {
        let store = store();
        let remote = MemoryRemote::new();
        let entry = store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();

        let report = push_once(&store, &remote).await;

        assert_eq!(report.sent, 1);
        assert_eq!(report.succeeded, 1);
        assert!(store.queue_items().unwrap().is_empty());
        let synced = store.get_entry(&entry.local_id).unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert!(synced.server_id.is_some());
    }

    #[tokio::test]
    async fn transport_failure_fails_every_item() {
        let store = store();
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();
        store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Plan))
            .unwrap();

        let report = push_once(&store, &remote).await;

        assert_eq!(report.failed.len(), 2);
        assert!(report.error.is_some());
        for item in store.queue_items().unwrap() {
            assert_eq!(item.attempts, 1);
            assert!(item.last_attempt.is_some());
            assert!(item.error.is_some());
        }
    }

    #[tokio::test]
    async fn rejected_item_is_retried_and_others_succeed() {
        let store = store();
        let remote = MemoryRemote::new();
        let rejected = store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();
        let accepted = store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Plan))
            .unwrap();
        remote.reject(rejected.local_id, "validation failed");

        let report = push_once(&store, &remote).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(
            report.failed,
            vec![EntityKey::new(EntityType::Entry, rejected.local_id)]
        );
        let remaining = store.queue_items().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_id, rejected.local_id);
        assert_eq!(remaining[0].error.as_deref(), Some("validation failed"));
        assert_eq!(
            store
                .get_entry(&accepted.local_id)
                .unwrap()
                .unwrap()
                .sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn empty_queue_sends_nothing() {
        let store = store();
        let remote = MemoryRemote::new();
        let report = push_once(&store, &remote).await;
        assert!(report.is_empty());
        assert_eq!(remote.apply_calls(), 0);
    }

    #[tokio::test]
    async fn snapshot_ignores_items_queued_after_it() {
        let store = store();
        let remote = MemoryRemote::new();
        let entry = store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();
        let push = PushReconciler::new(&store, &remote, 10);
        let mut pending = push.snapshot().unwrap();

        let late = store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Plan))
            .unwrap();
        store
            .update_entry(
                &entry.local_id,
                &crate::models::EntryChanges::default().title("Later"),
            )
            .unwrap();

        let first = push.push_batch(&mut pending, &HashSet::new()).await.unwrap();
        let second = push.push_batch(&mut pending, &HashSet::new()).await.unwrap();

        assert_eq!(first.succeeded, 1);
        assert!(second.is_empty());
        assert!(pending.is_empty());
        let left: Vec<_> = store
            .queue_items()
            .unwrap()
            .iter()
            .map(|item| (item.local_id, item.operation))
            .collect();
        assert_eq!(
            left,
            vec![
                (late.local_id, Operation::Create),
                (entry.local_id, Operation::Update),
            ]
        );
    }

    #[test]
    fn results_must_align_with_batch() {
        let id = crate::models::LocalId::new();
        let batch = vec![queued_item(id, Operation::Update)];

        assert!(validate_results(&batch, &[]).is_err());
        assert!(validate_results(
            &batch,
            &[ApplyResult::ok(crate::models::LocalId::new(), None)]
        )
        .is_err());
        assert!(validate_results(&batch, &[ApplyResult::ok(id, None)]).is_ok());
    }

    #[test]
    fn create_without_server_id_is_a_failure() {
        let id = crate::models::LocalId::new();
        let create = queued_item(id, Operation::Create);
        let update = queued_item(id, Operation::Update);

        assert!(outcome(&create, &ApplyResult::ok(id, None)).is_err());
        assert_eq!(outcome(&update, &ApplyResult::ok(id, None)), Ok(None));
        assert_eq!(
            outcome(&create, &ApplyResult::ok(id, Some("srv".into()))),
            Ok(Some("srv"))
        );
    }
}
