//! Transport abstraction for the remote store.

use std::future::Future;

use super::error::SyncResult;
use super::wire::{ApplyResult, PullRequest, PullResponse, WireOperation};

/// The authoritative remote store.
///
/// Abstracts the network so the reconcilers can run against HTTP or an
/// in-memory ledger in tests.
pub trait RemoteStore: Send + Sync {
    /// Apply a batch of operations, returning one result per operation in
    /// request order. An `Err` means the batch as a whole did not go through.
    fn apply(
        &self,
        operations: &[WireOperation],
    ) -> impl Future<Output = SyncResult<Vec<ApplyResult>>> + Send;

    /// Fetch every record changed after `request.since` in the owner's scope.
    fn pull(&self, request: &PullRequest) -> impl Future<Output = SyncResult<PullResponse>> + Send;
}
