//! Sync coordinator: connectivity signal, drain triggering, and the
//! single-drain guarantee.
//!
//! The coordinator's state is a plain value advanced by a pure transition
//! function; the async shell only executes the commands it emits.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use super::config::SyncConfig;
use super::error::SyncResult;
use super::pull::{PullReconciler, PullReport};
use super::push::PushReconciler;
use super::transport::RemoteStore;
use crate::store::LocalStore;
use crate::util::now_millis;

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    Online,
    #[default]
    Offline,
}

/// Whether a drain cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Draining,
}

/// Inputs to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The platform reported a connectivity change
    ConnectivityChanged(Connectivity),
    /// Something asked for a drain (user action, timer, app foreground)
    DrainRequested,
    /// The running drain cycle ended, successfully or not
    DrainFinished,
}

/// Work the coordinator asks its shell to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartDrain,
}

/// The coordinator's complete state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorState {
    pub connectivity: Connectivity,
    pub phase: Phase,
}

impl CoordinatorState {
    /// Advance the state by one event.
    ///
    /// A drain starts on an offline to online transition or on request while
    /// online. Triggers that arrive while draining are dropped, not queued.
    #[must_use]
    pub const fn on_event(self, event: SyncEvent) -> (Self, Option<Command>) {
        match (event, self.phase) {
            (SyncEvent::ConnectivityChanged(Connectivity::Online), Phase::Idle)
                if matches!(self.connectivity, Connectivity::Offline) =>
            {
                (
                    Self {
                        connectivity: Connectivity::Online,
                        phase: Phase::Draining,
                    },
                    Some(Command::StartDrain),
                )
            }
            (SyncEvent::ConnectivityChanged(connectivity), phase) => (
                Self {
                    connectivity,
                    phase,
                },
                None,
            ),
            (SyncEvent::DrainRequested, Phase::Idle)
                if matches!(self.connectivity, Connectivity::Online) =>
            {
                (
                    Self {
                        connectivity: self.connectivity,
                        phase: Phase::Draining,
                    },
                    Some(Command::StartDrain),
                )
            }
            (SyncEvent::DrainRequested, _) => (self, None),
            (SyncEvent::DrainFinished, _) => (
                Self {
                    connectivity: self.connectivity,
                    phase: Phase::Idle,
                },
                None,
            ),
        }
    }

    /// Returns true while a drain cycle is running.
    pub const fn is_draining(&self) -> bool {
        matches!(self.phase, Phase::Draining)
    }

    /// Returns true when the platform reports connectivity.
    pub const fn is_online(&self) -> bool {
        matches!(self.connectivity, Connectivity::Online)
    }
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Push rounds that sent a batch
    pub rounds: usize,
    /// Operations acknowledged
    pub pushed: usize,
    /// Operation attempts that failed
    pub failed: usize,
    /// Pull outcome, when a pull ran and succeeded
    pub pull: Option<PullReport>,
    /// Last remote error seen during the cycle
    pub last_error: Option<String>,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Total number of drain cycles completed.
    pub cycles_completed: u64,
    /// Total number of operations acknowledged by the remote.
    pub operations_pushed: u64,
    /// Total number of failed operation attempts.
    pub operations_failed: u64,
    /// Total number of remote records received by pulls.
    pub records_pulled: u64,
    /// Last time a cycle completed (Unix ms).
    pub last_sync_at: Option<i64>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Owns the online/offline signal and runs at most one drain at a time.
pub struct SyncCoordinator<R> {
    store: LocalStore,
    remote: R,
    config: SyncConfig,
    state: Mutex<CoordinatorState>,
    stats: Mutex<SyncStats>,
}

/// Returns the coordinator to idle when a drain ends, even if cancelled.
struct DrainGuard<'a, R> {
    coordinator: &'a SyncCoordinator<R>,
}

impl<R> Drop for DrainGuard<'_, R> {
    fn drop(&mut self) {
        self.coordinator.transition(SyncEvent::DrainFinished);
    }
}

type DrainFuture<'a> = Pin<Box<dyn Future<Output = SyncResult<DrainReport>> + Send + 'a>>;

impl<R> SyncCoordinator<R> {
    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The local store this coordinator drains.
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The remote store this coordinator talks to.
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    fn transition(&self, event: SyncEvent) -> Option<Command> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, command) = state.on_event(event);
        if next != *state {
            tracing::debug!(?event, from = ?*state, to = ?next, "Sync coordinator transition");
        }
        *state = next;
        command
    }
}

impl<R: RemoteStore> SyncCoordinator<R> {
    /// Creates a coordinator that starts offline and idle.
    pub fn new(store: LocalStore, remote: R, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            state: Mutex::new(CoordinatorState::default()),
            stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Feed one event to the state machine and run the drain it triggers.
    ///
    /// Returns `None` when the event did not start a drain.
    pub async fn handle(&self, event: SyncEvent) -> SyncResult<Option<DrainReport>> {
        match self.transition(event) {
            Some(Command::StartDrain) => self.start_drain().await.map(Some),
            None => Ok(None),
        }
    }

    /// Report connectivity; going online starts a drain.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<DrainReport>> {
        let connectivity = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        self.handle(SyncEvent::ConnectivityChanged(connectivity)).await
    }

    /// Ask for a drain; ignored while offline or already draining.
    pub async fn request_drain(&self) -> SyncResult<Option<DrainReport>> {
        self.handle(SyncEvent::DrainRequested).await
    }

    /// Consume events until the sender side closes.
    ///
    /// With `sync_interval` configured, a drain is also requested on every
    /// tick. Events that arrive mid-drain are applied immediately, so a
    /// trigger during a drain is dropped rather than queued.
    pub async fn run(&self, mut events: mpsc::Receiver<SyncEvent>) {
        let mut ticker = self.config.sync_interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut drain: Option<DrainFuture<'_>> = None;

        loop {
            tokio::select! {
                result = poll_drain(&mut drain), if drain.is_some() => {
                    drain = None;
                    if let Err(error) = result {
                        tracing::warn!("Sync drain failed: {error}");
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Some(Command::StartDrain) = self.transition(event) {
                        drain = Some(Box::pin(self.start_drain()));
                    }
                }
                () = next_tick(&mut ticker) => {
                    if let Some(Command::StartDrain) = self.transition(SyncEvent::DrainRequested) {
                        drain = Some(Box::pin(self.start_drain()));
                    }
                }
            }
        }

        if let Some(in_flight) = drain {
            if let Err(error) = in_flight.await {
                tracing::warn!("Sync drain failed: {error}");
            }
        }
        tracing::debug!("Sync coordinator stopped");
    }

    /// The state must already be `Draining`; the guard is armed before the
    /// returned future is first polled.
    fn start_drain(&self) -> impl Future<Output = SyncResult<DrainReport>> + Send + '_ {
        let guard = DrainGuard { coordinator: self };
        async move {
            let result = self.drain_cycle().await;
            self.record_cycle(&result);
            drop(guard);
            result
        }
    }

    async fn drain_cycle(&self) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut exclude = HashSet::new();
        let push = PushReconciler::new(&self.store, &self.remote, self.config.push_batch_size);
        // Writes made while this cycle runs wait for the next one.
        let mut pending = push.snapshot()?;

        for _ in 0..self.config.max_push_rounds {
            let round = push.push_batch(&mut pending, &exclude).await?;
            if round.is_empty() {
                break;
            }

            report.rounds += 1;
            report.pushed += round.succeeded;
            report.failed += round.failed.len();
            if round.error.is_some() {
                report.last_error = round.error;
            }
            exclude.extend(round.failed);
            if round.succeeded == 0 {
                break;
            }
        }

        if self.config.pull_after_push {
            let pull = PullReconciler::new(&self.store, &self.remote, &self.config.owner_id);
            match pull.pull().await {
                Ok(pulled) => report.pull = Some(pulled),
                Err(error) if error.is_local() => return Err(error),
                Err(error) => {
                    tracing::warn!("Sync pull failed: {error}");
                    report.last_error = Some(error.to_string());
                }
            }
        }

        tracing::info!(
            rounds = report.rounds,
            pushed = report.pushed,
            failed = report.failed,
            pulled = report.pull.as_ref().map_or(0, |p| p.fetched),
            "Sync cycle complete"
        );
        Ok(report)
    }

    fn record_cycle(&self, result: &SyncResult<DrainReport>) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(report) => {
                stats.cycles_completed += 1;
                stats.operations_pushed += report.pushed as u64;
                stats.operations_failed += report.failed as u64;
                stats.records_pulled += report.pull.as_ref().map_or(0, |p| p.fetched as u64);
                stats.last_sync_at = Some(now_millis());
                if let Some(error) = &report.last_error {
                    stats.last_error = Some(error.clone());
                }
            }
            Err(error) => stats.last_error = Some(error.to_string()),
        }
    }
}

async fn poll_drain(drain: &mut Option<DrainFuture<'_>>) -> SyncResult<DrainReport> {
    match drain.as_mut() {
        Some(in_flight) => in_flight.await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryCategory, NewEntry, SyncStatus};
    use crate::sync::memory::MemoryRemote;
    use crate::sync::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    fn online_idle() -> CoordinatorState {
        CoordinatorState {
            connectivity: Connectivity::Online,
            phase: Phase::Idle,
        }
    }

    fn coordinator(remote: MemoryRemote) -> SyncCoordinator<MemoryRemote> {
        let store = LocalStore::open_in_memory(RetryPolicy::default()).unwrap();
        SyncCoordinator::new(store, remote, SyncConfig::new("owner-1"))
    }

    #[test]
    fn going_online_starts_a_drain() {
        let (state, command) = CoordinatorState::default()
            .on_event(SyncEvent::ConnectivityChanged(Connectivity::Online));
        assert_eq!(command, Some(Command::StartDrain));
        assert!(state.is_draining());
        assert!(state.is_online());
    }

    #[test]
    fn triggers_while_draining_are_dropped() {
        let (draining, _) = online_idle().on_event(SyncEvent::DrainRequested);
        assert!(draining.is_draining());

        let (still, command) = draining.on_event(SyncEvent::DrainRequested);
        assert_eq!(command, None);
        assert_eq!(still, draining);

        let (offline, _) = draining.on_event(SyncEvent::ConnectivityChanged(Connectivity::Offline));
        let (online_again, command) =
            offline.on_event(SyncEvent::ConnectivityChanged(Connectivity::Online));
        assert_eq!(command, None);
        assert!(online_again.is_draining());
    }

    #[test]
    fn drain_request_while_offline_is_ignored() {
        let (state, command) = CoordinatorState::default().on_event(SyncEvent::DrainRequested);
        assert_eq!(command, None);
        assert_eq!(state, CoordinatorState::default());
    }

    #[test]
    fn drain_finished_always_returns_to_idle() {
        let (draining, _) = online_idle().on_event(SyncEvent::DrainRequested);
        let (idle, command) = draining.on_event(SyncEvent::DrainFinished);
        assert_eq!(idle, online_idle());
        assert_eq!(command, None);
    }

    #[tokio::test]
    async fn set_online_drains_and_returns_to_idle() {
        let coordinator = coordinator(MemoryRemote::new());
        let entry = coordinator
            .store()
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();

        let report = coordinator.set_online(true).await.unwrap().unwrap();

        assert_eq!(report.pushed, 1);
        assert!(report.pull.is_some());
        assert!(!coordinator.state().is_draining());
        let synced = coordinator
            .store()
            .get_entry(&entry.local_id)
            .unwrap()
            .unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(coordinator.stats().cycles_completed, 1);
    }

    #[tokio::test]
    async fn request_while_offline_does_nothing() {
        let remote = MemoryRemote::new();
        let coordinator = coordinator(remote.clone());
        assert_eq!(coordinator.request_drain().await.unwrap(), None);
        assert_eq!(remote.apply_calls(), 0);
        assert_eq!(remote.pull_calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_drain_returns_to_idle() {
        let remote = MemoryRemote::new();
        remote.set_latency(Some(Duration::from_secs(60)));
        let coordinator = coordinator(remote);
        coordinator
            .store()
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();

        let drain = coordinator.set_online(true);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), drain).await;

        assert!(timed_out.is_err());
        assert!(!coordinator.state().is_draining());
        assert!(coordinator.state().is_online());
    }

    #[tokio::test]
    async fn concurrent_trigger_does_not_start_second_drain() {
        let remote = MemoryRemote::new();
        remote.set_latency(Some(Duration::from_millis(50)));
        let coordinator = Arc::new(coordinator(remote.clone()));
        coordinator
            .store()
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.set_online(true).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.state().is_draining());

        assert_eq!(coordinator.request_drain().await.unwrap(), None);
        let report = first.await.unwrap().unwrap().unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(remote.apply_calls(), 1);
        assert_eq!(remote.pull_calls(), 1);
    }

    #[tokio::test]
    async fn write_during_drain_waits_for_next_drain() {
        let remote = MemoryRemote::new();
        remote.set_latency(Some(Duration::from_millis(50)));
        let coordinator = Arc::new(coordinator(remote.clone()));
        let store = coordinator.store().clone();
        store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.set_online(true).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let late = store
            .create_entry("owner-1", NewEntry::new(EntryCategory::Plan))
            .unwrap();
        let report = first.await.unwrap().unwrap().unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(report.rounds, 1);
        assert_eq!(remote.apply_calls(), 1);
        let queued = store.queue_items().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].local_id, late.local_id);
        assert_eq!(queued[0].attempts, 0);

        let report = coordinator.request_drain().await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(
            store.get_entry(&late.local_id).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn run_loop_drains_on_events_and_stops_when_closed() {
        let remote = MemoryRemote::new();
        let coordinator = coordinator(remote.clone());
        coordinator
            .store()
            .create_entry("owner-1", NewEntry::new(EntryCategory::Journal))
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(SyncEvent::ConnectivityChanged(Connectivity::Online))
            .await
            .unwrap();
        drop(tx);

        coordinator.run(rx).await;

        assert!(coordinator.store().queue_items().unwrap().is_empty());
        assert!(!coordinator.state().is_draining());
        assert_eq!(remote.apply_calls(), 1);
    }
}
