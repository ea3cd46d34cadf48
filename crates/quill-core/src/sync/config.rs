//! Configuration for the sync engine.

use std::time::Duration;

/// Attempts after which a queue item is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Queue items sent per apply request.
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 100;
/// Push rounds per drain cycle.
pub const DEFAULT_MAX_PUSH_ROUNDS: usize = 8;
/// Remote request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds how often a queued operation is attempted.
///
/// Failures are retried uniformly: the policy does not distinguish transient
/// from permanent rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before an item is abandoned.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt limit (at least one).
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether an item with this many attempts may still be sent.
    #[must_use]
    pub const fn is_eligible(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Whether an item with this many attempts has been given up on.
    #[must_use]
    pub const fn is_abandoned(&self, attempts: u32) -> bool {
        !self.is_eligible(attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Configuration for sync operations.
///
/// The attempt limit is not part of this: it belongs to the [`LocalStore`]
/// whose queue it governs.
///
/// [`LocalStore`]: crate::LocalStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Owner whose records are pulled.
    pub owner_id: String,
    /// Maximum items per apply request.
    pub push_batch_size: usize,
    /// Maximum push rounds per drain cycle.
    pub max_push_rounds: usize,
    /// Interval for automatic drains.
    pub sync_interval: Option<Duration>,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Whether a drain ends with a pull.
    pub pull_after_push: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration for an owner.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            max_push_rounds: DEFAULT_MAX_PUSH_ROUNDS,
            sync_interval: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pull_after_push: true,
        }
    }

    /// Sets the push batch size.
    #[must_use]
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the number of push rounds per drain.
    #[must_use]
    pub fn with_max_push_rounds(mut self, rounds: usize) -> Self {
        self.max_push_rounds = rounds.max(1);
        self
    }

    /// Sets the sync interval for automatic drains.
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables the pull at the end of each drain.
    #[must_use]
    pub const fn with_pull_after_push(mut self, enabled: bool) -> Self {
        self.pull_after_push = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("owner-1")
            .with_push_batch_size(25)
            .with_max_push_rounds(0)
            .with_request_timeout(Duration::from_secs(60))
            .with_pull_after_push(false);

        assert_eq!(config.owner_id, "owner-1");
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.max_push_rounds, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(!config.pull_after_push);
        assert!(config.sync_interval.is_none());
    }

    #[test]
    fn retry_policy_abandons_at_max() {
        let policy = RetryPolicy::default();
        assert!(policy.is_eligible(0));
        assert!(policy.is_eligible(4));
        assert!(policy.is_abandoned(5));
        assert!(policy.is_abandoned(6));
    }

    #[test]
    fn retry_policy_allows_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
