//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the remote store.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// Remote store rejected the request.
    #[error("remote error: {0}")]
    Remote(String),

    /// Response did not match the apply/pull contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local store error during sync.
    #[error("local store error: {0}")]
    Local(#[from] crate::Error),

    /// Sync settings are missing.
    #[error("sync is not configured: {0}")]
    NotConfigured(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failed request may succeed when repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Remote(_) => true,
            Self::Protocol(_) | Self::Local(_) | Self::NotConfigured(_) => false,
        }
    }

    /// Returns true if the error came from this device rather than the network.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}
