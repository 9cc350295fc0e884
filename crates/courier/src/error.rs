//! Error taxonomy for provider calls and sync passes

use std::time::Duration;

/// Counters accumulated by a pass before it was aborted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PassCounts {
    pub threads_processed: usize,
    pub messages_processed: usize,
    pub messages_inserted: usize,
    pub threads_failed: usize,
    /// Messages dropped because they could not be decoded
    pub messages_skipped: usize,
}

/// Errors surfaced by the engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credential missing, expired beyond refresh, or revoked
    #[error("Authentication required: {0}")]
    Auth(String),

    /// History cursor is older than the provider's retention window
    #[error("History cursor expired or invalid")]
    CursorExpired,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout, connection failure, 5xx or rate limiting
    #[error("Transient network error: {message}")]
    Transient {
        message: String,
        /// Server-provided `Retry-After`, when present
        retry_after: Option<Duration>,
    },

    #[error("Provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Failed to decode message {message_id}: {reason}")]
    Decode { message_id: String, reason: String },

    /// Another pass for the same user holds the sync lease
    #[error("A mail sync is already running for user {0}")]
    AlreadyRunning(String),

    /// The pass was overtaken after its lease ran out; its writes were dropped
    #[error("Mail sync lease for user {0} was taken over by another pass")]
    LeaseLost(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Local failure unrelated to the provider or the store
    #[error("Internal error: {0}")]
    Internal(String),

    /// A pass stopped on an unrecoverable error after partial progress
    #[error("Sync aborted after {} threads: {source}", .counts.threads_processed)]
    Aborted {
        counts: PassCounts,
        #[source]
        source: Box<SyncError>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    pub fn transient(message: impl Into<String>) -> Self {
        SyncError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the retry loop should try again
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    /// Whether the caller should prompt for re-authorization
    pub fn is_auth(&self) -> bool {
        match self {
            SyncError::Auth(_) => true,
            SyncError::Aborted { source, .. } => source.is_auth(),
            _ => false,
        }
    }

    /// Errors that stop a whole pass rather than a single thread
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_)
                | SyncError::Storage(_)
                | SyncError::LeaseLost(_)
                | SyncError::Aborted { .. }
        )
    }
}
