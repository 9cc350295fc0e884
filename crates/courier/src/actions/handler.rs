//! Action handler for mailbox mutations
//!
//! Coordinates between the remote mailbox and local storage for mutations.

use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::error::SyncError;
use crate::gmail::{MailboxClient, OutgoingMessage};
use crate::models::{MessageId, ThreadId, UserId, labels};
use crate::storage::Repository;

/// Outcome of a label change applied to every message of a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelChange {
    pub thread_id: ThreadId,
    pub messages_updated: usize,
    /// Per-message provider calls that failed (logged, not fatal)
    pub messages_failed: usize,
}

/// Handler for read and star changes plus sending
///
/// Label changes are performed in two steps:
/// 1. Call the provider for each stored message of the thread, concurrently
/// 2. Update the local thread row, regardless of individual call failures
pub struct ActionHandler {
    mailbox: Arc<dyn MailboxClient>,
    repo: Arc<dyn Repository>,
    pool: rayon::ThreadPool,
}

impl ActionHandler {
    /// Create a handler whose label calls fan out over `fanout` threads
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        repo: Arc<dyn Repository>,
        fanout: usize,
    ) -> Result<Self, SyncError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(fanout.max(1))
            .thread_name(|i| format!("courier-labels-{i}"))
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build label pool: {e}")))?;
        Ok(Self {
            mailbox,
            repo,
            pool,
        })
    }

    /// Remove `UNREAD` from every message and mark the thread row read
    pub fn mark_thread_read(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
    ) -> Result<LabelChange, SyncError> {
        let change = self.apply_to_messages(user_id, thread_id, &[], &[labels::UNREAD])?;
        self.repo.set_thread_read(user_id, thread_id, true)?;
        info!(
            "[ACTIONS] Marked thread {} read for user {} ({} of {} messages)",
            thread_id,
            user_id,
            change.messages_updated,
            change.messages_updated + change.messages_failed
        );
        Ok(change)
    }

    /// Add or remove `STARRED` on every message and update the thread row
    pub fn set_starred(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
        starred: bool,
    ) -> Result<LabelChange, SyncError> {
        let change = if starred {
            self.apply_to_messages(user_id, thread_id, &[labels::STARRED], &[])?
        } else {
            self.apply_to_messages(user_id, thread_id, &[], &[labels::STARRED])?
        };
        self.repo.set_thread_starred(user_id, thread_id, starred)?;
        info!(
            "[ACTIONS] {} thread {} for user {}",
            if starred { "Starred" } else { "Unstarred" },
            thread_id,
            user_id
        );
        Ok(change)
    }

    /// Send a composed message, optionally into an existing thread.
    ///
    /// The sent copy is mirrored by the next sync pass.
    pub fn send_message(
        &self,
        message: &OutgoingMessage,
        thread_id: Option<&ThreadId>,
    ) -> Result<MessageId, SyncError> {
        if message.to.is_empty() {
            return Err(SyncError::InvalidArgument(
                "message needs at least one recipient".to_string(),
            ));
        }
        let raw = message
            .to_mime()
            .map_err(|e| SyncError::Internal(format!("failed to compose message: {e}")))?;
        let id = self.mailbox.send_message(&raw, thread_id)?;
        info!("[ACTIONS] Sent message {}", id);
        Ok(id)
    }

    /// Best-effort label change on each stored message of a known thread
    fn apply_to_messages(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
        add: &[&str],
        remove: &[&str],
    ) -> Result<LabelChange, SyncError> {
        if self.repo.get_thread(user_id, thread_id)?.is_none() {
            return Err(SyncError::NotFound(format!("thread {thread_id}")));
        }

        let message_ids: Vec<MessageId> = self
            .repo
            .list_messages_for_thread(user_id, thread_id)?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mailbox = &self.mailbox;
        let failed = self.pool.install(|| {
            message_ids
                .par_iter()
                .filter(|id| match mailbox.modify_labels(id, add, remove) {
                    Ok(()) => false,
                    Err(e) => {
                        warn!(
                            "[ACTIONS] Label change on message {} in thread {} for user {} failed: {}",
                            id, thread_id, user_id, e
                        );
                        true
                    }
                })
                .count()
        });

        Ok(LabelChange {
            thread_id: thread_id.clone(),
            messages_updated: message_ids.len() - failed,
            messages_failed: failed,
        })
    }
}
