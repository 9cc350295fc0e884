//! Thread model representing a mirrored Gmail conversation

use super::{EmailAddress, LabelFlags, ThreadId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A thread groups one or more messages. Unique per `(user_id, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailThread {
    pub user_id: UserId,
    /// Gmail thread id
    pub id: ThreadId,
    pub subject: String,
    pub snippet: Option<String>,
    /// Latest `sent_at` among the thread's messages
    pub last_message_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    /// Union of the labels carried by the thread's messages
    pub labels: BTreeSet<String>,
    /// Senders, unique by email, in first-seen order
    pub participants: Vec<EmailAddress>,
    pub message_count: usize,
}

impl MailThread {
    /// Recompute `is_read` / `is_starred` from `labels`
    pub fn apply_label_flags(&mut self) {
        let flags = LabelFlags::from_labels(&self.labels);
        self.is_read = flags.is_read;
        self.is_starred = flags.is_starred;
    }

    /// Add a participant unless one with the same email is already present
    pub fn add_participant(&mut self, participant: &EmailAddress) {
        if !self
            .participants
            .iter()
            .any(|p| p.email == participant.email)
        {
            self.participants.push(participant.clone());
        }
    }
}
