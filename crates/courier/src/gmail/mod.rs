//! Gmail API integration
//!
//! This module provides:
//! - The `MailboxClient` seam the sync coordinator talks to
//! - A Gmail REST v1 implementation over the shared transport
//! - Decoding of raw message payloads into domain records
//! - MIME composition for outbound messages

mod client;
mod compose;
mod decode;

pub use client::{GmailClient, thread_ids_from_history};
pub use compose::OutgoingMessage;
pub use decode::{DecodedMessage, MessageDecoder};
pub(crate) use decode::decode_html_entities;

use crate::error::SyncError;
use crate::models::{CursorToken, MessageId, ThreadId};

/// One page of thread references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPage {
    pub thread_ids: Vec<ThreadId>,
    pub next_page_token: Option<String>,
}

/// Thread ids touched since a cursor, in change-record order (may repeat)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBatch {
    pub thread_ids: Vec<ThreadId>,
    /// Cursor to store once the batch has been applied
    pub cursor: CursorToken,
}

/// Mailbox identity and current position in the change stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxProfile {
    pub email: Option<String>,
    pub cursor: CursorToken,
}

/// Remote mailbox operations used by sync and actions
pub trait MailboxClient: Send + Sync {
    /// List thread references, newest first
    fn list_threads(
        &self,
        page_token: Option<&str>,
        max_results: usize,
        label_ids: &[&str],
    ) -> Result<ThreadPage, SyncError>;

    /// Fetch a thread with every message in full format
    fn get_thread(&self, id: &ThreadId) -> Result<api::GmailThread, SyncError>;

    /// Changes since `cursor`.
    ///
    /// Returns [`SyncError::CursorExpired`] when the cursor is outside the
    /// provider's retention window.
    fn get_history(&self, cursor: &CursorToken) -> Result<HistoryBatch, SyncError>;

    /// Send raw RFC 2822 bytes, optionally inside an existing thread
    fn send_message(&self, raw: &[u8], thread_id: Option<&ThreadId>)
    -> Result<MessageId, SyncError>;

    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str])
    -> Result<(), SyncError>;

    fn get_profile(&self) -> Result<MailboxProfile, SyncError>;
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing threads
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListThreadsResponse {
        pub threads: Option<Vec<ThreadRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a thread
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadRef {
        pub id: String,
        pub snippet: Option<String>,
        pub history_id: Option<String>,
    }

    /// Full thread from Gmail API
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailThread {
        pub id: String,
        pub snippet: Option<String>,
        pub history_id: Option<String>,
        pub messages: Option<Vec<GmailMessage>>,
    }

    /// Full message from Gmail API
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        /// Receipt time in epoch milliseconds, as a decimal string
        pub internal_date: Option<String>,
        pub payload: Option<MessagePart>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body: inline base64url data or a reference to an attachment
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Node of the MIME part tree; the top-level payload is also a part
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Response from the history list endpoint
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// A single change record
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: Option<String>,
        pub messages_added: Option<Vec<HistoryMessage>>,
        pub messages_deleted: Option<Vec<HistoryMessage>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
        pub labels_removed: Option<Vec<HistoryLabelChange>>,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: MessageRef,
        pub label_ids: Option<Vec<String>>,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: Option<String>,
        pub history_id: String,
        pub messages_total: Option<u64>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendRequest {
        pub raw: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub thread_id: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendResponse {
        pub id: String,
        pub thread_id: Option<String>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ModifyRequest {
        pub add_label_ids: Vec<String>,
        pub remove_label_ids: Vec<String>,
    }
}
