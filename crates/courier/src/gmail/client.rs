//! Gmail API HTTP client
//!
//! Implements [`MailboxClient`] against Gmail REST v1.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use base64::prelude::*;
use log::debug;
use serde::de::IgnoredAny;

use super::api::{
    GmailThread, HistoryRecord, HistoryResponse, ListThreadsResponse, ModifyRequest,
    ProfileResponse, SendRequest, SendResponse,
};
use super::{HistoryBatch, MailboxClient, MailboxProfile, ThreadPage};
use crate::error::SyncError;
use crate::http::ApiTransport;
use crate::models::{CursorToken, MessageId, ThreadId};

/// Gmail caps `maxResults` for list endpoints
const MAX_PAGE_SIZE: usize = 500;

/// Change types requested from the history endpoint
const HISTORY_TYPES: &[&str] = &["messageAdded", "messageDeleted", "labelAdded", "labelRemoved"];

/// Gmail API client
pub struct GmailClient {
    transport: ApiTransport,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    pub const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a new Gmail client
    pub fn new(transport: ApiTransport) -> Self {
        Self::with_base_url(transport, Self::BASE_URL)
    }

    pub fn with_base_url(transport: ApiTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{}", self.base_url, path)
    }

    /// One page of history since `start_history_id`
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, SyncError> {
        let mut url = self.url(&format!(
            "history?startHistoryId={}",
            urlencoding::encode(start_history_id)
        ));
        for history_type in HISTORY_TYPES {
            url.push_str(&format!("&historyTypes={}", history_type));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        match self.transport.get_json(&url, "list history") {
            Err(SyncError::NotFound(_)) => Err(SyncError::CursorExpired),
            other => other,
        }
    }
}

impl MailboxClient for GmailClient {
    fn list_threads(
        &self,
        page_token: Option<&str>,
        max_results: usize,
        label_ids: &[&str],
    ) -> Result<ThreadPage, SyncError> {
        let mut url = self.url(&format!(
            "threads?maxResults={}",
            max_results.clamp(1, MAX_PAGE_SIZE)
        ));
        for label in label_ids {
            url.push_str(&format!("&labelIds={}", urlencoding::encode(label)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let list: ListThreadsResponse = self.transport.get_json(&url, "list threads")?;
        Ok(ThreadPage {
            thread_ids: list
                .threads
                .unwrap_or_default()
                .into_iter()
                .map(|t| ThreadId::new(t.id))
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn get_thread(&self, id: &ThreadId) -> Result<GmailThread, SyncError> {
        let url = self.url(&format!(
            "threads/{}?format=full",
            urlencoding::encode(id.as_str())
        ));
        self.transport.get_json(&url, "get thread")
    }

    fn get_history(&self, cursor: &CursorToken) -> Result<HistoryBatch, SyncError> {
        let mut records = Vec::new();
        let mut latest_cursor = None;
        let mut page_token: Option<String> = None;

        loop {
            let response = self.list_history(cursor.as_str(), page_token.as_deref())?;

            if let Some(history) = response.history {
                records.extend(history);
            }
            if response.history_id.is_some() {
                latest_cursor = response.history_id;
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            "[GMAIL] {} history records since {}",
            records.len(),
            cursor.as_str()
        );

        Ok(HistoryBatch {
            thread_ids: thread_ids_from_history(&records),
            cursor: latest_cursor
                .map(CursorToken::new)
                .unwrap_or_else(|| cursor.clone()),
        })
    }

    fn send_message(
        &self,
        raw: &[u8],
        thread_id: Option<&ThreadId>,
    ) -> Result<MessageId, SyncError> {
        let request = SendRequest {
            raw: BASE64_URL_SAFE_NO_PAD.encode(raw),
            thread_id: thread_id.map(|t| t.as_str().to_string()),
        };
        let sent: SendResponse =
            self.transport
                .post_json(&self.url("messages/send"), &request, "send message")?;
        Ok(MessageId::new(sent.id))
    }

    fn modify_labels(
        &self,
        id: &MessageId,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), SyncError> {
        let request = ModifyRequest {
            add_label_ids: add.iter().map(|l| l.to_string()).collect(),
            remove_label_ids: remove.iter().map(|l| l.to_string()).collect(),
        };
        let url = self.url(&format!(
            "messages/{}/modify",
            urlencoding::encode(id.as_str())
        ));
        let _: IgnoredAny = self.transport.post_json(&url, &request, "modify labels")?;
        Ok(())
    }

    fn get_profile(&self) -> Result<MailboxProfile, SyncError> {
        let profile: ProfileResponse = self.transport.get_json(&self.url("profile"), "get profile")?;
        Ok(MailboxProfile {
            email: profile.email_address,
            cursor: CursorToken::new(profile.history_id),
        })
    }
}

/// Thread ids referenced by change records, in record order
pub fn thread_ids_from_history(records: &[HistoryRecord]) -> Vec<ThreadId> {
    let mut ids = Vec::new();
    for record in records {
        let added = record.messages_added.iter().flatten().map(|m| &m.message);
        let deleted = record.messages_deleted.iter().flatten().map(|m| &m.message);
        let labeled = record.labels_added.iter().flatten().map(|c| &c.message);
        let unlabeled = record.labels_removed.iter().flatten().map(|c| &c.message);

        ids.extend(
            added
                .chain(labeled)
                .chain(unlabeled)
                .chain(deleted)
                .map(|m| ThreadId::new(m.thread_id.as_str())),
        );
    }
    ids
}
