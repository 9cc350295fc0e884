//! Hand-written provider fakes shared by the integration tests

#![allow(dead_code)]

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use courier::calendar::api::RawEvent;
use courier::gmail::api::{GmailMessage, GmailThread};
use courier::gmail::{HistoryBatch, MailboxProfile, ThreadPage};
use courier::{
    BusyInterval, CalendarClient, CursorToken, EngineConfig, MailboxClient, MessageId, SyncError,
    ThreadId, UserId,
};

pub fn user() -> UserId {
    UserId::new("user-1")
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        page_size: 2,
        max_full_sync_threads: 100,
        label_fanout: 2,
        ..EngineConfig::default()
    }
}

/// A plain-text message sent 2025-03-03 at `hour`:00 UTC
pub fn text_message(
    id: &str,
    thread_id: &str,
    from: &str,
    hour: u32,
    labels: &[&str],
    text: &str,
) -> GmailMessage {
    serde_json::from_value(json!({
        "id": id,
        "threadId": thread_id,
        "labelIds": labels,
        "snippet": text,
        "internalDate": "1741000000000",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                { "name": "From", "value": from },
                { "name": "To", "value": "me@example.com" },
                { "name": "Subject", "value": format!("Subject of {thread_id}") },
                { "name": "Date", "value": format!("Mon, 3 Mar 2025 {hour:02}:00:00 +0000") }
            ],
            "body": { "size": text.len(), "data": BASE64_URL_SAFE_NO_PAD.encode(text) }
        }
    }))
    .expect("valid message json")
}

/// A message the decoder rejects (no payload)
pub fn broken_message(id: &str, thread_id: &str) -> GmailMessage {
    GmailMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        ..GmailMessage::default()
    }
}

pub fn thread(id: &str, messages: Vec<GmailMessage>) -> GmailThread {
    GmailThread {
        id: id.to_string(),
        snippet: None,
        history_id: None,
        messages: Some(messages),
    }
}

/// How `get_thread` fails for a given thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFailure {
    NotFound,
    Transient,
    Auth,
}

impl ThreadFailure {
    fn to_error(self, id: &str) -> SyncError {
        match self {
            ThreadFailure::NotFound => SyncError::NotFound(format!("thread {id}")),
            ThreadFailure::Transient => SyncError::transient("503 Service Unavailable"),
            ThreadFailure::Auth => SyncError::Auth("token revoked".to_string()),
        }
    }
}

#[derive(Default)]
pub struct MailboxState {
    pub threads: BTreeMap<String, GmailThread>,
    /// Listing order of the inbox, newest first
    pub inbox: Vec<String>,
    pub profile_cursor: String,
    /// Thread ids returned by the next history call
    pub history: Vec<String>,
    pub history_cursor: String,
    pub history_expired: bool,
    pub thread_failures: HashMap<String, ThreadFailure>,
    pub failing_modifies: HashSet<String>,
    pub modified: Vec<(String, Vec<String>, Vec<String>)>,
    pub sent: Vec<(Vec<u8>, Option<String>)>,
    pub calls: Vec<String>,
    /// Runs at every `list_threads` call
    pub on_list: Option<Box<dyn FnMut() + Send>>,
}

/// In-memory stand-in for the Gmail API
#[derive(Default)]
pub struct FakeMailbox {
    pub state: Mutex<MailboxState>,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MailboxState) -> R) -> R {
        f(&mut self.state.lock().expect("fake mailbox lock"))
    }

    /// Store a thread and put it at the top of the inbox
    pub fn add_thread(&self, thread: GmailThread) {
        self.with(|s| {
            s.inbox.retain(|id| id != &thread.id);
            s.inbox.insert(0, thread.id.clone());
            s.threads.insert(thread.id.clone(), thread);
        });
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }
}

impl MailboxClient for FakeMailbox {
    fn list_threads(
        &self,
        page_token: Option<&str>,
        max_results: usize,
        _label_ids: &[&str],
    ) -> Result<ThreadPage, SyncError> {
        self.with(|s| {
            s.calls.push(format!("list:{}", page_token.unwrap_or("")));
            if let Some(hook) = s.on_list.as_mut() {
                hook();
            }
            let offset: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
            let end = (offset + max_results).min(s.inbox.len());
            let thread_ids = s.inbox[offset.min(end)..end]
                .iter()
                .map(|id| ThreadId::new(id.as_str()))
                .collect();
            Ok(ThreadPage {
                thread_ids,
                next_page_token: (end < s.inbox.len()).then(|| end.to_string()),
            })
        })
    }

    fn get_thread(&self, id: &ThreadId) -> Result<GmailThread, SyncError> {
        self.with(|s| {
            s.calls.push(format!("thread:{id}"));
            if let Some(failure) = s.thread_failures.get(id.as_str()) {
                return Err(failure.to_error(id.as_str()));
            }
            s.threads
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| SyncError::NotFound(format!("thread {id}")))
        })
    }

    fn get_history(&self, cursor: &CursorToken) -> Result<HistoryBatch, SyncError> {
        self.with(|s| {
            s.calls.push(format!("history:{}", cursor.as_str()));
            if s.history_expired {
                return Err(SyncError::CursorExpired);
            }
            Ok(HistoryBatch {
                thread_ids: s.history.iter().map(|id| ThreadId::new(id.as_str())).collect(),
                cursor: CursorToken::new(s.history_cursor.clone()),
            })
        })
    }

    fn send_message(&self, raw: &[u8], thread_id: Option<&ThreadId>) -> Result<MessageId, SyncError> {
        self.with(|s| {
            s.sent.push((raw.to_vec(), thread_id.map(|t| t.to_string())));
            Ok(MessageId::new(format!("sent-{}", s.sent.len())))
        })
    }

    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str]) -> Result<(), SyncError> {
        self.with(|s| {
            if s.failing_modifies.contains(id.as_str()) {
                return Err(SyncError::transient("503 Service Unavailable"));
            }
            s.modified.push((
                id.to_string(),
                add.iter().map(|l| l.to_string()).collect(),
                remove.iter().map(|l| l.to_string()).collect(),
            ));
            Ok(())
        })
    }

    fn get_profile(&self) -> Result<MailboxProfile, SyncError> {
        self.with(|s| {
            s.calls.push("profile".to_string());
            Ok(MailboxProfile {
                email: Some("me@example.com".to_string()),
                cursor: CursorToken::new(s.profile_cursor.clone()),
            })
        })
    }
}

/// In-memory stand-in for the Calendar API
#[derive(Default)]
pub struct FakeCalendar {
    pub events: Mutex<Vec<RawEvent>>,
    pub busy: Mutex<Vec<BusyInterval>>,
    pub queries: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    /// Free/busy fails as if the provider could not compute availability
    pub free_busy_unavailable: Mutex<bool>,
}

impl FakeCalendar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_event(&self, value: serde_json::Value) {
        let event: RawEvent = serde_json::from_value(value).expect("valid event json");
        self.events.lock().expect("events lock").push(event);
    }

    pub fn add_busy(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let interval = BusyInterval::new(start, end).expect("ordered interval");
        self.busy.lock().expect("busy lock").push(interval);
    }
}

impl CalendarClient for FakeCalendar {
    fn list_events(
        &self,
        _time_min: DateTime<Utc>,
        _time_max: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, SyncError> {
        Ok(self.events.lock().expect("events lock").clone())
    }

    fn query_free_busy(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        _calendar_ids: &[&str],
    ) -> Result<Vec<BusyInterval>, SyncError> {
        self.queries.lock().expect("queries lock").push((time_min, time_max));
        if *self.free_busy_unavailable.lock().expect("flag lock") {
            return Err(SyncError::transient(
                "free/busy unavailable for calendar primary: backendError",
            ));
        }
        Ok(self.busy.lock().expect("busy lock").clone())
    }
}
