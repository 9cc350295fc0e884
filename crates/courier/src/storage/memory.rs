//! In-memory storage implementation
//!
//! Used by tests and by embedders that do not need durability.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Repository;
use crate::models::{
    CalendarEvent, CursorToken, EventId, FullSyncCheckpoint, MailMessage, MailThread, MessageId,
    SyncLease, SyncState, SyncStatus, ThreadId, UserId, WorkingHoursPolicy, labels,
};

/// In-memory implementation of [`Repository`]
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
pub struct InMemoryRepository {
    threads: RwLock<HashMap<(UserId, ThreadId), MailThread>>,
    messages: RwLock<HashMap<(UserId, MessageId), MailMessage>>,
    events: RwLock<HashMap<(UserId, EventId), CalendarEvent>>,
    policies: RwLock<HashMap<UserId, WorkingHoursPolicy>>,
    sync_states: RwLock<HashMap<UserId, SyncState>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryRepository {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            sync_states: RwLock::new(HashMap::new()),
        }
    }

    /// Apply `update` to the user's sync row, creating it first if needed
    fn update_state(&self, user_id: &UserId, update: impl FnOnce(&mut SyncState)) -> Result<()> {
        let mut states = write(&self.sync_states)?;
        let state = states
            .entry(user_id.clone())
            .or_insert_with(|| SyncState::new(user_id.clone()));
        update(state);
        Ok(())
    }

    /// Apply `update` only while `lease` still holds the user's row
    fn update_leased(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        update: impl FnOnce(&mut SyncState),
    ) -> Result<bool> {
        let mut states = write(&self.sync_states)?;
        match states.get_mut(user_id) {
            Some(state) if state.is_held_by(lease) => {
                update(state);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Apply `update` to a stored thread. Returns false when it is missing.
    fn update_thread(
        &self,
        user_id: &UserId,
        id: &ThreadId,
        update: impl FnOnce(&mut MailThread),
    ) -> Result<bool> {
        let mut threads = write(&self.threads)?;
        Ok(match threads.get_mut(&(user_id.clone(), id.clone())) {
            Some(thread) => {
                update(thread);
                true
            }
            None => false,
        })
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for InMemoryRepository {
    fn get_thread(&self, user_id: &UserId, id: &ThreadId) -> Result<Option<MailThread>> {
        let threads = read(&self.threads)?;
        Ok(threads.get(&(user_id.clone(), id.clone())).cloned())
    }

    fn upsert_thread(&self, thread: &MailThread) -> Result<()> {
        let mut threads = write(&self.threads)?;
        threads.insert((thread.user_id.clone(), thread.id.clone()), thread.clone());
        Ok(())
    }

    fn list_threads(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MailThread>> {
        let threads = read(&self.threads)?;
        let mut list: Vec<MailThread> = threads
            .values()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(list.into_iter().skip(offset).take(limit).collect())
    }

    fn set_thread_read(&self, user_id: &UserId, id: &ThreadId, is_read: bool) -> Result<bool> {
        self.update_thread(user_id, id, |thread| {
            thread.is_read = is_read;
            if is_read {
                thread.labels.remove(labels::UNREAD);
            } else {
                thread.labels.insert(labels::UNREAD.to_string());
            }
        })
    }

    fn set_thread_starred(
        &self,
        user_id: &UserId,
        id: &ThreadId,
        is_starred: bool,
    ) -> Result<bool> {
        self.update_thread(user_id, id, |thread| {
            thread.is_starred = is_starred;
            if is_starred {
                thread.labels.insert(labels::STARRED.to_string());
            } else {
                thread.labels.remove(labels::STARRED);
            }
        })
    }

    fn count_threads(&self, user_id: &UserId) -> Result<usize> {
        let threads = read(&self.threads)?;
        Ok(threads.keys().filter(|(u, _)| u == user_id).count())
    }

    fn has_message(&self, user_id: &UserId, id: &MessageId) -> Result<bool> {
        let messages = read(&self.messages)?;
        Ok(messages.contains_key(&(user_id.clone(), id.clone())))
    }

    fn insert_message(&self, message: &MailMessage) -> Result<bool> {
        let mut messages = write(&self.messages)?;
        let key = (message.user_id.clone(), message.id.clone());
        if messages.contains_key(&key) {
            return Ok(false);
        }
        messages.insert(key, message.clone());
        Ok(true)
    }

    fn list_messages_for_thread(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
    ) -> Result<Vec<MailMessage>> {
        let messages = read(&self.messages)?;
        let mut list: Vec<MailMessage> = messages
            .values()
            .filter(|m| &m.user_id == user_id && &m.thread_id == thread_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    fn count_messages(&self, user_id: &UserId) -> Result<usize> {
        let messages = read(&self.messages)?;
        Ok(messages.keys().filter(|(u, _)| u == user_id).count())
    }

    fn upsert_event(&self, event: &CalendarEvent) -> Result<()> {
        let mut events = write(&self.events)?;
        events.insert((event.user_id.clone(), event.id.clone()), event.clone());
        Ok(())
    }

    fn get_event(&self, user_id: &UserId, id: &EventId) -> Result<Option<CalendarEvent>> {
        let events = read(&self.events)?;
        Ok(events.get(&(user_id.clone(), id.clone())).cloned())
    }

    fn list_events(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let events = read(&self.events)?;
        let mut list: Vec<CalendarEvent> = events
            .values()
            .filter(|e| &e.user_id == user_id && e.start_time >= from && e.start_time < to)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    fn get_working_hours(&self, user_id: &UserId) -> Result<Option<WorkingHoursPolicy>> {
        let policies = read(&self.policies)?;
        Ok(policies.get(user_id).cloned())
    }

    fn save_working_hours(&self, user_id: &UserId, policy: &WorkingHoursPolicy) -> Result<()> {
        let mut policies = write(&self.policies)?;
        policies.insert(user_id.clone(), policy.clone());
        Ok(())
    }

    fn get_sync_state(&self, user_id: &UserId) -> Result<Option<SyncState>> {
        let states = read(&self.sync_states)?;
        Ok(states.get(user_id).cloned())
    }

    fn try_begin_mail_sync(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<SyncLease>> {
        // The write guard makes check-and-set a single step
        let mut states = write(&self.sync_states)?;
        let state = states
            .entry(user_id.clone())
            .or_insert_with(|| SyncState::new(user_id.clone()));
        if !state.can_begin(now, lease) {
            return Ok(None);
        }
        state.status = SyncStatus::Syncing;
        state.status_changed_at = Some(now);
        state.lease_id += 1;
        Ok(Some(SyncLease::new(state.lease_id)))
    }

    fn save_checkpoint(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        checkpoint: Option<&FullSyncCheckpoint>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.update_leased(user_id, lease, |state| {
            state.checkpoint = checkpoint.cloned();
            state.status_changed_at = Some(now);
        })
    }

    fn complete_mail_sync(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        cursor: Option<&CursorToken>,
        failed_thread_ids: &[ThreadId],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.update_leased(user_id, lease, |state| {
            state.status = SyncStatus::Idle;
            state.status_changed_at = Some(at);
            if let Some(cursor) = cursor {
                state.cursor_token = Some(cursor.clone());
            }
            state.last_mail_sync = Some(at);
            state.last_error = None;
            state.checkpoint = None;
            state.failed_thread_ids = failed_thread_ids.to_vec();
        })
    }

    fn fail_mail_sync(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.update_leased(user_id, lease, |state| {
            state.status = SyncStatus::Error;
            state.status_changed_at = Some(at);
            state.last_error = Some(error.to_string());
        })
    }

    fn record_calendar_sync(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<()> {
        self.update_state(user_id, |state| state.last_calendar_sync = Some(at))
    }
}
