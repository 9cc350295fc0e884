//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::models::{
    CalendarEvent, CursorToken, EventId, FullSyncCheckpoint, MailMessage, MailThread, MessageId,
    SyncLease, SyncState, ThreadId, UserId, WorkingHoursPolicy,
};

/// Durable store for mirrored mail, calendar events, policy and sync state
///
/// Every row is scoped by user. Threads and events are upserted by natural
/// key; messages are insert-once. The sync-state methods each touch only the
/// columns they name so mail and calendar passes never overwrite each other.
pub trait Repository: Send + Sync {
    // === Threads ===

    fn get_thread(&self, user_id: &UserId, id: &ThreadId) -> Result<Option<MailThread>>;

    /// Insert or update a thread by `(user_id, id)`
    fn upsert_thread(&self, thread: &MailThread) -> Result<()>;

    /// List threads, ordered by last_message_at descending
    fn list_threads(&self, user_id: &UserId, limit: usize, offset: usize)
    -> Result<Vec<MailThread>>;

    /// Set `is_read` and drop or restore `UNREAD` in the thread's labels.
    /// Returns false when the thread is not stored.
    fn set_thread_read(&self, user_id: &UserId, id: &ThreadId, is_read: bool) -> Result<bool>;

    /// Set `is_starred` and add or drop `STARRED` in the thread's labels.
    /// Returns false when the thread is not stored.
    fn set_thread_starred(&self, user_id: &UserId, id: &ThreadId, is_starred: bool)
    -> Result<bool>;

    fn count_threads(&self, user_id: &UserId) -> Result<usize>;

    // === Messages ===

    fn has_message(&self, user_id: &UserId, id: &MessageId) -> Result<bool>;

    /// Insert unless `(user_id, id)` exists. Returns whether a row was written.
    fn insert_message(&self, message: &MailMessage) -> Result<bool>;

    /// List messages for a thread, ordered by sent_at ascending
    fn list_messages_for_thread(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
    ) -> Result<Vec<MailMessage>>;

    fn count_messages(&self, user_id: &UserId) -> Result<usize>;

    // === Calendar events ===

    /// Insert or update an event by `(user_id, id)`
    fn upsert_event(&self, event: &CalendarEvent) -> Result<()>;

    fn get_event(&self, user_id: &UserId, id: &EventId) -> Result<Option<CalendarEvent>>;

    /// Events starting in `[from, to)`, ordered by start time
    fn list_events(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    // === Working hours ===

    fn get_working_hours(&self, user_id: &UserId) -> Result<Option<WorkingHoursPolicy>>;

    fn save_working_hours(&self, user_id: &UserId, policy: &WorkingHoursPolicy) -> Result<()>;

    // === Sync state ===

    fn get_sync_state(&self, user_id: &UserId) -> Result<Option<SyncState>>;

    /// Atomically move the mail status to `Syncing` and hand out a new lease.
    ///
    /// Succeeds from `Idle`, `Error`, a missing row, or a `Syncing` row whose
    /// lease was last renewed more than `lease` before `now`. Returns `None`
    /// otherwise.
    fn try_begin_mail_sync(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<SyncLease>>;

    /// Store or clear the full-sync resume point and renew the lease to `now`.
    ///
    /// Returns false, writing nothing, when `lease` no longer holds the row.
    fn save_checkpoint(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        checkpoint: Option<&FullSyncCheckpoint>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Finish a pass: status `Idle`, checkpoint and error cleared.
    ///
    /// `cursor` replaces the stored cursor when given. Returns false, writing
    /// nothing, when `lease` no longer holds the row.
    fn complete_mail_sync(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        cursor: Option<&CursorToken>,
        failed_thread_ids: &[ThreadId],
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Abort a pass: status `Error`. Cursor and checkpoint are kept.
    ///
    /// Returns false, writing nothing, when `lease` no longer holds the row.
    fn fail_mail_sync(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record a finished calendar refresh
    fn record_calendar_sync(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<()>;
}
