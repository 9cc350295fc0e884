//! SQLite-backed repository with zstd-compressed message bodies

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use rusqlite_migration::{M, Migrations};

use super::Repository;
use crate::models::{
    Attachment, Attendee, CalendarEvent, CursorToken, EmailAddress, EventId, FullSyncCheckpoint,
    MailMessage, MailThread, MessageId, SyncLease, SyncState, SyncStatus, ThreadId, UserId,
    WorkingHoursPolicy, labels,
};

/// zstd level for bodies (good balance of speed vs compression)
const BODY_COMPRESSION_LEVEL: i32 = 3;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Mirrored threads, one row per (user, provider thread)
            CREATE TABLE threads (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                subject TEXT NOT NULL,
                snippet TEXT,
                last_message_at TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 1,
                is_starred INTEGER NOT NULL DEFAULT 0,
                labels TEXT NOT NULL DEFAULT '[]',        -- JSON array
                participants TEXT NOT NULL DEFAULT '[]',  -- JSON array, first-seen order
                message_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, id)
            );

            CREATE INDEX idx_threads_last_message_at
                ON threads(user_id, last_message_at DESC);

            -- Immutable messages with zstd-compressed bodies
            CREATE TABLE messages (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                from_name TEXT,
                from_email TEXT NOT NULL,
                snippet TEXT,
                sent_at TEXT NOT NULL,
                is_outbound INTEGER NOT NULL DEFAULT 0,
                body_text BLOB,  -- zstd compressed
                body_html BLOB,  -- zstd compressed
                PRIMARY KEY (user_id, id)
            );

            CREATE INDEX idx_messages_thread ON messages(user_id, thread_id, sent_at ASC);

            -- Recipients (normalized, ordered)
            CREATE TABLE message_recipients (
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                recipient_type TEXT NOT NULL,
                position INTEGER NOT NULL,
                name TEXT,
                email TEXT NOT NULL,
                PRIMARY KEY (user_id, message_id, recipient_type, position),
                FOREIGN KEY (user_id, message_id) REFERENCES messages(user_id, id) ON DELETE CASCADE
            );

            -- Attachment metadata; content stays with the provider
            CREATE TABLE message_attachments (
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                attachment_id TEXT NOT NULL,
                PRIMARY KEY (user_id, message_id, position),
                FOREIGN KEY (user_id, message_id) REFERENCES messages(user_id, id) ON DELETE CASCADE
            );

            -- Calendar events, overwritten on every refresh
            CREATE TABLE events (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                location TEXT,
                attendees TEXT NOT NULL DEFAULT '[]',  -- JSON array
                is_all_day INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, id)
            );

            CREATE INDEX idx_events_start ON events(user_id, start_time);

            CREATE TABLE working_hours (
                user_id TEXT PRIMARY KEY,
                timezone TEXT NOT NULL,
                start_hour INTEGER NOT NULL,
                end_hour INTEGER NOT NULL,
                working_days TEXT NOT NULL  -- JSON array of 0..6, 0 = Sunday
            );

            -- Sync cursor, status and lease per user
            CREATE TABLE sync_state (
                user_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'idle',
                status_changed_at TEXT,
                lease_id INTEGER NOT NULL DEFAULT 0,  -- bumped by every begin
                cursor_token TEXT,
                last_mail_sync TEXT,
                last_calendar_sync TEXT,
                last_error TEXT,
                checkpoint TEXT,                          -- JSON full-sync resume point
                failed_thread_ids TEXT NOT NULL DEFAULT '[]'  -- JSON array, retried next pass
            );
            "#,
        ),
    ])
}

/// Fixed-width UTC timestamps so text order matches time order
fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp {:?}", s))
}

fn parse_opt_time(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_time).transpose()
}

fn compress(body: Option<&String>) -> Result<Option<Vec<u8>>> {
    body.map(|text| zstd::encode_all(text.as_bytes(), BODY_COMPRESSION_LEVEL))
        .transpose()
        .context("Failed to compress body")
}

fn decompress(data: Option<Vec<u8>>) -> Result<Option<String>> {
    data.map(|bytes| {
        let raw = zstd::decode_all(bytes.as_slice()).context("Failed to decompress body")?;
        String::from_utf8(raw).context("Stored body is not UTF-8")
    })
    .transpose()
}

/// SQLite-based repository
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

/// Raw thread columns before JSON/time decoding
struct ThreadRow {
    user_id: String,
    id: String,
    subject: String,
    snippet: Option<String>,
    last_message_at: String,
    is_read: bool,
    is_starred: bool,
    labels: String,
    participants: String,
    message_count: i64,
}

impl ThreadRow {
    const COLUMNS: &'static str = "user_id, id, subject, snippet, last_message_at, is_read, \
                                   is_starred, labels, participants, message_count";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            id: row.get(1)?,
            subject: row.get(2)?,
            snippet: row.get(3)?,
            last_message_at: row.get(4)?,
            is_read: row.get(5)?,
            is_starred: row.get(6)?,
            labels: row.get(7)?,
            participants: row.get(8)?,
            message_count: row.get(9)?,
        })
    }

    fn into_thread(self) -> Result<MailThread> {
        Ok(MailThread {
            user_id: UserId::new(self.user_id),
            id: ThreadId::new(self.id),
            subject: self.subject,
            snippet: self.snippet,
            last_message_at: parse_time(&self.last_message_at)?,
            is_read: self.is_read,
            is_starred: self.is_starred,
            labels: serde_json::from_str(&self.labels).context("Invalid thread labels")?,
            participants: serde_json::from_str(&self.participants)
                .context("Invalid thread participants")?,
            message_count: self.message_count as usize,
        })
    }
}

/// Raw message columns; recipients and attachments are loaded separately
struct MessageRow {
    user_id: String,
    id: String,
    thread_id: String,
    from_name: Option<String>,
    from_email: String,
    snippet: Option<String>,
    sent_at: String,
    is_outbound: bool,
    body_text: Option<Vec<u8>>,
    body_html: Option<Vec<u8>>,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            id: row.get(1)?,
            thread_id: row.get(2)?,
            from_name: row.get(3)?,
            from_email: row.get(4)?,
            snippet: row.get(5)?,
            sent_at: row.get(6)?,
            is_outbound: row.get(7)?,
            body_text: row.get(8)?,
            body_html: row.get(9)?,
        })
    }
}

impl SqliteRepository {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::init(conn)
    }

    /// A private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed during a sync write; foreign keys are
        // required for ON DELETE CASCADE
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    /// Load recipients for a message
    fn load_recipients(
        conn: &Connection,
        user_id: &str,
        message_id: &str,
        recipient_type: &str,
    ) -> Result<Vec<EmailAddress>> {
        let mut stmt = conn.prepare(
            "SELECT name, email FROM message_recipients
             WHERE user_id = ? AND message_id = ? AND recipient_type = ?
             ORDER BY position",
        )?;

        let recipients = stmt
            .query_map(params![user_id, message_id, recipient_type], |row| {
                Ok(EmailAddress {
                    name: row.get(0)?,
                    email: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(recipients)
    }

    fn load_attachments(conn: &Connection, user_id: &str, message_id: &str) -> Result<Vec<Attachment>> {
        let mut stmt = conn.prepare(
            "SELECT filename, mime_type, size_bytes, attachment_id FROM message_attachments
             WHERE user_id = ? AND message_id = ?
             ORDER BY position",
        )?;

        let attachments = stmt
            .query_map(params![user_id, message_id], |row| {
                Ok(Attachment {
                    filename: row.get(0)?,
                    mime_type: row.get(1)?,
                    size_bytes: row.get::<_, i64>(2)? as u64,
                    attachment_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(attachments)
    }

    /// Save recipients for a message
    fn save_recipients(
        tx: &Transaction<'_>,
        message: &MailMessage,
        recipient_type: &str,
        recipients: &[EmailAddress],
    ) -> Result<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO message_recipients (user_id, message_id, recipient_type, position, name, email)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;

        for (i, addr) in recipients.iter().enumerate() {
            stmt.execute(params![
                message.user_id.as_str(),
                message.id.as_str(),
                recipient_type,
                i as i64,
                addr.name,
                addr.email,
            ])?;
        }

        Ok(())
    }

    fn save_attachments(tx: &Transaction<'_>, message: &MailMessage) -> Result<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO message_attachments
             (user_id, message_id, position, filename, mime_type, size_bytes, attachment_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;

        for (i, attachment) in message.attachments.iter().enumerate() {
            stmt.execute(params![
                message.user_id.as_str(),
                message.id.as_str(),
                i as i64,
                attachment.filename,
                attachment.mime_type,
                attachment.size_bytes as i64,
                attachment.attachment_id,
            ])?;
        }

        Ok(())
    }

    fn into_message(conn: &Connection, row: MessageRow) -> Result<MailMessage> {
        let to = Self::load_recipients(conn, &row.user_id, &row.id, "to")?;
        let cc = Self::load_recipients(conn, &row.user_id, &row.id, "cc")?;
        let attachments = Self::load_attachments(conn, &row.user_id, &row.id)?;

        Ok(MailMessage {
            user_id: UserId::new(row.user_id),
            id: MessageId::new(row.id),
            thread_id: ThreadId::new(row.thread_id),
            from: EmailAddress {
                name: row.from_name,
                email: row.from_email,
            },
            to,
            cc,
            body_html: decompress(row.body_html)?,
            body_text: decompress(row.body_text)?,
            snippet: row.snippet,
            sent_at: parse_time(&row.sent_at)?,
            is_outbound: row.is_outbound,
            attachments,
        })
    }

    /// Set a thread flag column and the label it is derived from in one step
    fn set_thread_flag(
        &self,
        user_id: &UserId,
        id: &ThreadId,
        column: &str,
        value: bool,
        label: &str,
        present: bool,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stored: Option<String> = tx
            .query_row(
                "SELECT labels FROM threads WHERE user_id = ? AND id = ?",
                params![user_id.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Ok(false);
        };

        let mut label_set: BTreeSet<String> =
            serde_json::from_str(&stored).context("Invalid thread labels")?;
        if present {
            label_set.insert(label.to_string());
        } else {
            label_set.remove(label);
        }
        tx.execute(
            &format!("UPDATE threads SET {column} = ?, labels = ? WHERE user_id = ? AND id = ?"),
            params![value, serde_json::to_string(&label_set)?, user_id.as_str(), id.as_str()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Make sure the user's sync row exists before a column-scoped update
    fn ensure_sync_row(conn: &Connection, user_id: &UserId) -> Result<()> {
        conn.execute(
            "INSERT INTO sync_state (user_id) VALUES (?) ON CONFLICT(user_id) DO NOTHING",
            [user_id.as_str()],
        )?;
        Ok(())
    }

    fn event_from_row(row: &Row<'_>) -> rusqlite::Result<(EventRowText, bool)> {
        Ok((
            EventRowText {
                user_id: row.get(0)?,
                id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                start_time: row.get(4)?,
                end_time: row.get(5)?,
                location: row.get(6)?,
                attendees: row.get(7)?,
            },
            row.get(8)?,
        ))
    }
}

/// Raw event columns before JSON/time decoding
struct EventRowText {
    user_id: String,
    id: String,
    title: String,
    description: Option<String>,
    start_time: String,
    end_time: String,
    location: Option<String>,
    attendees: String,
}

impl EventRowText {
    const COLUMNS: &'static str =
        "user_id, id, title, description, start_time, end_time, location, attendees, is_all_day";

    fn into_event(self, is_all_day: bool) -> Result<CalendarEvent> {
        let attendees: Vec<Attendee> =
            serde_json::from_str(&self.attendees).context("Invalid event attendees")?;
        Ok(CalendarEvent {
            user_id: UserId::new(self.user_id),
            id: EventId::new(self.id),
            title: self.title,
            description: self.description,
            start_time: parse_time(&self.start_time)?,
            end_time: parse_time(&self.end_time)?,
            location: self.location,
            attendees,
            is_all_day,
        })
    }
}

impl Repository for SqliteRepository {
    fn get_thread(&self, user_id: &UserId, id: &ThreadId) -> Result<Option<MailThread>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM threads WHERE user_id = ? AND id = ?",
                    ThreadRow::COLUMNS
                ),
                params![user_id.as_str(), id.as_str()],
                ThreadRow::from_row,
            )
            .optional()?;
        row.map(ThreadRow::into_thread).transpose()
    }

    fn upsert_thread(&self, thread: &MailThread) -> Result<()> {
        let labels = serde_json::to_string(&thread.labels)?;
        let participants = serde_json::to_string(&thread.participants)?;
        let conn = self.conn()?;

        // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE, which would
        // delete the old row first
        conn.execute(
            "INSERT INTO threads
             (user_id, id, subject, snippet, last_message_at, is_read, is_starred,
              labels, participants, message_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, id) DO UPDATE SET
                subject = excluded.subject,
                snippet = excluded.snippet,
                last_message_at = excluded.last_message_at,
                is_read = excluded.is_read,
                is_starred = excluded.is_starred,
                labels = excluded.labels,
                participants = excluded.participants,
                message_count = excluded.message_count",
            params![
                thread.user_id.as_str(),
                thread.id.as_str(),
                thread.subject,
                thread.snippet,
                fmt_time(thread.last_message_at),
                thread.is_read,
                thread.is_starred,
                labels,
                participants,
                thread.message_count as i64,
            ],
        )?;

        Ok(())
    }

    fn list_threads(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MailThread>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM threads WHERE user_id = ?
             ORDER BY last_message_at DESC, id ASC
             LIMIT ? OFFSET ?",
            ThreadRow::COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![user_id.as_str(), limit as i64, offset as i64],
                ThreadRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ThreadRow::into_thread).collect()
    }

    fn set_thread_read(&self, user_id: &UserId, id: &ThreadId, is_read: bool) -> Result<bool> {
        self.set_thread_flag(user_id, id, "is_read", is_read, labels::UNREAD, !is_read)
    }

    fn set_thread_starred(
        &self,
        user_id: &UserId,
        id: &ThreadId,
        is_starred: bool,
    ) -> Result<bool> {
        self.set_thread_flag(user_id, id, "is_starred", is_starred, labels::STARRED, is_starred)
    }

    fn count_threads(&self, user_id: &UserId) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM threads WHERE user_id = ?",
            [user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn has_message(&self, user_id: &UserId, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ? AND id = ?",
            params![user_id.as_str(), id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_message(&self, message: &MailMessage) -> Result<bool> {
        let body_text = compress(message.body_text.as_ref())?;
        let body_html = compress(message.body_html.as_ref())?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO messages
             (user_id, id, thread_id, from_name, from_email, snippet, sent_at, is_outbound,
              body_text, body_html)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, id) DO NOTHING",
            params![
                message.user_id.as_str(),
                message.id.as_str(),
                message.thread_id.as_str(),
                message.from.name,
                message.from.email,
                message.snippet,
                fmt_time(message.sent_at),
                message.is_outbound,
                body_text,
                body_html,
            ],
        )?;

        if inserted == 0 {
            return Ok(false);
        }

        Self::save_recipients(&tx, message, "to", &message.to)?;
        Self::save_recipients(&tx, message, "cc", &message.cc)?;
        Self::save_attachments(&tx, message)?;

        tx.commit()?;
        Ok(true)
    }

    fn list_messages_for_thread(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
    ) -> Result<Vec<MailMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, id, thread_id, from_name, from_email, snippet, sent_at, is_outbound,
                    body_text, body_html
             FROM messages WHERE user_id = ? AND thread_id = ?
             ORDER BY sent_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(params![user_id.as_str(), thread_id.as_str()], MessageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| Self::into_message(&conn, row))
            .collect()
    }

    fn count_messages(&self, user_id: &UserId) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?",
            [user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn upsert_event(&self, event: &CalendarEvent) -> Result<()> {
        let attendees = serde_json::to_string(&event.attendees)?;
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO events
             (user_id, id, title, description, start_time, end_time, location, attendees, is_all_day)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                location = excluded.location,
                attendees = excluded.attendees,
                is_all_day = excluded.is_all_day",
            params![
                event.user_id.as_str(),
                event.id.as_str(),
                event.title,
                event.description,
                fmt_time(event.start_time),
                fmt_time(event.end_time),
                event.location,
                attendees,
                event.is_all_day,
            ],
        )?;

        Ok(())
    }

    fn get_event(&self, user_id: &UserId, id: &EventId) -> Result<Option<CalendarEvent>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM events WHERE user_id = ? AND id = ?",
                    EventRowText::COLUMNS
                ),
                params![user_id.as_str(), id.as_str()],
                Self::event_from_row,
            )
            .optional()?;
        row.map(|(text, all_day)| text.into_event(all_day)).transpose()
    }

    fn list_events(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events
             WHERE user_id = ? AND start_time >= ? AND start_time < ?
             ORDER BY start_time ASC, id ASC",
            EventRowText::COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![user_id.as_str(), fmt_time(from), fmt_time(to)],
                Self::event_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(text, all_day)| text.into_event(all_day))
            .collect()
    }

    fn get_working_hours(&self, user_id: &UserId) -> Result<Option<WorkingHoursPolicy>> {
        let conn = self.conn()?;
        let row: Option<(String, u8, u8, String)> = conn
            .query_row(
                "SELECT timezone, start_hour, end_hour, working_days
                 FROM working_hours WHERE user_id = ?",
                [user_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((timezone, start_hour, end_hour, days_json)) = row else {
            return Ok(None);
        };

        let days: Vec<u8> = serde_json::from_str(&days_json).context("Invalid working days")?;
        let policy = WorkingHoursPolicy::new(&timezone, start_hour, end_hour, days)
            .context("Invalid stored working hours")?;
        Ok(Some(policy))
    }

    fn save_working_hours(&self, user_id: &UserId, policy: &WorkingHoursPolicy) -> Result<()> {
        let days = serde_json::to_string(&policy.working_days)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO working_hours (user_id, timezone, start_hour, end_hour, working_days)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                timezone = excluded.timezone,
                start_hour = excluded.start_hour,
                end_hour = excluded.end_hour,
                working_days = excluded.working_days",
            params![
                user_id.as_str(),
                policy.timezone.name(),
                policy.start_hour,
                policy.end_hour,
                days,
            ],
        )?;
        Ok(())
    }

    fn get_sync_state(&self, user_id: &UserId) -> Result<Option<SyncState>> {
        let conn = self.conn()?;

        #[allow(clippy::type_complexity)]
        let row: Option<(
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            i64,
        )> = conn
            .query_row(
                "SELECT status, status_changed_at, cursor_token, last_mail_sync,
                        last_calendar_sync, last_error, checkpoint, failed_thread_ids, lease_id
                 FROM sync_state WHERE user_id = ?",
                [user_id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            status,
            status_changed_at,
            cursor_token,
            last_mail_sync,
            last_calendar_sync,
            last_error,
            checkpoint_json,
            failed_json,
            lease_id,
        )) = row
        else {
            return Ok(None);
        };

        let checkpoint: Option<FullSyncCheckpoint> = checkpoint_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Invalid stored checkpoint")?;
        let failed_thread_ids: Vec<ThreadId> =
            serde_json::from_str(&failed_json).context("Invalid failed thread list")?;

        Ok(Some(SyncState {
            user_id: user_id.clone(),
            status: SyncStatus::parse(&status)
                .with_context(|| format!("Unknown sync status {:?}", status))?,
            status_changed_at: parse_opt_time(status_changed_at)?,
            lease_id: lease_id as u64,
            cursor_token: cursor_token.map(CursorToken::new),
            last_mail_sync: parse_opt_time(last_mail_sync)?,
            last_calendar_sync: parse_opt_time(last_calendar_sync)?,
            last_error,
            checkpoint,
            failed_thread_ids,
        }))
    }

    fn try_begin_mail_sync(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<SyncLease>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        // Single statement CAS: the conflict branch only fires when the row is
        // not actively syncing or its lease has run out
        let changed = tx.execute(
            "INSERT INTO sync_state (user_id, status, status_changed_at, lease_id)
             VALUES (?1, 'syncing', ?2, 1)
             ON CONFLICT(user_id) DO UPDATE SET
                status = 'syncing',
                status_changed_at = excluded.status_changed_at,
                lease_id = sync_state.lease_id + 1
             WHERE sync_state.status != 'syncing'
                OR sync_state.status_changed_at IS NULL
                OR sync_state.status_changed_at <= ?3",
            params![user_id.as_str(), fmt_time(now), fmt_time(now - lease)],
        )?;
        if changed != 1 {
            return Ok(None);
        }
        let lease_id: i64 = tx.query_row(
            "SELECT lease_id FROM sync_state WHERE user_id = ?",
            [user_id.as_str()],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(Some(SyncLease::new(lease_id as u64)))
    }

    fn save_checkpoint(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        checkpoint: Option<&FullSyncCheckpoint>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let json = checkpoint.map(serde_json::to_string).transpose()?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_state SET checkpoint = ?1, status_changed_at = ?2
             WHERE user_id = ?3 AND status = 'syncing' AND lease_id = ?4",
            params![json, fmt_time(now), user_id.as_str(), lease.id() as i64],
        )?;
        Ok(changed == 1)
    }

    fn complete_mail_sync(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        cursor: Option<&CursorToken>,
        failed_thread_ids: &[ThreadId],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let failed = serde_json::to_string(failed_thread_ids)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_state SET
                status = 'idle',
                status_changed_at = ?1,
                cursor_token = COALESCE(?2, cursor_token),
                last_mail_sync = ?1,
                last_error = NULL,
                checkpoint = NULL,
                failed_thread_ids = ?3
             WHERE user_id = ?4 AND status = 'syncing' AND lease_id = ?5",
            params![
                fmt_time(at),
                cursor.map(CursorToken::as_str),
                failed,
                user_id.as_str(),
                lease.id() as i64
            ],
        )?;
        Ok(changed == 1)
    }

    fn fail_mail_sync(
        &self,
        user_id: &UserId,
        lease: SyncLease,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_state SET status = 'error', status_changed_at = ?1, last_error = ?2
             WHERE user_id = ?3 AND status = 'syncing' AND lease_id = ?4",
            params![fmt_time(at), error, user_id.as_str(), lease.id() as i64],
        )?;
        Ok(changed == 1)
    }

    fn record_calendar_sync(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_sync_row(&conn, user_id)?;
        conn.execute(
            "UPDATE sync_state SET last_calendar_sync = ? WHERE user_id = ?",
            params![fmt_time(at), user_id.as_str()],
        )?;
        Ok(())
    }
}
