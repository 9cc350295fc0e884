//! Courier - mailbox and calendar sync and scheduling engine
//!
//! This crate provides:
//! - Domain models (threads, messages, events, working hours, sync state)
//! - Gmail and Google Calendar clients over a shared retrying transport
//! - MIME payload decoding into structured message records
//! - Full, incremental and resumable mail sync with single-flight per user
//! - Calendar ingestion and free-slot search in the user's timezone
//! - Repository abstraction with in-memory and SQLite implementations
//! - Action handlers for mutations (read, star, send)
//!
//! Everything is synchronous; callers pick the thread.

pub mod actions;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod error;
pub mod gmail;
pub mod http;
pub mod models;
pub mod service;
pub mod storage;
pub mod sync;

pub use actions::{ActionHandler, LabelChange};
pub use auth::{CredentialSupplier, StaticToken, StoredTokenSupplier};
pub use calendar::{
    AvailabilityService, CalendarClient, FreeSlotFinder, GoogleCalendarClient, ingest_event,
    working_window,
};
pub use config::{CredentialSource, EngineConfig, GoogleCredentials, RetryPolicy};
pub use error::{PassCounts, SyncError};
pub use gmail::{GmailClient, MailboxClient, MessageDecoder, OutgoingMessage};
pub use models::{
    Attachment, Attendee, BusyInterval, CalendarEvent, CursorToken, EmailAddress, EventId,
    FreeSlot, MailMessage, MailThread, MessageId, SyncLease, SyncState, SyncStatus, ThreadId,
    UserId, WorkingHoursPolicy,
};
pub use service::Engine;
pub use storage::{InMemoryRepository, Repository, SqliteRepository};
pub use sync::{
    CalendarSync, CalendarSyncReport, SyncCoordinator, SyncMode, SyncReport, cooldown_elapsed,
};
