//! Engine facade
//!
//! Wires the provider clients, the repository and configuration into the
//! operations a trigger surface (CLI, scheduler, app shell) calls.

use chrono::{DateTime, Duration, Utc};
use log::info;
use std::sync::Arc;

use crate::actions::{ActionHandler, LabelChange};
use crate::auth::CredentialSupplier;
use crate::calendar::{AvailabilityService, CalendarClient, FreeSlotFinder, GoogleCalendarClient};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::gmail::{GmailClient, MailboxClient, OutgoingMessage};
use crate::http::ApiTransport;
use crate::models::{
    FreeSlot, MessageId, SyncState, SyncStatus, ThreadId, UserId, WorkingHoursPolicy,
};
use crate::storage::Repository;
use crate::sync::{CalendarSync, CalendarSyncReport, SyncCoordinator, SyncReport, cooldown_elapsed};

/// Main entry point for mail and calendar operations
///
/// Holds no per-user state of its own; one engine serves any number of users
/// as long as the clients are authorized for them.
pub struct Engine {
    config: EngineConfig,
    repo: Arc<dyn Repository>,
    coordinator: SyncCoordinator,
    calendar_sync: CalendarSync,
    availability: AvailabilityService,
    actions: ActionHandler,
}

impl Engine {
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        calendar: Arc<dyn CalendarClient>,
        repo: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Result<Self, SyncError> {
        let finder = FreeSlotFinder::new(config.max_slots_per_day, config.max_slots_total);
        Ok(Self {
            coordinator: SyncCoordinator::new(mailbox.clone(), repo.clone(), config.clone()),
            calendar_sync: CalendarSync::new(
                calendar.clone(),
                repo.clone(),
                config.calendar_horizon_days,
            ),
            availability: AvailabilityService::new(calendar, repo.clone(), finder),
            actions: ActionHandler::new(mailbox, repo.clone(), config.label_fanout)?,
            repo,
            config,
        })
    }

    /// Engine backed by the Gmail and Google Calendar REST APIs
    pub fn with_google(
        credentials: Arc<dyn CredentialSupplier>,
        repo: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Result<Self, SyncError> {
        let transport =
            || ApiTransport::new(credentials.clone(), config.http_timeout(), config.retry.clone());
        let mailbox = GmailClient::with_base_url(transport(), &config.gmail_base_url);
        let calendar = GoogleCalendarClient::with_base_url(transport(), &config.calendar_base_url);
        Self::new(Arc::new(mailbox), Arc::new(calendar), repo, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// "sync mail": incremental unless `full`, see [`SyncCoordinator::sync_mail`]
    pub fn sync_mail(&self, user_id: &UserId, full: bool) -> Result<SyncReport, SyncError> {
        self.coordinator.sync_mail(user_id, full)
    }

    /// "sync calendar": refresh the configured horizon
    pub fn sync_calendar(&self, user_id: &UserId) -> Result<CalendarSyncReport, SyncError> {
        self.calendar_sync.sync(user_id)
    }

    pub fn sync_state(&self, user_id: &UserId) -> Result<Option<SyncState>, SyncError> {
        Ok(self.repo.get_sync_state(user_id)?)
    }

    /// Whether a poll loop should start a mail pass now.
    ///
    /// False while a live pass holds the lease or the poll interval has not
    /// elapsed since the last completed pass.
    pub fn should_poll(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool, SyncError> {
        let Some(state) = self.repo.get_sync_state(user_id)? else {
            return Ok(true);
        };
        if state.status == SyncStatus::Syncing && !state.can_begin(now, self.config.lease()) {
            return Ok(false);
        }
        Ok(cooldown_elapsed(
            state.last_mail_sync,
            self.config.poll_interval_secs,
            now,
        ))
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Free slots of `duration_minutes` over `horizon_days` (configured default when `None`)
    pub fn find_free_slots(
        &self,
        user_id: &UserId,
        duration_minutes: i64,
        horizon_days: Option<u32>,
    ) -> Result<Vec<FreeSlot>, SyncError> {
        self.availability.find_free_slots(
            user_id,
            Duration::minutes(duration_minutes),
            horizon_days.unwrap_or(self.config.slot_horizon_days),
            Utc::now(),
        )
    }

    pub fn working_hours(&self, user_id: &UserId) -> Result<WorkingHoursPolicy, SyncError> {
        self.availability.policy_for(user_id)
    }

    pub fn set_working_hours(
        &self,
        user_id: &UserId,
        policy: &WorkingHoursPolicy,
    ) -> Result<(), SyncError> {
        self.repo.save_working_hours(user_id, policy)?;
        info!(
            "[CALENDAR] Saved working hours for user {}: {} {:02}:00-{:02}:00",
            user_id, policy.timezone, policy.start_hour, policy.end_hour
        );
        Ok(())
    }

    // ========================================================================
    // Actions
    // ========================================================================

    pub fn mark_thread_read(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
    ) -> Result<LabelChange, SyncError> {
        self.actions.mark_thread_read(user_id, thread_id)
    }

    pub fn set_starred(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
        starred: bool,
    ) -> Result<LabelChange, SyncError> {
        self.actions.set_starred(user_id, thread_id, starred)
    }

    pub fn send_message(
        &self,
        message: &OutgoingMessage,
        thread_id: Option<&ThreadId>,
    ) -> Result<MessageId, SyncError> {
        self.actions.send_message(message, thread_id)
    }
}
