//! Bounded-horizon calendar refresh

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;

use crate::calendar::{CalendarClient, ingest_event};
use crate::error::SyncError;
use crate::models::UserId;
use crate::storage::Repository;

/// Counters from a calendar refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CalendarSyncReport {
    pub events_seen: usize,
    pub events_stored: usize,
    /// Cancelled events or events without id/start/end
    pub events_skipped: usize,
}

/// Mirrors events in `[now, now + horizon)` into the repository
pub struct CalendarSync {
    calendar: Arc<dyn CalendarClient>,
    repo: Arc<dyn Repository>,
    horizon_days: u32,
}

impl CalendarSync {
    pub fn new(calendar: Arc<dyn CalendarClient>, repo: Arc<dyn Repository>, horizon_days: u32) -> Self {
        Self {
            calendar,
            repo,
            horizon_days,
        }
    }

    pub fn sync(&self, user_id: &UserId) -> Result<CalendarSyncReport, SyncError> {
        self.sync_at(user_id, Utc::now())
    }

    /// Refresh relative to `now`. Re-synced events overwrite stored fields.
    pub fn sync_at(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<CalendarSyncReport, SyncError> {
        let time_max = now + Duration::days(self.horizon_days as i64);
        let events = self.calendar.list_events(now, time_max)?;

        let mut report = CalendarSyncReport {
            events_seen: events.len(),
            ..CalendarSyncReport::default()
        };

        for raw in &events {
            match ingest_event(user_id, raw) {
                Some(event) => {
                    self.repo.upsert_event(&event)?;
                    report.events_stored += 1;
                }
                None => report.events_skipped += 1,
            }
        }
        debug!("[CALENDAR] Skipped {} events for user {}", report.events_skipped, user_id);

        self.repo.record_calendar_sync(user_id, Utc::now())?;
        info!(
            "[CALENDAR] Synced {} of {} events for user {} ({} days)",
            report.events_stored, report.events_seen, user_id, self.horizon_days
        );
        Ok(report)
    }
}
