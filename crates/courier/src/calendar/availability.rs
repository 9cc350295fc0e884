//! On-demand free-slot query

use chrono::{DateTime, Duration, DurationRound, Utc};
use log::{debug, info};
use std::sync::Arc;

use super::{CalendarClient, FreeSlotFinder, PRIMARY_CALENDAR};
use crate::error::SyncError;
use crate::models::{FreeSlot, UserId, WorkingHoursPolicy};
use crate::storage::Repository;

/// Round up to the next multiple of 15 minutes (unchanged when already on one)
pub fn round_up_to_quarter_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let quarter = Duration::minutes(15);
    match t.duration_trunc(quarter) {
        Ok(floor) if floor == t => t,
        Ok(floor) => floor + quarter,
        Err(_) => t,
    }
}

/// Combines stored policy, provider free/busy and the slot finder
pub struct AvailabilityService {
    calendar: Arc<dyn CalendarClient>,
    repo: Arc<dyn Repository>,
    finder: FreeSlotFinder,
}

impl AvailabilityService {
    pub fn new(
        calendar: Arc<dyn CalendarClient>,
        repo: Arc<dyn Repository>,
        finder: FreeSlotFinder,
    ) -> Self {
        Self {
            calendar,
            repo,
            finder,
        }
    }

    /// Stored policy, or the default when the user never saved one
    pub fn policy_for(&self, user_id: &UserId) -> Result<WorkingHoursPolicy, SyncError> {
        Ok(self.repo.get_working_hours(user_id)?.unwrap_or_default())
    }

    pub fn find_free_slots(
        &self,
        user_id: &UserId,
        duration: Duration,
        horizon_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<FreeSlot>, SyncError> {
        if duration <= Duration::zero() {
            return Err(SyncError::InvalidArgument(format!(
                "meeting duration must be positive, got {} minutes",
                duration.num_minutes()
            )));
        }
        if horizon_days == 0 {
            return Ok(Vec::new());
        }

        let policy = self.policy_for(user_id)?;
        let earliest = round_up_to_quarter_hour(now);
        // One extra day covers local dates that end after `now + horizon` in UTC
        let time_max = now + Duration::days(horizon_days as i64 + 1);

        let busy = self
            .calendar
            .query_free_busy(now, time_max, &[PRIMARY_CALENDAR])?;
        debug!(
            "[CALENDAR] {} busy intervals for user {} over {} days",
            busy.len(),
            user_id,
            horizon_days
        );

        let slots = self
            .finder
            .find(&busy, &policy, duration, horizon_days, earliest);
        info!(
            "[CALENDAR] Found {} free slots of {} min for user {}",
            slots.len(),
            duration.num_minutes(),
            user_id
        );
        Ok(slots)
    }
}
