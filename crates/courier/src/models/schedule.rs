//! Scheduling types: busy intervals, free slots and working-hours policy

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::SyncError;

/// A half-open range `[start, end)` during which a calendar is occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    /// Returns `None` unless `start < end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Whether `[start, end)` intersects this interval
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

/// A candidate meeting window of exactly the requested duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FreeSlot {
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Per-user working hours. Days are numbered 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingHoursPolicy {
    pub timezone: Tz,
    pub start_hour: u8,
    pub end_hour: u8,
    pub working_days: BTreeSet<u8>,
}

impl WorkingHoursPolicy {
    /// Build a validated policy from an IANA timezone name
    pub fn new(
        timezone: &str,
        start_hour: u8,
        end_hour: u8,
        working_days: impl IntoIterator<Item = u8>,
    ) -> Result<Self, SyncError> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| SyncError::InvalidArgument(format!("unknown timezone: {timezone}")))?;
        if start_hour > 23 || end_hour > 23 {
            return Err(SyncError::InvalidArgument(format!(
                "working hours must be within 0..=23, got {start_hour}..{end_hour}"
            )));
        }
        let working_days: BTreeSet<u8> = working_days.into_iter().collect();
        if let Some(bad) = working_days.iter().find(|d| **d > 6) {
            return Err(SyncError::InvalidArgument(format!(
                "working day {bad} is outside 0..=6"
            )));
        }
        Ok(Self {
            timezone,
            start_hour,
            end_hour,
            working_days,
        })
    }

    pub fn works_on(&self, weekday: Weekday) -> bool {
        self.working_days
            .contains(&(weekday.num_days_from_sunday() as u8))
    }

    /// Whether the local date of `instant` is a working day
    pub fn works_on_date_of(&self, instant: DateTime<Utc>) -> bool {
        self.works_on(instant.with_timezone(&self.timezone).weekday())
    }
}

impl Default for WorkingHoursPolicy {
    /// UTC, 09:00-17:00, Monday to Friday
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            start_hour: 9,
            end_hour: 17,
            working_days: (1..=5).collect(),
        }
    }
}
