//! Free-slot search over busy intervals and working hours
//!
//! Pure functions of their inputs; no I/O.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::{BusyInterval, FreeSlot, WorkingHoursPolicy};

/// Finds meeting windows of an exact length inside working hours
#[derive(Debug, Clone, Copy)]
pub struct FreeSlotFinder {
    max_per_day: usize,
    max_total: usize,
}

impl Default for FreeSlotFinder {
    /// Two per day, six overall
    fn default() -> Self {
        Self::new(2, 6)
    }
}

impl FreeSlotFinder {
    pub fn new(max_per_day: usize, max_total: usize) -> Self {
        Self {
            max_per_day,
            max_total,
        }
    }

    /// Candidate slots over `horizon_days` local dates, starting with the
    /// date containing `earliest_start` in the policy timezone.
    ///
    /// No slot starts before `earliest_start`. Within a day at most one slot
    /// is proposed per gap, at the start of the gap.
    pub fn find(
        &self,
        busy: &[BusyInterval],
        policy: &WorkingHoursPolicy,
        duration: Duration,
        horizon_days: u32,
        earliest_start: DateTime<Utc>,
    ) -> Vec<FreeSlot> {
        let mut slots = Vec::new();
        if duration <= Duration::zero() || horizon_days == 0 || self.max_total == 0 {
            return slots;
        }

        let first_day = earliest_start.with_timezone(&policy.timezone).date_naive();

        for date in first_day.iter_days().take(horizon_days as usize) {
            if slots.len() >= self.max_total {
                break;
            }
            if !policy.works_on(date.weekday()) {
                continue;
            }
            let Some((window_start, window_end)) = working_window(policy, date) else {
                continue;
            };

            let remaining = self.max_total - slots.len();
            let day_cap = self.max_per_day.min(remaining);
            slots.extend(scan_day(
                busy,
                window_start.max(earliest_start),
                window_end,
                duration,
                day_cap,
            ));
        }

        slots
    }
}

/// Working hours of `date` as absolute instants, or `None` for an empty window
pub fn working_window(
    policy: &WorkingHoursPolicy,
    date: NaiveDate,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if policy.end_hour <= policy.start_hour {
        return None;
    }
    let start = local_instant(policy.timezone, date, policy.start_hour)?;
    let end = local_instant(policy.timezone, date, policy.end_hour)?;
    (start < end).then_some((start, end))
}

/// Wall-clock `hour:00` on `date`. Ambiguous times take the earlier instant;
/// times inside a DST gap move one hour forward.
fn local_instant(tz: Tz, date: NaiveDate, hour: u8) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour as u32, 0, 0)?;
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()?,
    };
    Some(local.with_timezone(&Utc))
}

/// Gap scan of one window starting at `from`
fn scan_day(
    busy: &[BusyInterval],
    from: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration: Duration,
    cap: usize,
) -> Vec<FreeSlot> {
    let mut slots = Vec::new();
    if cap == 0 || from >= window_end {
        return slots;
    }

    let mut day_busy: Vec<&BusyInterval> = busy
        .iter()
        .filter(|b| b.is_valid() && b.overlaps(from, window_end))
        .collect();
    day_busy.sort_by_key(|b| b.start);

    let mut cursor = from;
    for interval in day_busy {
        if slots.len() >= cap {
            return slots;
        }
        if interval.start > cursor && interval.start - cursor >= duration {
            slots.push(FreeSlot::starting_at(cursor, duration));
        }
        cursor = cursor.max(interval.end);
    }

    if slots.len() < cap && cursor < window_end && window_end - cursor >= duration {
        slots.push(FreeSlot::starting_at(cursor, duration));
    }
    slots
}
