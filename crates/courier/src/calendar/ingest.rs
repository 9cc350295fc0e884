//! Raw calendar event to mirrored row

use chrono::{DateTime, NaiveDate, Utc};
use log::debug;

use super::api::{EventTime, RawEvent};
use crate::models::{Attendee, CalendarEvent, EventId, ResponseStatus, UserId};

/// Title used when an event has no summary
pub const UNTITLED: &str = "Untitled";

/// Convert a provider event, or `None` when it has no id, no usable
/// start/end, or was cancelled
pub fn ingest_event(user_id: &UserId, raw: &RawEvent) -> Option<CalendarEvent> {
    let id = raw.id.as_deref().filter(|id| !id.is_empty())?;

    if raw.status.as_deref() == Some("cancelled") {
        debug!("[CALENDAR] Skipping cancelled event {}", id);
        return None;
    }

    let (Some(start), Some(end)) = (
        raw.start.as_ref().and_then(event_time),
        raw.end.as_ref().and_then(event_time),
    ) else {
        debug!("[CALENDAR] Skipping event {} without start/end", id);
        return None;
    };

    let attendees = raw
        .attendees
        .iter()
        .flatten()
        .filter_map(|a| {
            Some(Attendee {
                email: a.email.as_deref()?.to_lowercase(),
                name: a.display_name.clone(),
                response_status: a.response_status.as_deref().and_then(ResponseStatus::parse),
            })
        })
        .collect();

    Some(CalendarEvent {
        user_id: user_id.clone(),
        id: EventId::new(id),
        title: raw
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNTITLED)
            .to_string(),
        description: raw.description.clone(),
        start_time: start.0,
        end_time: end.0,
        location: raw.location.clone(),
        attendees,
        is_all_day: start.1,
    })
}

/// Instant plus whether it came from an all-day `date`
fn event_time(time: &EventTime) -> Option<(DateTime<Utc>, bool)> {
    if let Some(date_time) = &time.date_time {
        let parsed = DateTime::parse_from_rfc3339(date_time).ok()?;
        return Some((parsed.with_timezone(&Utc), false));
    }
    let date = NaiveDate::parse_from_str(time.date.as_deref()?, "%Y-%m-%d").ok()?;
    Some((date.and_hms_opt(0, 0, 0)?.and_utc(), true))
}
