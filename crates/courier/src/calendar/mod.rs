//! Google Calendar integration and scheduling
//!
//! This module provides:
//! - The `CalendarClient` seam and a Calendar v3 implementation
//! - Conversion of raw events into mirrored `CalendarEvent` rows
//! - The free-slot search and the availability query built on it

mod availability;
mod client;
mod ingest;
mod slots;

pub use availability::{AvailabilityService, round_up_to_quarter_hour};
pub use client::GoogleCalendarClient;
pub use ingest::ingest_event;
pub use slots::{FreeSlotFinder, working_window};

use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::models::BusyInterval;

/// The calendar every account has
pub const PRIMARY_CALENDAR: &str = "primary";

/// Read-only calendar operations
pub trait CalendarClient: Send + Sync {
    /// Expanded (single) events of the primary calendar overlapping the range
    fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<api::RawEvent>, SyncError>;

    /// Busy intervals of the given calendars, merged into one list
    fn query_free_busy(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        calendar_ids: &[&str],
    ) -> Result<Vec<BusyInterval>, SyncError>;
}

/// Google Calendar API response types
pub mod api {
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    /// Response from listing events
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EventsResponse {
        pub items: Option<Vec<RawEvent>>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RawEvent {
        pub id: Option<String>,
        /// `confirmed`, `tentative` or `cancelled`
        pub status: Option<String>,
        pub summary: Option<String>,
        pub description: Option<String>,
        pub location: Option<String>,
        pub start: Option<EventTime>,
        pub end: Option<EventTime>,
        pub attendees: Option<Vec<RawAttendee>>,
    }

    /// Either `dateTime` (timed) or `date` (all-day) is set
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EventTime {
        pub date_time: Option<String>,
        pub date: Option<String>,
        pub time_zone: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RawAttendee {
        pub email: Option<String>,
        pub display_name: Option<String>,
        pub response_status: Option<String>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FreeBusyRequest {
        pub time_min: String,
        pub time_max: String,
        pub items: Vec<FreeBusyItem>,
    }

    #[derive(Debug, Serialize)]
    pub struct FreeBusyItem {
        pub id: String,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct FreeBusyResponse {
        pub calendars: Option<HashMap<String, FreeBusyCalendar>>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct FreeBusyCalendar {
        pub busy: Option<Vec<TimePeriod>>,
        /// Set when the provider could not compute this calendar's availability
        pub errors: Option<Vec<FreeBusyError>>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct FreeBusyError {
        pub domain: Option<String>,
        /// e.g. `backendError`, `notFound`, `rateLimitExceeded`
        pub reason: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct TimePeriod {
        pub start: String,
        pub end: String,
    }
}
