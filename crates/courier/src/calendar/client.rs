//! Google Calendar v3 HTTP client

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};

use super::api::{
    EventsResponse, FreeBusyError, FreeBusyItem, FreeBusyRequest, FreeBusyResponse, RawEvent,
    TimePeriod,
};
use super::{CalendarClient, PRIMARY_CALENDAR};
use crate::error::SyncError;
use crate::http::ApiTransport;
use crate::models::BusyInterval;

/// Events requested per page
const EVENTS_PAGE_SIZE: usize = 100;

/// Google Calendar API client
pub struct GoogleCalendarClient {
    transport: ApiTransport,
    base_url: String,
}

impl GoogleCalendarClient {
    /// Calendar API base URL
    pub const BASE_URL: &'static str = "https://www.googleapis.com/calendar/v3";

    pub fn new(transport: ApiTransport) -> Self {
        Self::with_base_url(transport, Self::BASE_URL)
    }

    pub fn with_base_url(transport: ApiTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl CalendarClient for GoogleCalendarClient {
    fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, SyncError> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/calendars/{}/events?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime&maxResults={}",
                self.base_url,
                PRIMARY_CALENDAR,
                urlencoding::encode(&rfc3339(time_min)),
                urlencoding::encode(&rfc3339(time_max)),
                EVENTS_PAGE_SIZE,
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response: EventsResponse = self.transport.get_json(&url, "list events")?;
            events.extend(response.items.unwrap_or_default());

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("[CALENDAR] Listed {} events", events.len());
        Ok(events)
    }

    fn query_free_busy(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        calendar_ids: &[&str],
    ) -> Result<Vec<BusyInterval>, SyncError> {
        let ids: &[&str] = if calendar_ids.is_empty() {
            &[PRIMARY_CALENDAR]
        } else {
            calendar_ids
        };
        let request = FreeBusyRequest {
            time_min: rfc3339(time_min),
            time_max: rfc3339(time_max),
            items: ids
                .iter()
                .map(|id| FreeBusyItem { id: id.to_string() })
                .collect(),
        };

        let url = format!("{}/freeBusy", self.base_url);
        let response: FreeBusyResponse = self.transport.post_json(&url, &request, "query free/busy")?;
        busy_from_response(response, ids)
    }
}

/// Merge the busy lists of the requested calendars.
///
/// A calendar the provider reports errors for, or leaves out, fails the whole
/// query: its empty busy list would otherwise read as free time.
fn busy_from_response(
    response: FreeBusyResponse,
    calendar_ids: &[&str],
) -> Result<Vec<BusyInterval>, SyncError> {
    let mut calendars = response.calendars.unwrap_or_default();
    let mut busy = Vec::new();
    for calendar_id in calendar_ids {
        let Some(calendar) = calendars.remove(*calendar_id) else {
            return Err(SyncError::InvalidResponse(format!(
                "free/busy response is missing calendar {calendar_id}"
            )));
        };
        if let Some(errors) = calendar.errors.filter(|e| !e.is_empty()) {
            warn!(
                "[CALENDAR] Free/busy errors for calendar {}: {:?}",
                calendar_id, errors
            );
            return Err(free_busy_error(calendar_id, &errors));
        }
        busy.extend(calendar.busy.unwrap_or_default().iter().filter_map(parse_period));
    }
    busy.sort_by_key(|b| b.start);
    Ok(busy)
}

fn free_busy_error(calendar_id: &str, errors: &[FreeBusyError]) -> SyncError {
    let reasons: Vec<&str> = errors
        .iter()
        .map(|e| e.reason.as_deref().unwrap_or("unknown"))
        .collect();
    let message = format!(
        "free/busy unavailable for calendar {}: {}",
        calendar_id,
        reasons.join(", ")
    );
    let retryable = reasons
        .iter()
        .any(|r| matches!(*r, "backendError" | "rateLimitExceeded" | "userRateLimitExceeded"));
    if retryable {
        SyncError::transient(message)
    } else if reasons.contains(&"notFound") {
        SyncError::NotFound(format!("calendar {calendar_id}"))
    } else {
        SyncError::InvalidResponse(message)
    }
}

/// Malformed or empty periods are dropped
fn parse_period(period: &TimePeriod) -> Option<BusyInterval> {
    let start = DateTime::parse_from_rfc3339(&period.start).ok()?;
    let end = DateTime::parse_from_rfc3339(&period.end).ok()?;
    BusyInterval::new(start.with_timezone(&Utc), end.with_timezone(&Utc))
}
