//! Poll cooldown checks
//!
//! Pure functions so the poll loop can be tested without a clock.

use chrono::{DateTime, Utc};

/// Check if enough time has elapsed since the last sync to allow a new one.
///
/// # Arguments
/// * `last_sync_at` - When the last successful sync completed (None if never synced)
/// * `cooldown_secs` - Minimum seconds that must elapse between syncs
/// * `now` - The current instant
///
/// # Returns
/// `true` if enough time has passed (or never synced), `false` if still in cooldown
pub fn cooldown_elapsed(
    last_sync_at: Option<DateTime<Utc>>,
    cooldown_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    match last_sync_at {
        Some(last) => (now - last).num_seconds() >= cooldown_secs as i64,
        None => true,
    }
}
