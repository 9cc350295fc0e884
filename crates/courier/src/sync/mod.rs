//! Sync engine for mirroring mail and calendar data
//!
//! Provides idempotent passes that can be safely retried or resumed.

mod calendar;
mod coordinator;
mod timing;

pub use calendar::{CalendarSync, CalendarSyncReport};
pub use coordinator::{SyncCoordinator, SyncMode, SyncReport, compute_thread};
pub use timing::cooldown_elapsed;
