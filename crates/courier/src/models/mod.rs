//! Domain models for mirrored mail, calendar and scheduling entities

mod event;
mod ids;
mod label;
mod message;
mod schedule;
mod sync_state;
mod thread;

pub use event::{Attendee, CalendarEvent, ResponseStatus};
pub use ids::{EventId, MessageId, ThreadId, UserId};
pub use label::{LabelFlags, labels};
pub use message::{Attachment, EmailAddress, MailMessage, MailMessageBuilder};
pub use schedule::{BusyInterval, FreeSlot, WorkingHoursPolicy};
pub use sync_state::{
    CursorToken, FullSyncCheckpoint, PageCursor, SyncLease, SyncState, SyncStatus,
};
pub use thread::MailThread;
