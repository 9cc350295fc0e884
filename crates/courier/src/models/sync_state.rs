//! Per-user sync cursor and status tracking

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ThreadId, UserId};

/// Lifecycle of the per-user mail sync row: `Idle -> Syncing -> {Idle, Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncStatus::Idle),
            "syncing" => Some(SyncStatus::Syncing),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// Opaque provider marker in the remote change stream (Gmail `historyId`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorToken(pub String);

impl CursorToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True only when both tokens are decimal and `self` is strictly lower.
    ///
    /// Non-numeric tokens are incomparable and never reported as older.
    pub fn is_older_than(&self, other: &CursorToken) -> bool {
        match (self.0.parse::<u128>(), other.0.parse::<u128>()) {
            (Ok(a), Ok(b)) => a < b,
            _ => false,
        }
    }
}

/// Resumable position in a paginated listing.
///
/// `token == None && !exhausted` is the first page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageCursor {
    pub token: Option<String>,
    pub exhausted: bool,
}

impl PageCursor {
    pub fn start() -> Self {
        Self::default()
    }

    /// Cursor for the page after the one that returned `next_page_token`
    pub fn advance(&self, next_page_token: Option<String>) -> Self {
        match next_page_token {
            Some(token) => Self {
                token: Some(token),
                exhausted: false,
            },
            None => Self {
                token: None,
                exhausted: true,
            },
        }
    }

    pub fn finished() -> Self {
        Self {
            token: None,
            exhausted: true,
        }
    }
}

/// Resume point of an interrupted full sync.
///
/// The cursor captured at the start of the pass is kept so that the pass can
/// be finished after a restart without re-reading the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncCheckpoint {
    pub captured_cursor: CursorToken,
    /// Next page to list
    pub page: PageCursor,
    /// Thread references consumed so far (counts towards the full-sync cap)
    pub threads_listed: usize,
}

impl FullSyncCheckpoint {
    pub fn new(captured_cursor: CursorToken) -> Self {
        Self {
            captured_cursor,
            page: PageCursor::start(),
            threads_listed: 0,
        }
    }
}

/// Handle on the mail sync row returned by a successful begin.
///
/// Each begin bumps the row's lease id, so writes made under a lease that was
/// taken over no longer match and are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncLease(u64);

impl SyncLease {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// One row per user tracking mail cursor, pass status and calendar freshness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub user_id: UserId,
    pub status: SyncStatus,
    /// When `status` last changed; a `Syncing` lease starts here
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Bumped by every begin; identifies the pass holding a `Syncing` row
    #[serde(default)]
    pub lease_id: u64,
    /// Advances only when a mail pass completes
    pub cursor_token: Option<CursorToken>,
    pub last_mail_sync: Option<DateTime<Utc>>,
    pub last_calendar_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub checkpoint: Option<FullSyncCheckpoint>,
    /// Threads that failed in the last pass, retried by the next incremental pass
    #[serde(default)]
    pub failed_thread_ids: Vec<ThreadId>,
}

impl SyncState {
    /// A fresh idle row with no cursor
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            status: SyncStatus::Idle,
            status_changed_at: None,
            lease_id: 0,
            cursor_token: None,
            last_mail_sync: None,
            last_calendar_sync: None,
            last_error: None,
            checkpoint: None,
            failed_thread_ids: Vec::new(),
        }
    }

    /// Whether writes under `lease` still apply to this row
    pub fn is_held_by(&self, lease: SyncLease) -> bool {
        self.status == SyncStatus::Syncing && self.lease_id == lease.id()
    }

    /// Whether a new pass may claim this row at `now`.
    ///
    /// A `Syncing` row whose lease has run out is considered abandoned.
    pub fn can_begin(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.status {
            SyncStatus::Idle | SyncStatus::Error => true,
            SyncStatus::Syncing => self
                .status_changed_at
                .is_none_or(|started| now - started >= lease),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_ordering_numeric() {
        let old = CursorToken::new("900");
        let new = CursorToken::new("1200");
        assert!(old.is_older_than(&new));
        assert!(!new.is_older_than(&old));
        assert!(!new.is_older_than(&new));
    }

    #[test]
    fn test_cursor_ordering_opaque_is_incomparable() {
        let a = CursorToken::new("abc");
        let b = CursorToken::new("123");
        assert!(!a.is_older_than(&b));
        assert!(!b.is_older_than(&a));
    }

    #[test]
    fn test_page_cursor_advance() {
        let start = PageCursor::start();
        assert!(!start.exhausted);
        let next = start.advance(Some("p2".to_string()));
        assert_eq!(next.token.as_deref(), Some("p2"));
        assert!(next.advance(None).exhausted);
    }

    #[test]
    fn test_can_begin_respects_lease() {
        let now = Utc::now();
        let lease = Duration::minutes(15);
        let mut state = SyncState::new(UserId::new("u"));
        assert!(state.can_begin(now, lease));

        state.status = SyncStatus::Syncing;
        state.status_changed_at = Some(now - Duration::minutes(1));
        assert!(!state.can_begin(now, lease));

        state.status_changed_at = Some(now - Duration::minutes(16));
        assert!(state.can_begin(now, lease));

        state.status = SyncStatus::Error;
        assert!(state.can_begin(now, lease));
    }

    #[test]
    fn test_lease_holder() {
        let mut state = SyncState::new(UserId::new("u"));
        state.lease_id = 3;
        assert!(!state.is_held_by(SyncLease::new(3)));

        state.status = SyncStatus::Syncing;
        assert!(state.is_held_by(SyncLease::new(3)));
        assert!(!state.is_held_by(SyncLease::new(2)));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [SyncStatus::Idle, SyncStatus::Syncing, SyncStatus::Error] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_serialization() {
        let mut state = SyncState::new(UserId::new("user@gmail.com"));
        state.cursor_token = Some(CursorToken::new("12345"));
        state.checkpoint = Some(FullSyncCheckpoint::new(CursorToken::new("12345")));
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
