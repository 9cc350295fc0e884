//! Full and incremental mail sync passes
//!
//! Every pass is idempotent: threads are upserted by natural key and messages
//! are insert-once, so a pass that is retried or replayed converges on the
//! same rows.

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::error::{PassCounts, SyncError};
use crate::gmail::{DecodedMessage, HistoryBatch, MailboxClient, MessageDecoder, decode_html_entities};
use crate::models::{
    CursorToken, FullSyncCheckpoint, MailThread, PageCursor, SyncLease, SyncState, ThreadId,
    UserId,
};
use crate::storage::Repository;

/// Which protocol a pass ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Result of a completed mail pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub counts: PassCounts,
    /// Cursor stored by this pass, if it replaced the previous one
    pub cursor: Option<CursorToken>,
    /// An incremental request ran as a full pass (no cursor, or cursor expired)
    pub fell_back_to_full: bool,
    pub resumed_from_checkpoint: bool,
    /// Threads queued for retry by the next incremental pass
    pub failed_thread_ids: Vec<ThreadId>,
    pub duration_ms: u64,
}

/// What a pass produced before it is committed
struct PassOutcome {
    mode: SyncMode,
    cursor: Option<CursorToken>,
    resumed_from_checkpoint: bool,
}

/// Mutable bookkeeping for one pass
struct Pass<'a> {
    user_id: &'a UserId,
    lease: SyncLease,
    decoder: MessageDecoder,
    counts: PassCounts,
    failed: Vec<ThreadId>,
    seen: HashSet<ThreadId>,
}

impl<'a> Pass<'a> {
    fn new(user_id: &'a UserId, lease: SyncLease) -> Self {
        Self {
            user_id,
            lease,
            decoder: MessageDecoder::new(user_id.clone()),
            counts: PassCounts::default(),
            failed: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

/// Orchestrates mail passes for any number of users.
///
/// Holds no per-user state; everything that must survive a pass goes through
/// the repository.
pub struct SyncCoordinator {
    mailbox: Arc<dyn MailboxClient>,
    repo: Arc<dyn Repository>,
    config: EngineConfig,
}

impl SyncCoordinator {
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        repo: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            mailbox,
            repo,
            config,
        }
    }

    /// Run one mail pass.
    ///
    /// `full = false` runs incrementally from the stored cursor and falls back
    /// to a full pass when there is no cursor or it has expired. Returns
    /// [`SyncError::AlreadyRunning`] when another pass holds the lease.
    pub fn sync_mail(&self, user_id: &UserId, full: bool) -> Result<SyncReport, SyncError> {
        let started = Instant::now();

        let Some(lease) = self
            .repo
            .try_begin_mail_sync(user_id, Utc::now(), self.config.lease())?
        else {
            info!("[SYNC] Pass for user {} rejected: already running", user_id);
            return Err(SyncError::AlreadyRunning(user_id.to_string()));
        };

        let mut pass = Pass::new(user_id, lease);
        let result = self
            .repo
            .get_sync_state(user_id)
            .map_err(SyncError::from)
            .map(|state| state.unwrap_or_else(|| SyncState::new(user_id.clone())))
            .and_then(|state| {
                let outcome = self.run(&mut pass, &state, full)?;
                let committed = self.repo.complete_mail_sync(
                    user_id,
                    lease,
                    outcome.cursor.as_ref(),
                    &pass.failed,
                    Utc::now(),
                )?;
                if !committed {
                    return Err(SyncError::LeaseLost(user_id.to_string()));
                }
                Ok(outcome)
            });

        match result {
            Ok(outcome) => {
                let report = SyncReport {
                    mode: outcome.mode,
                    counts: pass.counts,
                    cursor: outcome.cursor,
                    fell_back_to_full: !full && outcome.mode == SyncMode::Full,
                    resumed_from_checkpoint: outcome.resumed_from_checkpoint,
                    failed_thread_ids: pass.failed,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                info!(
                    "[SYNC] {:?} pass for user {} done in {}ms: {} threads, {} messages ({} new), {} failed, {} skipped",
                    report.mode,
                    user_id,
                    report.duration_ms,
                    report.counts.threads_processed,
                    report.counts.messages_processed,
                    report.counts.messages_inserted,
                    report.counts.threads_failed,
                    report.counts.messages_skipped,
                );
                Ok(report)
            }
            Err(e) => {
                error!("[SYNC] Pass for user {} aborted: {}", user_id, e);
                match self.repo.fail_mail_sync(user_id, lease, &e.to_string(), Utc::now()) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "[SYNC] Lease for user {} is held by a newer pass; error status not recorded",
                        user_id
                    ),
                    Err(store_err) => error!(
                        "[SYNC] Failed to record error status for user {}: {:#}",
                        user_id, store_err
                    ),
                }
                Err(SyncError::Aborted {
                    counts: pass.counts,
                    source: Box::new(e),
                })
            }
        }
    }

    fn run(
        &self,
        pass: &mut Pass<'_>,
        state: &SyncState,
        full: bool,
    ) -> Result<PassOutcome, SyncError> {
        if !full && let Some(cursor) = &state.cursor_token {
            match self.mailbox.get_history(cursor) {
                Ok(batch) => return self.incremental_pass(pass, state, batch),
                Err(SyncError::CursorExpired) => {
                    warn!(
                        "[SYNC] Cursor {} expired for user {}, running full sync",
                        cursor.as_str(),
                        pass.user_id
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.full_pass(pass, state.checkpoint.clone())
    }

    fn full_pass(
        &self,
        pass: &mut Pass<'_>,
        checkpoint: Option<FullSyncCheckpoint>,
    ) -> Result<PassOutcome, SyncError> {
        let (mut checkpoint, resumed) = match checkpoint {
            Some(checkpoint) => {
                info!(
                    "[SYNC] Resuming full sync for user {} after {} threads",
                    pass.user_id, checkpoint.threads_listed
                );
                (checkpoint, true)
            }
            None => {
                // Cursor is captured before the first listing
                let profile = self.mailbox.get_profile()?;
                info!(
                    "[SYNC] Full sync for user {} from cursor {}",
                    pass.user_id,
                    profile.cursor.as_str()
                );
                (FullSyncCheckpoint::new(profile.cursor), false)
            }
        };

        let cap = self.config.max_full_sync_threads;
        let label_ids = [self.config.inbox_label.as_str()];

        while !checkpoint.page.exhausted && checkpoint.threads_listed < cap {
            let remaining = cap - checkpoint.threads_listed;
            let page_size = self.config.page_size.clamp(1, remaining);
            let page = self.mailbox.list_threads(
                checkpoint.page.token.as_deref(),
                page_size,
                &label_ids,
            )?;
            debug!(
                "[SYNC] Listed {} threads for user {}",
                page.thread_ids.len(),
                pass.user_id
            );

            let take = page.thread_ids.len().min(remaining);
            for thread_id in &page.thread_ids[..take] {
                self.sync_thread(pass, thread_id, false)?;
            }

            checkpoint.threads_listed += take;
            checkpoint.page = if page.thread_ids.is_empty() {
                PageCursor::finished()
            } else {
                checkpoint.page.advance(page.next_page_token)
            };
            if !self.repo.save_checkpoint(
                pass.user_id,
                pass.lease,
                Some(&checkpoint),
                Utc::now(),
            )? {
                return Err(SyncError::LeaseLost(pass.user_id.to_string()));
            }
        }

        Ok(PassOutcome {
            mode: SyncMode::Full,
            cursor: Some(checkpoint.captured_cursor),
            resumed_from_checkpoint: resumed,
        })
    }

    fn incremental_pass(
        &self,
        pass: &mut Pass<'_>,
        state: &SyncState,
        batch: HistoryBatch,
    ) -> Result<PassOutcome, SyncError> {
        info!(
            "[SYNC] Incremental sync for user {}: {} changed threads, {} retries",
            pass.user_id,
            batch.thread_ids.len(),
            state.failed_thread_ids.len()
        );

        for thread_id in &state.failed_thread_ids {
            self.sync_thread(pass, thread_id, true)?;
        }
        for thread_id in &batch.thread_ids {
            self.sync_thread(pass, thread_id, false)?;
        }

        let cursor = match &state.cursor_token {
            Some(stored) if batch.cursor.is_older_than(stored) => {
                warn!(
                    "[SYNC] Provider returned cursor {} older than stored {} for user {}; keeping stored",
                    batch.cursor.as_str(),
                    stored.as_str(),
                    pass.user_id
                );
                None
            }
            _ => Some(batch.cursor),
        };

        Ok(PassOutcome {
            mode: SyncMode::Incremental,
            cursor,
            resumed_from_checkpoint: false,
        })
    }

    /// Process one thread at most once per pass. Only fatal errors propagate.
    fn sync_thread(
        &self,
        pass: &mut Pass<'_>,
        thread_id: &ThreadId,
        is_retry: bool,
    ) -> Result<(), SyncError> {
        if !pass.seen.insert(thread_id.clone()) {
            return Ok(());
        }

        match self.process_thread(pass, thread_id) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(SyncError::NotFound(_)) if is_retry => {
                info!(
                    "[SYNC] Dropping retry of thread {} for user {}: no longer exists",
                    thread_id, pass.user_id
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    "[SYNC] Thread {} failed for user {}: {}",
                    thread_id, pass.user_id, e
                );
                pass.counts.threads_failed += 1;
                pass.failed.push(thread_id.clone());
                Ok(())
            }
        }
    }

    fn process_thread(&self, pass: &mut Pass<'_>, thread_id: &ThreadId) -> Result<(), SyncError> {
        let raw = self.mailbox.get_thread(thread_id)?;

        let mut decoded = Vec::new();
        for message in raw.messages.iter().flatten() {
            match pass.decoder.decode(message) {
                Ok(message) => decoded.push(message),
                Err(e) => {
                    warn!(
                        "[SYNC] Skipping message {} in thread {} for user {}: {}",
                        message.id, thread_id, pass.user_id, e
                    );
                    pass.counts.messages_skipped += 1;
                }
            }
        }

        let Some(thread) = compute_thread(pass.user_id, thread_id, raw.snippet.as_deref(), &decoded)
        else {
            warn!(
                "[SYNC] Thread {} for user {} has no decodable messages",
                thread_id, pass.user_id
            );
            pass.counts.threads_failed += 1;
            return Ok(());
        };

        self.repo.upsert_thread(&thread)?;

        for d in &decoded {
            pass.counts.messages_processed += 1;
            if self.repo.has_message(pass.user_id, &d.message.id)? {
                continue;
            }
            if self.repo.insert_message(&d.message)? {
                pass.counts.messages_inserted += 1;
            }
        }

        pass.counts.threads_processed += 1;
        Ok(())
    }
}

/// Aggregate a thread row from its decoded messages, in provider order.
///
/// Returns `None` when there is nothing to aggregate.
pub fn compute_thread(
    user_id: &UserId,
    thread_id: &ThreadId,
    provider_snippet: Option<&str>,
    messages: &[DecodedMessage],
) -> Option<MailThread> {
    let last = messages.last()?;
    let last_message_at = messages.iter().map(|m| m.message.sent_at).max()?;

    let snippet = provider_snippet
        .map(decode_html_entities)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| last.message.snippet.clone());

    let mut thread = MailThread {
        user_id: user_id.clone(),
        id: thread_id.clone(),
        subject: last.subject.clone(),
        snippet,
        last_message_at,
        is_read: true,
        is_starred: false,
        labels: messages
            .iter()
            .flat_map(|m| m.labels.iter().cloned())
            .collect::<BTreeSet<_>>(),
        participants: Vec::new(),
        message_count: messages.len(),
    };
    for m in messages {
        if !m.message.from.email.is_empty() {
            thread.add_participant(&m.message.from);
        }
    }
    thread.apply_label_flags();
    Some(thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, LabelFlags, MailMessage, MessageId};
    use chrono::{Duration, TimeZone};

    fn decoded(id: &str, from: EmailAddress, hours: i64, labels: &[&str]) -> DecodedMessage {
        let message = MailMessage::builder(UserId::new("u1"), MessageId::new(id), ThreadId::new("t1"))
            .from(from)
            .snippet(Some(format!("snippet {id}")))
            .sent_at(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap() + Duration::hours(hours))
            .build();
        DecodedMessage {
            message,
            subject: format!("subject {id}"),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            flags: LabelFlags::from_labels(labels),
        }
    }

    #[test]
    fn test_compute_thread_aggregates() {
        let messages = vec![
            decoded("m1", EmailAddress::with_name("Ann", "ann@x.com"), 0, &["INBOX"]),
            decoded("m2", EmailAddress::new("bob@y.com"), 2, &["INBOX", "UNREAD"]),
            decoded("m3", EmailAddress::with_name("Ann A.", "ann@x.com"), 1, &["STARRED"]),
        ];
        let thread = compute_thread(
            &UserId::new("u1"),
            &ThreadId::new("t1"),
            Some("Tom &amp; Jerry"),
            &messages,
        )
        .unwrap();

        assert_eq!(thread.message_count, 3);
        assert_eq!(thread.subject, "subject m3");
        assert_eq!(thread.snippet.as_deref(), Some("Tom & Jerry"));
        assert_eq!(
            thread.last_message_at,
            Utc.with_ymd_and_hms(2025, 3, 3, 11, 0, 0).unwrap()
        );
        let emails: Vec<_> = thread.participants.iter().map(|p| p.email.as_str()).collect();
        assert_eq!(emails, vec!["ann@x.com", "bob@y.com"]);
        assert_eq!(thread.participants[0].name.as_deref(), Some("Ann"));
        assert!(!thread.is_read);
        assert!(thread.is_starred);
        assert_eq!(thread.labels.len(), 3);
    }

    #[test]
    fn test_compute_thread_snippet_fallback_and_empty_sender() {
        let messages = vec![decoded("m1", EmailAddress::new(""), 0, &[])];
        let thread =
            compute_thread(&UserId::new("u1"), &ThreadId::new("t1"), Some("  "), &messages).unwrap();
        assert_eq!(thread.snippet.as_deref(), Some("snippet m1"));
        assert!(thread.participants.is_empty());
        assert!(thread.is_read);
    }

    #[test]
    fn test_compute_thread_needs_messages() {
        assert!(compute_thread(&UserId::new("u1"), &ThreadId::new("t1"), Some("x"), &[]).is_none());
    }
}
