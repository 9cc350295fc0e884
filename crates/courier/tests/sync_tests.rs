//! Mail sync passes against a fake mailbox

mod common;

use base64::prelude::*;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use common::{FakeMailbox, ThreadFailure, broken_message, test_config, text_message, thread, user};
use courier::gmail::api::GmailMessage;
use courier::{
    CursorToken, EngineConfig, InMemoryRepository, Repository, SqliteRepository, SyncCoordinator,
    SyncError, SyncMode, SyncStatus, ThreadId,
};

/// Three inbox threads, t3 newest; profile cursor "100"
fn seeded_mailbox() -> Arc<FakeMailbox> {
    let mailbox = FakeMailbox::new();
    mailbox.add_thread(thread(
        "t1",
        vec![
            text_message("m1", "t1", "Ann <ann@x.com>", 9, &["INBOX"], "hello"),
            text_message("m2", "t1", "bob@y.com", 10, &["INBOX", "UNREAD"], "hi ann"),
        ],
    ));
    mailbox.add_thread(thread(
        "t2",
        vec![text_message("m3", "t2", "carol@z.com", 11, &["INBOX", "STARRED"], "lunch?")],
    ));
    mailbox.add_thread(thread(
        "t3",
        vec![text_message("m4", "t3", "dave@w.com", 12, &["INBOX"], "report")],
    ));
    mailbox.with(|s| s.profile_cursor = "100".to_string());
    mailbox
}

fn coordinator(mailbox: &Arc<FakeMailbox>, repo: &Arc<dyn Repository>) -> SyncCoordinator {
    SyncCoordinator::new(mailbox.clone(), repo.clone(), test_config())
}

fn memory_repo() -> Arc<dyn Repository> {
    Arc::new(InMemoryRepository::new())
}

fn stored_cursor(repo: &Arc<dyn Repository>) -> Option<CursorToken> {
    repo.get_sync_state(&user()).unwrap().and_then(|s| s.cursor_token)
}

#[test]
fn test_full_sync_mirrors_inbox() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();

    let report = coordinator(&mailbox, &repo).sync_mail(&user(), true).unwrap();

    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(report.counts.threads_processed, 3);
    assert_eq!(report.counts.messages_processed, 4);
    assert_eq!(report.counts.messages_inserted, 4);
    assert_eq!(report.cursor, Some(CursorToken::new("100")));
    assert_eq!(repo.count_threads(&user()).unwrap(), 3);
    assert_eq!(repo.count_messages(&user()).unwrap(), 4);

    let t1 = repo.get_thread(&user(), &ThreadId::new("t1")).unwrap().unwrap();
    assert_eq!(t1.message_count, 2);
    assert!(!t1.is_read);
    assert_eq!(t1.participants.len(), 2);
    let t2 = repo.get_thread(&user(), &ThreadId::new("t2")).unwrap().unwrap();
    assert!(t2.is_starred);

    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Idle);
    assert!(state.checkpoint.is_none());
    assert!(state.last_mail_sync.is_some());
    // Pages of two: [t3, t2], [t1]
    assert_eq!(mailbox.calls_to("list:"), 2);
}

#[test]
fn test_full_sync_is_idempotent() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);

    sync.sync_mail(&user(), true).unwrap();
    let threads_before = repo.list_threads(&user(), 10, 0).unwrap();
    let second = sync.sync_mail(&user(), true).unwrap();

    assert_eq!(second.counts.threads_processed, 3);
    assert_eq!(second.counts.messages_inserted, 0);
    assert_eq!(repo.count_messages(&user()).unwrap(), 4);
    assert_eq!(repo.list_threads(&user(), 10, 0).unwrap(), threads_before);
}

#[test]
fn test_full_sync_respects_thread_cap() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let config = EngineConfig {
        page_size: 20,
        max_full_sync_threads: 2,
        ..test_config()
    };

    let report = SyncCoordinator::new(mailbox.clone(), repo.clone(), config)
        .sync_mail(&user(), true)
        .unwrap();

    assert_eq!(report.counts.threads_processed, 2);
    assert!(repo.get_thread(&user(), &ThreadId::new("t1")).unwrap().is_none());
}

#[test]
fn test_thread_with_attachment_and_repeated_sender() {
    let multipart: GmailMessage = serde_json::from_value(json!({
        "id": "m2",
        "threadId": "t9",
        "labelIds": ["INBOX"],
        "payload": {
            "mimeType": "multipart/mixed",
            "headers": [
                { "name": "from", "value": "\"Doe, Jane\" <Jane@X.com>" },
                { "name": "subject", "value": "Re: numbers" },
                { "name": "date", "value": "Mon, 3 Mar 2025 10:00:00 +0000" }
            ],
            "parts": [
                {
                    "partId": "0",
                    "mimeType": "text/plain; charset=utf-8",
                    "body": { "size": 7, "data": BASE64_URL_SAFE_NO_PAD.encode("see pdf") }
                },
                {
                    "partId": "1",
                    "mimeType": "application/pdf",
                    "filename": "q1.pdf",
                    "body": { "size": 2048, "attachmentId": "att-1" }
                }
            ]
        }
    }))
    .unwrap();

    let mailbox = FakeMailbox::new();
    mailbox.add_thread(thread(
        "t9",
        vec![
            text_message("m1", "t9", "Jane <jane@x.com>", 9, &["INBOX"], "numbers"),
            multipart,
            text_message("m3", "t9", "bob@y.com", 11, &["INBOX"], "thanks"),
        ],
    ));
    mailbox.with(|s| s.profile_cursor = "7".to_string());
    let repo = memory_repo();

    coordinator(&mailbox, &repo).sync_mail(&user(), false).unwrap();

    let t9 = repo.get_thread(&user(), &ThreadId::new("t9")).unwrap().unwrap();
    assert_eq!(t9.message_count, 3);
    let emails: Vec<_> = t9.participants.iter().map(|p| p.email.as_str()).collect();
    assert_eq!(emails, vec!["jane@x.com", "bob@y.com"]);

    let messages = repo.list_messages_for_thread(&user(), &ThreadId::new("t9")).unwrap();
    let with_attachment = messages.iter().find(|m| m.id.as_str() == "m2").unwrap();
    assert_eq!(with_attachment.attachments.len(), 1);
    assert_eq!(with_attachment.attachments[0].filename, "q1.pdf");
    assert_eq!(with_attachment.body_text.as_deref(), Some("see pdf"));
    assert!(with_attachment.body_html.is_none());
}

#[test]
fn test_incremental_sync_deduplicates_and_replays_safely() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);
    sync.sync_mail(&user(), true).unwrap();

    mailbox.add_thread(thread(
        "t1",
        vec![
            text_message("m1", "t1", "Ann <ann@x.com>", 9, &["INBOX"], "hello"),
            text_message("m2", "t1", "bob@y.com", 10, &["INBOX"], "hi ann"),
            text_message("m5", "t1", "ann@x.com", 13, &["INBOX", "UNREAD"], "news"),
        ],
    ));
    mailbox.with(|s| {
        s.history = vec!["t1".into(), "t2".into(), "t1".into()];
        s.history_cursor = "120".to_string();
    });

    let report = sync.sync_mail(&user(), false).unwrap();
    assert_eq!(report.mode, SyncMode::Incremental);
    assert_eq!(report.counts.threads_processed, 2);
    assert_eq!(report.counts.messages_inserted, 1);
    assert_eq!(stored_cursor(&repo), Some(CursorToken::new("120")));
    assert_eq!(mailbox.calls_to("history:100"), 1);

    // Same batch again
    let replay = sync.sync_mail(&user(), false).unwrap();
    assert_eq!(replay.counts.messages_inserted, 0);
    assert_eq!(repo.count_messages(&user()).unwrap(), 5);
    let t1 = repo.get_thread(&user(), &ThreadId::new("t1")).unwrap().unwrap();
    assert_eq!(t1.message_count, 3);
    assert!(!t1.is_read);
}

#[test]
fn test_incremental_sync_never_moves_cursor_backwards() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);
    sync.sync_mail(&user(), true).unwrap();

    mailbox.with(|s| {
        s.history = vec!["t2".into()];
        s.history_cursor = "90".to_string();
    });
    let report = sync.sync_mail(&user(), false).unwrap();

    assert!(report.cursor.is_none());
    assert_eq!(stored_cursor(&repo), Some(CursorToken::new("100")));
}

#[test]
fn test_expired_cursor_falls_back_to_full_sync() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);
    sync.sync_mail(&user(), true).unwrap();

    mailbox.with(|s| {
        s.history_expired = true;
        s.profile_cursor = "500".to_string();
    });
    let report = sync.sync_mail(&user(), false).unwrap();

    assert_eq!(report.mode, SyncMode::Full);
    assert!(report.fell_back_to_full);
    assert_eq!(report.counts.threads_processed, 3);
    assert_eq!(stored_cursor(&repo), Some(CursorToken::new("500")));
    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Idle);
    assert!(state.last_error.is_none());
}

#[test]
fn test_first_incremental_request_runs_full() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();

    let report = coordinator(&mailbox, &repo).sync_mail(&user(), false).unwrap();

    assert_eq!(report.mode, SyncMode::Full);
    assert!(report.fell_back_to_full);
    assert_eq!(mailbox.calls_to("history:"), 0);
}

#[test]
fn test_concurrent_trigger_is_rejected() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    assert!(repo.try_begin_mail_sync(&user(), Utc::now(), Duration::minutes(15)).unwrap().is_some());

    let err = coordinator(&mailbox, &repo).sync_mail(&user(), true).unwrap_err();

    assert!(matches!(err, SyncError::AlreadyRunning(_)));
    assert_eq!(mailbox.calls_to("profile"), 0);
    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Syncing);
}

#[test]
fn test_stale_lease_is_taken_over() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let crashed_at = Utc::now() - Duration::hours(1);
    assert!(repo.try_begin_mail_sync(&user(), crashed_at, Duration::minutes(15)).unwrap().is_some());

    let report = coordinator(&mailbox, &repo).sync_mail(&user(), true).unwrap();

    assert_eq!(report.counts.threads_processed, 3);
    assert_eq!(repo.get_sync_state(&user()).unwrap().unwrap().status, SyncStatus::Idle);
}

#[test]
fn test_overtaken_pass_cannot_roll_back_cursor() {
    let mailbox = seeded_mailbox();
    mailbox.with(|s| s.profile_cursor = "200".to_string());
    let repo = memory_repo();
    let lease = Duration::minutes(15);
    let slow = repo
        .try_begin_mail_sync(&user(), Utc::now() - Duration::minutes(20), lease)
        .unwrap()
        .unwrap();

    coordinator(&mailbox, &repo).sync_mail(&user(), true).unwrap();
    assert_eq!(stored_cursor(&repo), Some(CursorToken::new("200")));

    let committed = repo
        .complete_mail_sync(&user(), slow, Some(&CursorToken::new("100")), &[], Utc::now())
        .unwrap();
    assert!(!committed);
    assert!(!repo.fail_mail_sync(&user(), slow, "late", Utc::now()).unwrap());

    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    assert_eq!(state.cursor_token, Some(CursorToken::new("200")));
    assert_eq!(state.status, SyncStatus::Idle);
    assert_eq!(state.last_error, None);
}

#[test]
fn test_pass_stops_when_its_lease_is_taken_over() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);
    sync.sync_mail(&user(), true).unwrap();

    let takeover_repo = repo.clone();
    mailbox.with(|s| {
        s.profile_cursor = "300".to_string();
        s.on_list = Some(Box::new(move || {
            let later = Utc::now() + Duration::hours(1);
            let _ = takeover_repo.try_begin_mail_sync(&user(), later, Duration::minutes(15));
        }));
    });
    let err = sync.sync_mail(&user(), true).unwrap_err();

    match &err {
        SyncError::Aborted { source, .. } => {
            assert!(matches!(source.as_ref(), SyncError::LeaseLost(_)))
        }
        other => panic!("expected Aborted, got {other:?}"),
    }
    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    // The newer holder keeps the row; nothing from the overtaken pass landed
    assert_eq!(state.status, SyncStatus::Syncing);
    assert_eq!(state.cursor_token, Some(CursorToken::new("100")));
    assert_eq!(state.checkpoint, None);
    assert_eq!(state.last_error, None);
}

#[test]
fn test_auth_failure_aborts_and_keeps_cursor() {
    let mailbox = seeded_mailbox();
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);
    sync.sync_mail(&user(), true).unwrap();

    mailbox.with(|s| {
        s.history = vec!["t1".into(), "t2".into(), "t3".into()];
        s.history_cursor = "130".to_string();
        s.thread_failures.insert("t2".into(), ThreadFailure::Auth);
    });
    let err = sync.sync_mail(&user(), false).unwrap_err();

    assert!(err.is_auth());
    match &err {
        SyncError::Aborted { counts, .. } => assert_eq!(counts.threads_processed, 1),
        other => panic!("expected Aborted, got {other:?}"),
    }
    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.last_error.is_some());
    assert_eq!(state.cursor_token, Some(CursorToken::new("100")));
    // Only the earlier full pass fetched t3
    assert_eq!(mailbox.calls_to("thread:t3"), 1);
}

#[test]
fn test_interrupted_full_sync_resumes_from_checkpoint() {
    let mailbox = seeded_mailbox();
    mailbox.add_thread(thread(
        "t4",
        vec![text_message("m6", "t4", "erin@v.com", 13, &["INBOX"], "hey")],
    ));
    mailbox.add_thread(thread(
        "t5",
        vec![text_message("m7", "t5", "fay@u.com", 14, &["INBOX"], "yo")],
    ));
    // Inbox order: t5 t4 | t3 t2 | t1
    mailbox.with(|s| {
        s.thread_failures.insert("t2".into(), ThreadFailure::Auth);
    });
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);

    assert!(sync.sync_mail(&user(), true).is_err());
    let checkpoint = repo.get_sync_state(&user()).unwrap().unwrap().checkpoint.unwrap();
    assert_eq!(checkpoint.threads_listed, 2);
    assert_eq!(checkpoint.captured_cursor, CursorToken::new("100"));

    mailbox.with(|s| {
        s.thread_failures.clear();
        s.profile_cursor = "999".to_string();
    });
    let report = sync.sync_mail(&user(), true).unwrap();

    assert!(report.resumed_from_checkpoint);
    assert_eq!(report.counts.threads_processed, 3);
    assert_eq!(mailbox.calls_to("profile"), 1);
    assert_eq!(mailbox.calls_to("thread:t5"), 1);
    assert_eq!(repo.count_threads(&user()).unwrap(), 5);
    let state = repo.get_sync_state(&user()).unwrap().unwrap();
    assert!(state.checkpoint.is_none());
    assert_eq!(state.cursor_token, Some(CursorToken::new("100")));
}

#[test]
fn test_failed_threads_are_retried_by_next_incremental_pass() {
    let mailbox = seeded_mailbox();
    mailbox.with(|s| {
        s.thread_failures.insert("t2".into(), ThreadFailure::Transient);
    });
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);

    let first = sync.sync_mail(&user(), true).unwrap();
    assert_eq!(first.counts.threads_failed, 1);
    assert_eq!(first.failed_thread_ids, vec![ThreadId::new("t2")]);
    assert!(repo.get_thread(&user(), &ThreadId::new("t2")).unwrap().is_none());

    mailbox.with(|s| {
        s.thread_failures.clear();
        s.history_cursor = "110".to_string();
    });
    let second = sync.sync_mail(&user(), false).unwrap();

    assert_eq!(second.mode, SyncMode::Incremental);
    assert_eq!(second.counts.threads_processed, 1);
    assert!(second.failed_thread_ids.is_empty());
    assert!(repo.get_thread(&user(), &ThreadId::new("t2")).unwrap().is_some());
    assert!(repo.get_sync_state(&user()).unwrap().unwrap().failed_thread_ids.is_empty());
}

#[test]
fn test_vanished_thread_retry_is_dropped() {
    let mailbox = seeded_mailbox();
    mailbox.with(|s| {
        s.thread_failures.insert("t2".into(), ThreadFailure::NotFound);
    });
    let repo = memory_repo();
    let sync = coordinator(&mailbox, &repo);
    sync.sync_mail(&user(), true).unwrap();

    mailbox.with(|s| s.history_cursor = "110".to_string());
    let report = sync.sync_mail(&user(), false).unwrap();

    assert_eq!(report.counts.threads_failed, 0);
    assert!(report.failed_thread_ids.is_empty());
    assert_eq!(mailbox.calls_to("thread:t2"), 2);
}

#[test]
fn test_undecodable_messages_are_skipped() {
    let mailbox = FakeMailbox::new();
    mailbox.add_thread(thread(
        "t1",
        vec![
            broken_message("bad", "t1"),
            text_message("m1", "t1", "ann@x.com", 9, &["INBOX"], "ok"),
        ],
    ));
    mailbox.add_thread(thread("t2", vec![broken_message("worse", "t2")]));
    mailbox.with(|s| s.profile_cursor = "5".to_string());
    let repo = memory_repo();

    let report = coordinator(&mailbox, &repo).sync_mail(&user(), true).unwrap();

    assert_eq!(report.counts.messages_skipped, 2);
    assert_eq!(report.counts.threads_processed, 1);
    assert_eq!(report.counts.threads_failed, 1);
    assert!(report.failed_thread_ids.is_empty());
    let t1 = repo.get_thread(&user(), &ThreadId::new("t1")).unwrap().unwrap();
    assert_eq!(t1.message_count, 1);
    assert!(repo.get_thread(&user(), &ThreadId::new("t2")).unwrap().is_none());
}

#[test]
fn test_sqlite_repository_matches_memory_behavior() {
    let dir = TempDir::new().unwrap();
    let repo: Arc<dyn Repository> =
        Arc::new(SqliteRepository::open(&dir.path().join("courier.db")).unwrap());
    let mailbox = seeded_mailbox();
    let sync = coordinator(&mailbox, &repo);

    sync.sync_mail(&user(), true).unwrap();
    let second = sync.sync_mail(&user(), true).unwrap();

    assert_eq!(second.counts.messages_inserted, 0);
    assert_eq!(repo.count_threads(&user()).unwrap(), 3);
    assert_eq!(repo.count_messages(&user()).unwrap(), 4);
    assert_eq!(stored_cursor(&repo), Some(CursorToken::new("100")));

    let messages = repo.list_messages_for_thread(&user(), &ThreadId::new("t1")).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body_text.as_deref(), Some("hello"));
    assert_eq!(messages[1].from.email, "bob@y.com");

    assert!(repo.try_begin_mail_sync(&user(), Utc::now(), Duration::minutes(15)).unwrap().is_some());
    assert!(matches!(
        sync.sync_mail(&user(), false),
        Err(SyncError::AlreadyRunning(_))
    ));
}
