//! Drain passes against an in-memory store and transport

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use postbox_common::{LogResult, Message, Priority, QueuedMessage};
use postbox_delivery::{
    DeliveryConfig, DeliveryEngine, DeliveryError, Drain, DrainSummary, FileLock, Outcome,
    ProcessLock, Retry,
};
use postbox_queue::{MemoryQueueStore, QueueStore};
use postbox_transport::{ErrorKind, MemoryTransport, TransportError};
use pretty_assertions::assert_eq;
use support::{FailingDeleteStore, Harness, message};

fn completed(drain: Drain) -> DrainSummary {
    match drain {
        Drain::Completed(summary) => summary,
        other => panic!("Expected a completed pass, got {other:?}"),
    }
}

#[tokio::test]
async fn delivers_in_priority_then_age_order() {
    let harness = Harness::new();
    let now = Utc::now();

    for (to, priority, minutes_ago) in [
        ("low-old@example.com", Priority::Low, 60),
        ("normal-new@example.com", Priority::Normal, 1),
        ("high-new@example.com", Priority::High, 2),
        ("normal-old@example.com", Priority::Normal, 30),
        ("high-old@example.com", Priority::High, 45),
    ] {
        let message = Message::from_new(message(to, "Ordered"));
        let mut queued = QueuedMessage::new(message.id, priority);
        queued.queued_at = now - chrono::Duration::minutes(minutes_ago);
        harness.store.insert(message, queued).unwrap();
    }

    let summary = completed(harness.engine().drain().await.unwrap());
    assert_eq!(summary.sent, 5);

    let order: Vec<String> = harness
        .transport
        .delivered()
        .into_iter()
        .map(|message| message.to_address)
        .collect();
    assert_eq!(
        order,
        vec![
            "high-old@example.com",
            "high-new@example.com",
            "normal-old@example.com",
            "normal-new@example.com",
            "low-old@example.com",
        ]
    );
}

#[tokio::test]
async fn blacklisted_recipient_is_never_sent() {
    let harness = Harness::new();
    harness
        .store
        .add_to_blacklist("blocked@example.com")
        .await
        .unwrap();
    let blocked = harness
        .enqueue("Blocked <BLOCKED@example.com>", Priority::High)
        .await;
    let fine = harness.enqueue("fine@example.com", Priority::Normal).await;

    let summary = completed(harness.engine().drain().await.unwrap());

    assert_eq!((summary.sent, summary.skipped, summary.failed), (1, 1, 0));
    assert_eq!(harness.transport.attempts(), 1);
    assert_eq!(harness.transport.delivered()[0].id, fine);
    assert!(harness.store.queued(&blocked).await.unwrap().is_none());
    assert!(harness.store.message(&blocked).await.is_ok());
    assert_eq!(harness.results(&blocked).await, vec![LogResult::Skipped]);
}

#[tokio::test]
async fn transient_failure_defers_and_is_not_retried_in_pass() {
    let harness = Harness::with_config(DeliveryConfig {
        block_size: 1,
        ..DeliveryConfig::default()
    });
    harness
        .transport
        .fail_recipient("refused@example.com", ErrorKind::RecipientRefused);

    let refused = harness
        .enqueue("refused@example.com", Priority::High)
        .await;
    harness.enqueue("fine@example.com", Priority::Normal).await;

    let summary = completed(harness.engine().drain().await.unwrap());
    assert_eq!(
        (summary.sent, summary.failed, summary.deferred),
        (1, 1, 1)
    );
    assert_eq!(harness.transport.attempts(), 2);

    let queued = harness.store.queued(&refused).await.unwrap().unwrap();
    assert!(queued.is_deferred());
    assert_eq!(queued.retries, 0);
    assert_eq!(harness.results(&refused).await, vec![LogResult::Failed]);

    let logs = harness.store.logs(Some(&refused)).await.unwrap();
    assert!(logs[0].detail.contains("Recipient refused"));

    // Deferred entries are invisible to later passes
    let summary = completed(harness.engine().drain().await.unwrap());
    assert!(summary.is_empty());
}

#[tokio::test]
async fn permanent_failure_stays_eligible_but_is_excluded_for_the_pass() {
    let harness = Harness::with_config(DeliveryConfig {
        block_size: 1,
        ..DeliveryConfig::default()
    });
    harness
        .transport
        .fail_recipient("rejected@example.com", ErrorKind::DataRejected);

    let rejected = harness
        .enqueue("rejected@example.com", Priority::High)
        .await;
    harness.enqueue("a@example.com", Priority::Normal).await;
    harness.enqueue("b@example.com", Priority::Low).await;

    let summary = completed(harness.engine().drain().await.unwrap());

    assert_eq!(
        (summary.sent, summary.failed, summary.deferred),
        (2, 1, 0)
    );
    // Each entry was tried exactly once, despite the failure staying eligible
    assert_eq!(harness.transport.attempts(), 3);

    let queued = harness.store.queued(&rejected).await.unwrap().unwrap();
    assert!(!queued.is_deferred());
    assert_eq!(harness.results(&rejected).await, vec![LogResult::Failed]);

    // The next pass tries it again
    let summary = completed(harness.engine().drain().await.unwrap());
    assert_eq!(summary.failed, 1);
    assert_eq!(
        harness.results(&rejected).await,
        vec![LogResult::Failed, LogResult::Failed]
    );
}

#[tokio::test]
async fn success_removes_queue_entry_and_keeps_message() {
    let harness = Harness::new();
    let id = harness.enqueue("to@example.com", Priority::Normal).await;

    let summary = completed(harness.engine().drain().await.unwrap());

    assert_eq!(summary.sent, 1);
    assert!(harness.store.queued(&id).await.unwrap().is_none());
    assert_eq!(harness.store.message(&id).await.unwrap().id, id);
    assert_eq!(harness.results(&id).await, vec![LogResult::Sent]);
    assert_eq!(harness.transport.opens(), 1);
    assert_eq!(harness.transport.closes(), 1);
}

#[tokio::test]
async fn round_trip_high_priority() {
    let harness = Harness::new();
    let queued = harness
        .store
        .enqueue(message("vip@example.com", "Urgent"), Priority::High)
        .await
        .unwrap();

    let summary = completed(harness.engine().drain().await.unwrap());

    assert_eq!(summary.sent, 1);
    let message = harness.store.message(&queued.message_id).await.unwrap();
    assert_eq!(message.subject, "Urgent");
    assert!(
        harness
            .store
            .queued(&queued.message_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn retried_entries_are_attempted_by_the_next_pass() {
    let harness = Harness::new();
    harness
        .transport
        .fail_recipient("refused@example.com", ErrorKind::RecipientRefused);
    let refused = harness
        .enqueue("refused@example.com", Priority::Normal)
        .await;

    completed(harness.engine().drain().await.unwrap());
    assert_eq!(harness.transport.attempts(), 1);

    assert_eq!(
        harness.engine().retry_deferred(None).await.unwrap(),
        Retry::Completed(1)
    );
    assert!(!harness.lock.is_held());

    let queued = harness.store.queued(&refused).await.unwrap().unwrap();
    assert!(!queued.is_deferred());
    assert_eq!(queued.retries, 1);

    let summary = completed(harness.engine().drain().await.unwrap());
    assert_eq!((summary.failed, summary.deferred), (1, 1));
    assert_eq!(harness.transport.attempts(), 2);
    assert_eq!(
        harness.results(&refused).await,
        vec![LogResult::Failed, LogResult::Failed]
    );

    // One retry allowed, and it has been used
    assert_eq!(
        harness.engine().retry_deferred(Some(1)).await.unwrap(),
        Retry::Completed(0)
    );
    assert!(harness.store.queued(&refused).await.unwrap().unwrap().is_deferred());
}

#[tokio::test]
async fn retry_while_locked_leaves_entries_deferred() {
    let harness = Harness::new();
    let id = harness.enqueue("to@example.com", Priority::Normal).await;
    harness.store.defer(&id, Utc::now()).await.unwrap();

    let held = harness.lock.try_acquire().unwrap().unwrap();
    assert_eq!(
        harness.engine().retry_deferred(None).await.unwrap(),
        Retry::AlreadyLocked
    );
    assert!(harness.store.queued(&id).await.unwrap().unwrap().is_deferred());

    drop(held);
    assert_eq!(
        harness.engine().retry_deferred(None).await.unwrap(),
        Retry::Completed(1)
    );
}

#[tokio::test]
async fn drain_while_locked_returns_without_delivering() {
    let harness = Harness::new();
    let id = harness.enqueue("to@example.com", Priority::Normal).await;

    let _held = harness.lock.try_acquire().unwrap().unwrap();

    assert_eq!(harness.engine().drain().await.unwrap(), Drain::AlreadyLocked);
    assert_eq!(harness.transport.opens(), 0);
    assert_eq!(harness.transport.attempts(), 0);
    assert!(harness.store.queued(&id).await.unwrap().is_some());
    assert!(harness.store.logs(None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lock_wait_gives_up_after_timeout() {
    let harness = Harness::with_config(DeliveryConfig {
        lock_wait_timeout_secs: 2.0,
        ..DeliveryConfig::default()
    });
    harness.enqueue("to@example.com", Priority::Normal).await;

    let _held = harness.lock.try_acquire().unwrap().unwrap();

    assert_eq!(harness.engine().drain().await.unwrap(), Drain::TimedOut);
    assert_eq!(harness.transport.attempts(), 0);
}

#[tokio::test]
async fn file_lock_excludes_a_second_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = DeliveryConfig {
        lock_path: dir.path().join("send_mail"),
        ..DeliveryConfig::default()
    };
    let store = MemoryQueueStore::new();
    let transport = MemoryTransport::new();
    store
        .enqueue(message("to@example.com", "Hi"), Priority::Normal)
        .await
        .unwrap();

    let engine = |lock: FileLock| {
        DeliveryEngine::new(
            &config,
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
            Arc::new(lock),
        )
    };

    // Another process's lock, as far as flock is concerned
    let other = FileLock::new(&config.lock_path);
    let held = other.try_acquire().unwrap().unwrap();

    let engine = engine(FileLock::new(&config.lock_path));
    assert_eq!(engine.drain().await.unwrap(), Drain::AlreadyLocked);

    held.release();
    assert_eq!(completed(engine.drain().await.unwrap()).sent, 1);
    assert_eq!(transport.delivered().len(), 1);
}

#[tokio::test]
async fn connection_failure_aborts_pass_and_releases_lock() {
    let harness = Harness::new();
    let id = harness.enqueue("to@example.com", Priority::Normal).await;
    harness
        .transport
        .fail_open(TransportError::socket("connection refused"));

    let err = harness.engine().drain().await.unwrap_err();

    assert!(matches!(err, DeliveryError::Connect(ref e) if e.kind() == ErrorKind::Socket));
    assert!(!harness.lock.is_held());
    assert!(harness.store.queued(&id).await.unwrap().is_some());
    assert!(harness.store.logs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn store_failure_aborts_pass_and_releases_lock() {
    let harness = Harness::new();
    let store = FailingDeleteStore {
        inner: harness.store.clone(),
    };
    harness.enqueue("to@example.com", Priority::Normal).await;

    let err = harness
        .engine_with_store(Arc::new(store))
        .drain()
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Store(_)));
    assert!(!harness.lock.is_held());
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_between_messages_and_releases_lock() {
    let harness = Harness::with_config(DeliveryConfig {
        pass_deadline_secs: Some(1),
        ..DeliveryConfig::default()
    });
    harness.transport.delay_sends(Duration::from_millis(600));

    for n in 0..3 {
        harness
            .enqueue(&format!("rcpt{n}@example.com"), Priority::Normal)
            .await;
    }

    let err = harness.engine().drain().await.unwrap_err();

    assert!(matches!(err, DeliveryError::Deadline(d) if d == Duration::from_secs(1)));
    assert!(!harness.lock.is_held());
    // Two fully handled, one untouched
    assert_eq!(harness.transport.delivered().len(), 2);
    assert_eq!(harness.store.count_queued().await.unwrap(), 1);
    assert_eq!(harness.store.logs(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn single_message_delivery_opens_its_own_connection() {
    let harness = Harness::new();
    let engine = harness.engine();

    let id = harness.enqueue("solo@example.com", Priority::Normal).await;
    let entry = harness
        .store
        .next_block(None, &Default::default())
        .await
        .unwrap()
        .remove(0);

    assert_eq!(engine.deliver(&entry, None, None).await.unwrap(), Outcome::Sent);
    assert_eq!(harness.transport.opens(), 1);
    assert_eq!(harness.transport.closes(), 1);
    assert!(harness.store.queued(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn single_message_checks_blacklist_live() {
    let harness = Harness::new();
    let engine = harness.engine();

    let id = harness.enqueue("late@example.com", Priority::Normal).await;
    let entry = harness
        .store
        .next_block(None, &Default::default())
        .await
        .unwrap()
        .remove(0);
    harness
        .store
        .add_to_blacklist("late@example.com")
        .await
        .unwrap();

    assert_eq!(
        engine.deliver(&entry, None, None).await.unwrap(),
        Outcome::Skipped
    );
    assert_eq!(harness.transport.opens(), 0);
    assert_eq!(harness.results(&id).await, vec![LogResult::Skipped]);
}

#[tokio::test]
async fn single_message_open_failure_is_a_failed_outcome() {
    let harness = Harness::new();
    let engine = harness.engine();
    harness
        .transport
        .fail_open(TransportError::socket("connection refused"));

    let id = harness.enqueue("to@example.com", Priority::Normal).await;
    let entry = harness
        .store
        .next_block(None, &Default::default())
        .await
        .unwrap()
        .remove(0);

    assert_eq!(
        engine.deliver(&entry, None, None).await.unwrap(),
        Outcome::Failed { deferred: true }
    );
    assert!(harness.store.queued(&id).await.unwrap().unwrap().is_deferred());
    assert_eq!(harness.results(&id).await, vec![LogResult::Failed]);
}

#[tokio::test]
async fn empty_queue_completes_with_empty_summary() {
    let harness = Harness::new();

    let summary = completed(harness.engine().drain().await.unwrap());

    assert!(summary.is_empty());
    assert_eq!(summary.to_string(), "0 sent, 0 failed (0 deferred), 0 skipped.");
    assert!(!harness.lock.is_held());
}
