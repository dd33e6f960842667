//! Passes that outlive the connection they started with

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;

use postbox_common::{LogResult, Priority};
use postbox_delivery::{DeliveryEngine, DeliveryError, Drain};
use postbox_queue::QueueStore;
use postbox_transport::{SmtpConfig, SmtpTransport, TransportError};
use pretty_assertions::assert_eq;
use support::Harness;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// Serve `sessions` sessions in turn. The first hangs up as soon as it sees
/// `MAIL FROM`; the rest accept everything. Returns the recipients accepted.
async fn spawn_flaky_server(sessions: usize) -> (SmtpConfig, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut accepted = Vec::new();

        for session in 0..sessions {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut in_data = false;
            let mut recipient = None;

            write.write_all(b"220 flaky.test ESMTP\r\n").await.unwrap();

            while let Some(line) = lines.next_line().await.unwrap() {
                if in_data {
                    if line == "." {
                        in_data = false;
                        accepted.extend(recipient.take());
                        write.write_all(b"250 Queued\r\n").await.unwrap();
                    }
                    continue;
                }

                let command = line.to_ascii_uppercase();
                if command.starts_with("MAIL FROM") && session == 0 {
                    break;
                }

                let reply: &[u8] = if command.starts_with("RCPT TO") {
                    recipient = Some(line["RCPT TO:".len()..].to_string());
                    b"250 Ok\r\n"
                } else if command == "DATA" {
                    in_data = true;
                    b"354 Go ahead\r\n"
                } else if command == "QUIT" {
                    write.write_all(b"221 Bye\r\n").await.unwrap();
                    break;
                } else {
                    b"250 Ok\r\n"
                };

                write.write_all(reply).await.unwrap();
            }
        }

        accepted
    });

    let config = SmtpConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..SmtpConfig::default()
    };

    (config, handle)
}

#[tokio::test]
async fn dropped_session_is_replaced_mid_pass() {
    let harness = Harness::new();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            harness
                .enqueue(&format!("rcpt{n}@example.com"), Priority::Normal)
                .await,
        );
    }

    let (config, server) = spawn_flaky_server(2).await;
    let engine = DeliveryEngine::new(
        &harness.config,
        Arc::new(harness.store.clone()),
        Arc::new(SmtpTransport::new(config)),
        Arc::new(harness.lock.clone()),
    );

    let Drain::Completed(summary) = engine.drain().await.unwrap() else {
        panic!("Expected a completed pass");
    };

    assert_eq!(
        (summary.sent, summary.failed, summary.deferred),
        (4, 1, 1)
    );
    assert_eq!(server.await.unwrap().len(), 4);

    // Only the entry that was on the wire when the session dropped is held back
    assert_eq!(harness.store.count_queued().await.unwrap(), 1);
    let mut failed = 0;
    for id in &ids {
        if harness.results(id).await == vec![LogResult::Failed] {
            failed += 1;
            assert!(harness.store.queued(id).await.unwrap().unwrap().is_deferred());
        }
    }
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn lost_memory_connection_is_reopened() {
    let harness = Harness::new();
    harness.transport.disconnect_on("drop@example.com");

    let dropped = harness.enqueue("drop@example.com", Priority::High).await;
    harness.enqueue("a@example.com", Priority::Normal).await;
    harness.enqueue("b@example.com", Priority::Low).await;

    let Drain::Completed(summary) = harness.engine().drain().await.unwrap() else {
        panic!("Expected a completed pass");
    };

    assert_eq!((summary.sent, summary.deferred), (2, 1));
    assert_eq!(harness.transport.opens(), 2);
    assert_eq!(harness.transport.closes(), 2);
    assert!(harness.store.queued(&dropped).await.unwrap().unwrap().is_deferred());
}

#[tokio::test]
async fn failed_reopen_aborts_the_pass() {
    let harness = Harness::new();
    harness.transport.disconnect_on("drop@example.com");
    harness
        .transport
        .fail_open_after(1, TransportError::socket("connection refused"));

    let dropped = harness.enqueue("drop@example.com", Priority::High).await;
    let untouched = harness.enqueue("a@example.com", Priority::Normal).await;

    let err = harness.engine().drain().await.unwrap_err();

    assert!(matches!(err, DeliveryError::Connect(_)));
    assert!(!harness.lock.is_held());
    assert!(harness.store.queued(&dropped).await.unwrap().unwrap().is_deferred());

    let untouched = harness.store.queued(&untouched).await.unwrap().unwrap();
    assert!(!untouched.is_deferred());
    assert!(harness.results(&untouched.message_id).await.is_empty());
    assert_eq!(harness.transport.opens(), 2);
}
