//! End-to-end scenarios against a live server.

use crate::harness::*;
use sage_client::{Client, ClientError};
use sage_protocol::{Payload, SolutionPayload, CODE_INVALID_SOLUTION};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_happy_path() {
    let server = TestServer::start(|config| {
        config.max_connections = 100;
        config.initial_difficulty = 1;
        config.challenge_ttl = Duration::from_secs(300);
    })
    .await;

    let mut client = Client::connect(server.client_config()).await.unwrap();
    let quote = client.get_quote(&CancellationToken::new()).await.unwrap();

    assert!(!quote.text.is_empty());
    assert!(!quote.author.is_empty());
    client.close().await.unwrap();

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_bad_solution_gets_error_and_counts_failure() {
    let server = TestServer::start(|_| {}).await;
    let client_ip = "127.0.0.1".parse().unwrap();

    let mut conn = server.connect_raw().await;
    let _challenge = recv_challenge(&mut conn).await;

    // A solution referencing a nonce that was never issued
    send_solution(
        &mut conn,
        SolutionPayload {
            prefix: "bogus".to_string(),
            solution: "x".to_string(),
            nonce: "bogus".to_string(),
        },
    )
    .await;

    match recv_payload(&mut conn).await {
        Some(Payload::Error(e)) => assert_eq!(e.code, CODE_INVALID_SOLUTION),
        other => panic!("expected framed error, got {other:?}"),
    }

    let admission = server.admission.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            admission.failure_count(client_ip) == 1
        })
        .await,
        "failure was not registered"
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_attempt_block_and_recovery() {
    let server = TestServer::start(|config| {
        config.protection.max_failed_attempts = 3;
        config.protection.failed_block_time = Duration::from_secs(1);
    })
    .await;
    let client_ip = "127.0.0.1".parse().unwrap();

    for _ in 0..3 {
        let mut conn = server.connect_raw().await;
        let _ = recv_challenge(&mut conn).await;
        send_solution(
            &mut conn,
            SolutionPayload {
                prefix: "bogus".to_string(),
                solution: "x".to_string(),
                nonce: "bogus".to_string(),
            },
        )
        .await;
        let _ = recv_payload(&mut conn).await;
    }

    let admission = server.admission.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            admission.failure_count(client_ip) >= 3
        })
        .await
    );

    // The fourth connection is closed with no frame sent
    let mut blocked = server.connect_raw().await;
    assert!(recv_payload(&mut blocked).await.is_none());

    // After the block time a new connection is admitted again
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let mut recovered = server.connect_raw().await;
    let _ = recv_challenge(&mut recovered).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_per_ip_connection_cap() {
    let server = TestServer::start(|config| {
        config.protection.max_conns_per_ip = 2;
        config.protection.conn_ttl = Duration::from_secs(60);
    })
    .await;

    // Two held connections fill the per-IP allowance
    let mut first = server.connect_raw().await;
    let _ = recv_challenge(&mut first).await;
    let mut second = server.connect_raw().await;
    let _ = recv_challenge(&mut second).await;

    // The third is closed without framing
    let mut third = server.connect_raw().await;
    assert!(recv_payload(&mut third).await.is_none());

    // Releasing one slot restores admission
    drop(first);
    let admission = server.admission.clone();
    assert!(
        wait_for(Duration::from_secs(2), || admission.live_connections() < 2).await,
        "released connection was not reaped"
    );

    let mut fourth = server.connect_raw().await;
    let _ = recv_challenge(&mut fourth).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_difficulty_rises_and_falls_with_load() {
    let server = TestServer::start(|config| {
        config.max_connections = 10;
        config.initial_difficulty = 2;
        config.adjust_interval = Duration::from_millis(200);
    })
    .await;

    // Hold nine connections: above the 80% threshold
    let mut held = Vec::new();
    for _ in 0..9 {
        let mut conn = server.connect_raw().await;
        let _ = recv_challenge(&mut conn).await;
        held.push(conn);
    }

    // After an adjust interval the next challenge is issued at base + 2
    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut probe = server.connect_raw().await;
    let challenge = recv_challenge(&mut probe).await;
    assert_eq!(challenge.difficulty, 4);

    // Releasing the holders brings the difficulty back to base
    drop(held);
    drop(probe);
    let admission = server.admission.clone();
    assert!(wait_for(Duration::from_secs(2), || admission.live_connections() == 0).await);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut calm = server.connect_raw().await;
    let challenge = recv_challenge(&mut calm).await;
    assert_eq!(challenge.difficulty, 2);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_with_inflight_handler() {
    let server = TestServer::start(|config| {
        config.shutdown_timeout = Duration::from_secs(10);
    })
    .await;
    let addr = server.addr;

    // Start an exchange but do not answer yet
    let mut conn = server.connect_raw().await;
    let challenge = recv_challenge(&mut conn).await;

    // Shut down while the handler is mid-exchange
    let stopping = tokio::spawn(server.stop());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // New dials fail once the listener is gone
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());

    // The in-flight handler still completes the exchange
    answer_challenge(&mut conn, &challenge).await;
    match recv_payload(&mut conn).await {
        Some(Payload::Quote(q)) => assert!(!q.text.is_empty()),
        other => panic!("expected quote, got {other:?}"),
    }

    stopping.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tampered_solution_rejected() {
    // High difficulty so a junk string cannot verify by accident
    let server = TestServer::start(|config| {
        config.initial_difficulty = 8;
        config.max_difficulty = 8;
    })
    .await;

    let mut conn = server.connect_raw().await;
    let challenge = recv_challenge(&mut conn).await;

    // Tamper with the solution so it cannot verify
    send_solution(
        &mut conn,
        SolutionPayload {
            prefix: challenge.prefix.clone(),
            solution: "definitely-wrong".to_string(),
            nonce: challenge.nonce.clone(),
        },
    )
    .await;

    match recv_payload(&mut conn).await {
        Some(Payload::Error(e)) => assert_eq!(e.code, CODE_INVALID_SOLUTION),
        other => panic!("expected framed error, got {other:?}"),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_client_aborts_solve() {
    let server = TestServer::start(|config| {
        // A difficulty this high cannot be solved while the test runs
        config.initial_difficulty = 8;
        config.max_difficulty = 8;
    })
    .await;

    let mut client = Client::connect(server.client_config()).await.unwrap();
    let cancel = CancellationToken::new();

    let aborter = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        aborter.cancel();
    });

    assert!(matches!(
        client.get_quote(&cancel).await,
        Err(ClientError::Cancelled)
    ));

    server.stop().await.unwrap();
}
