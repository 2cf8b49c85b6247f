//! Admission pipeline behavior observed from the client side.
//!
//! Every rejection here must look the same to the peer: the connection
//! closes with no frame ever sent.

use crate::harness::*;
use sage_protocol::SolutionPayload;
use std::time::Duration;

#[tokio::test]
async fn test_denylisted_ip_closed_without_frame() {
    let server = TestServer::start(|config| {
        config.protection.ip_denylist = vec!["127.0.0.1".parse().unwrap()];
    })
    .await;

    let mut conn = server.connect_raw().await;
    assert!(recv_payload(&mut conn).await.is_none());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_allowlist_admits_only_listed() {
    // 127.0.0.1 is not on the allow-list, so every local dial is rejected
    let server = TestServer::start(|config| {
        config.protection.ip_allowlist = vec!["10.11.12.13".parse().unwrap()];
    })
    .await;

    let mut conn = server.connect_raw().await;
    assert!(recv_payload(&mut conn).await.is_none());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_flood_bucket_rejects_burst() {
    let server = TestServer::start(|config| {
        config.protection.flood_bucket_size = 2;
        config.protection.flood_fill_rate = 0.1;
    })
    .await;

    let mut first = server.connect_raw().await;
    let _ = recv_challenge(&mut first).await;
    let mut second = server.connect_raw().await;
    let _ = recv_challenge(&mut second).await;

    // The bucket is empty and refills far too slowly for this test
    let mut flooded = server.connect_raw().await;
    assert!(recv_payload(&mut flooded).await.is_none());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_global_cap_closes_excess_connections() {
    let server = TestServer::start(|config| {
        config.max_connections = 2;
    })
    .await;

    let mut first = server.connect_raw().await;
    let _ = recv_challenge(&mut first).await;
    let mut second = server.connect_raw().await;
    let _ = recv_challenge(&mut second).await;

    let mut excess = server.connect_raw().await;
    assert!(recv_payload(&mut excess).await.is_none());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_slow_reader_disconnected() {
    let server = TestServer::start(|config| {
        // No loopback client can sustain this rate
        config.protection.min_read_rate = 1_000_000_000;
    })
    .await;
    let client_ip = "127.0.0.1".parse().unwrap();

    let mut conn = server.connect_raw().await;
    let challenge = recv_challenge(&mut conn).await;

    // Give the guard a measurable window, then answer: the solution frame
    // arrives at a rate far below the minimum
    tokio::time::sleep(Duration::from_millis(200)).await;
    send_solution(
        &mut conn,
        SolutionPayload {
            prefix: challenge.prefix,
            solution: "1".to_string(),
            nonce: challenge.nonce,
        },
    )
    .await;

    // The server tears the connection down without a verdict frame
    assert!(recv_payload(&mut conn).await.is_none());

    // Slow reads are an I/O failure, so they count against the peer
    let admission = server.admission.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            admission.failure_count(client_ip) == 1
        })
        .await
    );

    server.stop().await.unwrap();
}
