// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::error::NetError;
use crate::protocol::handshake::*;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

#[test]
fn test_transform_is_deterministic() {
    for value in [0u64, 1, 0xFFFF_FFFF_FFFF_FFFF, 0x0123_4567_89AB_CDEF] {
        assert_eq!(transform(value), transform(value));
    }
}

#[test]
fn test_transform_is_injective_on_sample() {
    let mut seen = std::collections::HashSet::new();
    for value in 0u64..4096 {
        assert!(seen.insert(transform(value)), "collision at {value}");
    }
}

#[test]
fn test_client_answer_matches_server_expectation() {
    for _ in 0..1000 {
        let challenge = Challenge::generate();
        assert_eq!(transform(challenge.value()), challenge.expected());
        assert!(challenge.verify(transform(challenge.value())));
    }
}

#[test]
fn test_wrong_answer_is_rejected() {
    let challenge = Challenge::from_value(0xDEAD_BEEF);
    assert!(!challenge.verify(challenge.value()));
    assert!(!challenge.verify(challenge.expected() ^ 1));
}

#[test]
fn test_generated_challenges_differ() {
    let a = Challenge::generate();
    let b = Challenge::generate();
    assert_ne!(a.value(), b.value());
}

#[test]
fn test_seed_comes_from_absolute_clock() {
    // Nanoseconds since 1970 passed 2^60 in 2006; a process-relative
    // reading stays far below that for the life of any test run
    let seed = clock_seed();
    assert!(seed >= 1 << 60, "seed {seed:#x} looks process-relative");
}

#[tokio::test]
async fn test_handshake_over_stream() {
    let (mut server_side, mut client_side) = duplex(64);
    let challenge = Challenge::generate();

    let server = tokio::spawn(async move { server_handshake(&mut server_side, &challenge).await });
    let answer = client_handshake(&mut client_side)
        .await
        .expect("client half should succeed");

    server
        .await
        .expect("server task should not panic")
        .expect("server should accept the answer");
    assert_eq!(answer, challenge.expected());
}

#[tokio::test]
async fn test_handshake_rejects_echoed_challenge() {
    let (mut server_side, mut impostor) = duplex(64);
    let challenge = Challenge::generate();

    let server = tokio::spawn(async move { server_handshake(&mut server_side, &challenge).await });

    // Echo the challenge back without transforming it
    let mut raw = [0u8; 8];
    impostor.read_exact(&mut raw).await.unwrap();
    impostor.write_all(&raw).await.unwrap();

    let result = server.await.unwrap();
    assert!(matches!(result, Err(NetError::HandshakeFailed)));
}

#[tokio::test]
async fn test_handshake_fails_when_peer_hangs_up() {
    let (mut server_side, impostor) = duplex(64);
    drop(impostor);

    let result = server_handshake(&mut server_side, &Challenge::generate()).await;
    assert!(matches!(result, Err(NetError::Io(_))));
}

#[tokio::test]
async fn test_client_reports_closed_when_server_hangs_up() {
    let (mut client_side, server_side) = duplex(64);
    drop(server_side);

    let result = client_handshake(&mut client_side).await;
    assert!(matches!(result, Err(NetError::ConnectionClosed)));
}

#[tokio::test]
async fn test_server_reports_closed_when_answer_never_comes() {
    let (mut server_side, mut client_side) = duplex(64);
    let challenge = Challenge::generate();

    let server = tokio::spawn(async move { server_handshake(&mut server_side, &challenge).await });

    // Read the challenge, then hang up without answering
    let mut raw = [0u8; 8];
    client_side.read_exact(&mut raw).await.unwrap();
    drop(client_side);

    let result = server.await.unwrap();
    assert!(matches!(result, Err(NetError::ConnectionClosed)));
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let (mut client_side, _server_side) = duplex(64);

    let result = with_timeout(
        std::time::Duration::from_millis(50),
        client_handshake(&mut client_side),
    )
    .await;
    assert!(matches!(result, Err(NetError::HandshakeTimeout)));
}

#[tokio::test]
async fn test_timeout_passes_through_exchange_result() {
    let (mut server_side, mut client_side) = duplex(64);
    let challenge = Challenge::generate();
    let limit = std::time::Duration::from_secs(5);

    let (server, client) = tokio::join!(
        with_timeout(limit, server_handshake(&mut server_side, &challenge)),
        with_timeout(limit, client_handshake(&mut client_side)),
    );
    server.expect("server half should succeed");
    assert_eq!(client.expect("client half should succeed"), challenge.expected());
}
