//! Integration test over real loopback UDP.
//!
//! The passive endpoint runs in a background task; the active endpoint runs
//! in the test body.  Both must close gracefully with every message
//! delivered in order.

use std::net::SocketAddr;
use std::time::Duration;

use rudp::{CloseReason, Endpoint, EndpointConfig, Socket};

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

/// Bind a socket on an OS-chosen loopback port and return
/// `(socket, resolved_addr)`.
async fn bind_loopback() -> (Socket, SocketAddr) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let socket = Socket::bind(addr).await.expect("bind loopback socket");
    let local = socket.local_addr;
    (socket, local)
}

fn msgs(prefix: &str, n: u32) -> Vec<Vec<u8>> {
    (1..=n).map(|i| format!("{prefix} {i}").into_bytes()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exchange_over_udp_closes_gracefully() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = EndpointConfig::default().with_poll_timeout(Duration::from_millis(50));
    let sent_a = msgs("Data Packet", 5);
    let sent_b = msgs("Receiver packet", 3);

    let (passive_socket, passive_addr) = bind_loopback().await;
    let (active_socket, _) = bind_loopback().await;

    let mut passive = Endpoint::passive(
        config.clone().with_expected_messages(5),
        passive_socket,
        sent_b.clone(),
    )
    .expect("passive endpoint");
    let passive_task = tokio::spawn(async move {
        let result = passive.run().await;
        (result, passive)
    });

    let mut active = Endpoint::active(
        config.with_expected_messages(3),
        active_socket,
        passive_addr,
        sent_a.clone(),
    )
    .expect("active endpoint");
    let active_reason = tokio::time::timeout(Duration::from_secs(10), active.run())
        .await
        .expect("active endpoint timed out")
        .expect("active endpoint failed");

    let (passive_result, passive) = tokio::time::timeout(Duration::from_secs(10), passive_task)
        .await
        .expect("passive endpoint timed out")
        .expect("passive task panicked");

    assert_eq!(active_reason, CloseReason::Graceful);
    assert_eq!(passive_result.expect("passive endpoint failed"), CloseReason::Graceful);
    assert_eq!(passive.delivered(), sent_a.as_slice());
    assert_eq!(active.delivered(), sent_b.as_slice());
    assert_eq!(passive.peer_addr(), Some(active.transport().local_addr));
}
