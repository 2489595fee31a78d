//! End-to-end scenarios over the in-memory simulator.
//!
//! Every test runs on tokio's paused clock: timeouts complete instantly and
//! in a fixed order, so retransmission counts and RTT samples are exact.

use std::time::Duration;

use tokio::time::Instant;

use rudp::simulator::{DropRule, SimSocket, Simulator, SimulatorConfig, PASSIVE_ADDR};
use rudp::send_window::Retirement;
use rudp::{
    CloseReason, Endpoint, EndpointConfig, EndpointError, EndpointState, Packet, PacketKind, Recv,
    Transport,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn msgs(prefix: &str, n: u32) -> Vec<Vec<u8>> {
    (1..=n).map(|i| format!("{prefix} {i}").into_bytes()).collect()
}

struct Outcome {
    active: Endpoint<SimSocket>,
    passive: Endpoint<SimSocket>,
    active_result: Result<CloseReason, EndpointError>,
    passive_result: Result<CloseReason, EndpointError>,
}

/// Run an active and a passive endpoint against each other to completion.
async fn exchange(
    a_to_b: SimulatorConfig,
    b_to_a: SimulatorConfig,
    active_msgs: Vec<Vec<u8>>,
    passive_msgs: Vec<Vec<u8>>,
) -> Outcome {
    exchange_with(
        EndpointConfig::default(),
        a_to_b,
        b_to_a,
        active_msgs,
        passive_msgs,
    )
    .await
}

async fn exchange_with(
    base: EndpointConfig,
    a_to_b: SimulatorConfig,
    b_to_a: SimulatorConfig,
    active_msgs: Vec<Vec<u8>>,
    passive_msgs: Vec<Vec<u8>>,
) -> Outcome {
    let (a, b) = Simulator::pair(a_to_b, b_to_a);
    let mut active = Endpoint::active(
        base.clone().with_expected_messages(passive_msgs.len() as u32),
        a,
        PASSIVE_ADDR,
        active_msgs.clone(),
    )
    .expect("active endpoint");
    let mut passive = Endpoint::passive(
        base.with_expected_messages(active_msgs.len() as u32),
        b,
        passive_msgs,
    )
    .expect("passive endpoint");

    let (active_result, passive_result) = tokio::join!(active.run(), passive.run());
    Outcome {
        active,
        passive,
        active_result,
        passive_result,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn zero_loss_exchange_delivers_everything_once_in_order() {
    let sent_a = msgs("Data Packet", 5);
    let sent_b = msgs("Receiver packet", 5);
    let out = exchange(
        SimulatorConfig::default(),
        SimulatorConfig::default(),
        sent_a.clone(),
        sent_b.clone(),
    )
    .await;

    assert_eq!(out.active_result.unwrap(), CloseReason::Graceful);
    assert_eq!(out.passive_result.unwrap(), CloseReason::Graceful);
    assert_eq!(out.active.state(), EndpointState::Closed);
    assert_eq!(out.passive.state(), EndpointState::Closed);

    assert_eq!(out.passive.delivered(), sent_a.as_slice());
    assert_eq!(out.active.delivered(), sent_b.as_slice());

    for ep in [&out.active, &out.passive] {
        assert_eq!(ep.stats().retransmissions, 0);
        assert_eq!(ep.stats().forced_drops, 0);
        assert_eq!(ep.stats().abandoned, 0);
        for seq in 1..=5 {
            assert!(matches!(
                ep.send_window().retirement(seq),
                Some(Retirement::Acked { retries: 0, .. })
            ));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn lost_first_transmission_is_recovered_by_one_retransmission() {
    let sent_a = msgs("Data Packet", 5);
    let sent_b = msgs("Receiver packet", 5);
    let lossy = SimulatorConfig::default().with_drop_rule(DropRule::Attempt { seq: 1, attempt: 1 });
    let out = exchange(lossy, SimulatorConfig::default(), sent_a.clone(), sent_b.clone()).await;

    assert_eq!(out.active_result.unwrap(), CloseReason::Graceful);
    assert_eq!(out.passive_result.unwrap(), CloseReason::Graceful);

    // Exactly one retransmission carried seq 1, and it was the one acked.
    assert_eq!(out.active.send_window().retries(1), 1);
    assert_eq!(out.active.transport().attempts(1), 2);
    assert!(matches!(
        out.active.send_window().retirement(1),
        Some(Retirement::Acked { retries: 1, .. })
    ));

    // RTT measured against the retransmission, not the lost first attempt.
    let samples = out.active.rtt_samples();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| *s < Duration::from_millis(200)));

    assert_eq!(out.passive.delivered(), sent_a.as_slice());
    assert_eq!(out.active.delivered(), sent_b.as_slice());
}

#[tokio::test(start_paused = true)]
async fn silent_peer_forces_drops_then_gives_up_teardown() {
    let (a, mut b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
    let mut active = Endpoint::active(
        EndpointConfig::default(),
        a,
        PASSIVE_ADDR,
        msgs("Data Packet", 5),
    )
    .unwrap();

    // Record what reaches the silent side, and when.
    let watch = async {
        let mut seen = Vec::new();
        while let Ok(Recv::Datagram { bytes, .. }) =
            b.recv_from(1024, Duration::from_secs(2)).await
        {
            let packet = Packet::decode(&bytes).unwrap();
            seen.push((Instant::now(), packet.header.kind()));
        }
        seen
    };
    let run = async {
        let reason = active.run().await;
        (reason, Instant::now())
    };
    let ((reason, closed_at), seen) = tokio::join!(run, watch);
    assert_eq!(reason.unwrap(), CloseReason::FinRetriesExhausted);

    let fins: Vec<Instant> = seen
        .iter()
        .filter(|(_, kind)| *kind == Some(PacketKind::Fin))
        .map(|(at, _)| *at)
        .collect();
    assert_eq!(fins.len(), 3);
    assert!(seen.iter().all(|(_, kind)| *kind != Some(PacketKind::FinAck)));
    // Attempts are spaced by fin_timeout, rounded up to the next poll.
    let fin_timeout = Duration::from_secs(1);
    let poll = Duration::from_millis(200);
    for pair in fins.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= fin_timeout && gap < fin_timeout + poll, "gap {gap:?}");
    }
    let linger = closed_at - fins[2];
    assert!(linger >= fin_timeout && linger < fin_timeout + poll, "linger {linger:?}");

    for seq in 1..=5 {
        assert_eq!(
            active.send_window().retirement(seq),
            Some(Retirement::ForcedDrop { retries: 5 })
        );
    }
    assert_eq!(active.stats().forced_drops, 5);
    assert_eq!(active.stats().retransmissions, 25);
    assert_eq!(active.stats().abandoned, 0);
    assert!(active.rtt_samples().is_empty());
    assert!(active.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn passive_without_peer_times_out() {
    let (_a, b) = Simulator::pair(SimulatorConfig::default(), SimulatorConfig::default());
    let mut passive = Endpoint::passive(EndpointConfig::default(), b, msgs("reply", 3)).unwrap();

    let start = tokio::time::Instant::now();
    let reason = passive.run().await.unwrap();
    assert_eq!(reason, CloseReason::IdleTimeout);
    assert_eq!(passive.peer_addr(), None);
    // 100 polls of 200 ms each.
    assert!(start.elapsed() >= Duration::from_secs(20));
    assert!(start.elapsed() < Duration::from_secs(21));
}

#[tokio::test(start_paused = true)]
async fn unreliable_network_never_breaks_ordering() {
    let sent_a = msgs("a", 8);
    let sent_b = msgs("b", 8);
    for seed in 1..=8u64 {
        let out = exchange(
            SimulatorConfig::lossy(0.15, 0.1, 0.1, seed),
            SimulatorConfig::lossy(0.15, 0.1, 0.1, seed + 100),
            sent_a.clone(),
            sent_b.clone(),
        )
        .await;

        assert!(out.active_result.is_ok(), "seed {seed}");
        assert!(out.passive_result.is_ok(), "seed {seed}");

        let got_b = out.passive.delivered();
        let got_a = out.active.delivered();
        assert_eq!(got_b, &sent_a[..got_b.len()], "seed {seed}");
        assert_eq!(got_a, &sent_b[..got_a.len()], "seed {seed}");

        // Every missing message is accounted for by its sender.
        for (sender, sent, got) in [
            (&out.active, &sent_a, got_b),
            (&out.passive, &sent_b, got_a),
        ] {
            let stats = sender.stats();
            let missing = (sent.len() - got.len()) as u64;
            assert!(
                missing <= stats.forced_drops + stats.abandoned,
                "seed {seed}: {missing} missing, {stats:?}"
            );
            assert_eq!(
                stats.abandoned,
                u64::from(sender.send_window().unconfirmed()),
                "seed {seed}"
            );
        }

        for ep in [&out.active, &out.passive] {
            let w = ep.send_window();
            assert!(w.in_flight() <= w.window_size() as usize);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn large_message_crosses_with_a_larger_recv_buffer() {
    let mut sent_a = msgs("a", 3);
    sent_a[1] = vec![0xAB; 2000];
    let sent_b = msgs("b", 2);
    let out = exchange_with(
        EndpointConfig::default().with_recv_buffer_size(4096),
        SimulatorConfig::default(),
        SimulatorConfig::default(),
        sent_a.clone(),
        sent_b.clone(),
    )
    .await;

    assert_eq!(out.active_result.unwrap(), CloseReason::Graceful);
    assert_eq!(out.passive_result.unwrap(), CloseReason::Graceful);
    assert_eq!(out.passive.delivered(), sent_a.as_slice());
    assert_eq!(out.passive.stats().malformed, 0);
    assert_eq!(out.active.delivered(), sent_b.as_slice());
}

#[tokio::test(start_paused = true)]
async fn duplicating_network_delivers_exactly_once() {
    let sent_a = msgs("a", 6);
    let sent_b = msgs("b", 6);
    let out = exchange(
        SimulatorConfig::lossy(0.0, 1.0, 0.0, 3),
        SimulatorConfig::lossy(0.0, 1.0, 0.0, 4),
        sent_a.clone(),
        sent_b.clone(),
    )
    .await;

    assert!(out.active_result.is_ok());
    assert!(out.passive_result.is_ok());
    // The active side only closes once all of its data is acknowledged.
    assert_eq!(out.passive.delivered(), sent_a.as_slice());
    let got_a = out.active.delivered();
    assert_eq!(got_a, &sent_b[..got_a.len()]);
    assert!(out.passive.stats().duplicates >= 6);
}
