//! Sliding send window with cumulative acknowledgments.
//!
//! [`SendWindow`] tracks a fixed, finite set of outbound messages numbered
//! `1..=total`.  At most `window_size` of them may be outstanding at once.
//!
//! # Protocol contract
//!
//! - A new sequence number is minted only while
//!   `send_next < send_base + window_size`.
//! - ACKs are **cumulative**: `ack_no = K` acknowledges every sequence number
//!   up to and including `K`.
//! - On a timer tick each outstanding record older than the RTO is
//!   retransmitted on its own (not the whole window).
//! - A record that has already been retransmitted `max_retries` times is
//!   **forced-dropped** on its next expiry: marked acknowledged without any
//!   confirmation from the peer, so the window keeps moving under sustained
//!   loss.  Delivery of that message is given up in exchange for liveness.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::timer::{RetransmitRecord, RtoEstimator};

/// How an outbound record left the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// Covered by a cumulative ACK after `retries` retransmissions.
    Acked { retries: u32, rtt: Duration },
    /// Abandoned after `retries` retransmissions.
    ForcedDrop { retries: u32 },
}

impl Retirement {
    pub fn retries(&self) -> u32 {
        match *self {
            Self::Acked { retries, .. } | Self::ForcedDrop { retries } => retries,
        }
    }
}

/// Work produced by [`SendWindow::on_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    /// Put `packet` back on the wire.
    Retransmit { seq: u32, packet: Vec<u8> },
    /// `seq` exhausted its retry budget and was written off.
    ForcedDrop { seq: u32, retries: u32 },
}

/// Send-side state for one endpoint.
///
/// ```text
///  send_base          send_next
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space (1..=total)
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Oldest unacknowledged sequence number (left window edge).
    send_base: u32,
    /// Sequence number the next new packet will carry.
    send_next: u32,
    total: u32,
    window_size: u32,
    /// Acked-set, indexed by `seq - 1`.  Entries never go back to `false`.
    acked: Vec<bool>,
    outstanding: BTreeMap<u32, RetransmitRecord>,
    retired: BTreeMap<u32, Retirement>,
}

impl SendWindow {
    /// Window over `total` messages allowing `window_size` in flight.
    ///
    /// # Panics
    ///
    /// Panics if `window_size` is zero.
    pub fn new(total: u32, window_size: u32) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            send_base: 1,
            send_next: 1,
            total,
            window_size,
            acked: vec![false; total as usize],
            outstanding: BTreeMap::new(),
            retired: BTreeMap::new(),
        }
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn send_next(&self) -> u32 {
        self.send_next
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// `true` when another message exists and the window has room for it.
    pub fn can_send(&self) -> bool {
        self.send_next <= self.total && self.send_next < self.send_base + self.window_size
    }

    /// `true` once every message has been acknowledged or forced-dropped.
    pub fn is_complete(&self) -> bool {
        self.send_base > self.total
    }

    /// Number of records awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Messages neither acknowledged nor forced-dropped: still in flight or
    /// never sent.
    pub fn unconfirmed(&self) -> u32 {
        self.outstanding.len() as u32 + (self.total + 1 - self.send_next)
    }

    pub fn is_acked(&self, seq: u32) -> bool {
        seq >= 1 && self.acked.get(seq as usize - 1).copied().unwrap_or(false)
    }

    pub fn outstanding(&self, seq: u32) -> Option<&RetransmitRecord> {
        self.outstanding.get(&seq)
    }

    pub fn retirement(&self, seq: u32) -> Option<Retirement> {
        self.retired.get(&seq).copied()
    }

    /// Retransmissions of `seq` so far, whether or not it is still in flight.
    pub fn retries(&self, seq: u32) -> u32 {
        self.outstanding
            .get(&seq)
            .map(|r| r.retry_count)
            .or_else(|| self.retired.get(&seq).map(Retirement::retries))
            .unwrap_or(0)
    }

    /// Place the just-transmitted packet for `send_next` into the window and
    /// return the sequence number it was assigned.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the window has no room.  Check [`can_send`]
    /// before calling.
    ///
    /// [`can_send`]: Self::can_send
    pub fn record_sent(&mut self, packet: Vec<u8>, now: Instant) -> u32 {
        debug_assert!(
            self.can_send(),
            "record_sent called on a full window ({} in flight, base {}, next {})",
            self.outstanding.len(),
            self.send_base,
            self.send_next
        );
        let seq = self.send_next;
        self.outstanding.insert(seq, RetransmitRecord::new(packet, now));
        self.send_next += 1;
        seq
    }

    /// Process a cumulative ACK.
    ///
    /// Marks every not-yet-acked sequence number in `[send_base, ack_no]` as
    /// acknowledged, retires its record and feeds the round trip into `rtt`,
    /// then slides `send_base` over the acked prefix.  Returns the number of
    /// newly acknowledged sequence numbers; `0` for a duplicate, zero or
    /// out-of-range ACK.  Sequence numbers that were never sent are not
    /// acknowledged.
    pub fn on_ack(&mut self, ack_no: u32, now: Instant, rtt: &mut RtoEstimator) -> usize {
        if ack_no == 0 || ack_no > self.total {
            return 0;
        }
        let last = ack_no.min(self.send_next - 1);

        let mut newly_acked = 0usize;
        for seq in self.send_base..=last {
            if self.acked[seq as usize - 1] {
                continue;
            }
            self.acked[seq as usize - 1] = true;
            newly_acked += 1;
            if let Some(record) = self.outstanding.remove(&seq) {
                let sample = record.rtt(now);
                rtt.record_sample(sample);
                self.retired.insert(
                    seq,
                    Retirement::Acked {
                        retries: record.retry_count,
                        rtt: sample,
                    },
                );
            }
        }
        self.advance_base();
        newly_acked
    }

    /// Scan outstanding records for expiry.
    ///
    /// Each expired record is either retransmitted (retry count bumped,
    /// timestamp refreshed) or, once it has used up `max_retries`,
    /// forced-dropped.
    pub fn on_tick(&mut self, now: Instant, rto: Duration, max_retries: u32) -> Vec<TickAction> {
        let expired: Vec<u32> = self
            .outstanding
            .iter()
            .filter(|(_, record)| record.is_expired(now, rto))
            .map(|(&seq, _)| seq)
            .collect();

        let mut actions = Vec::with_capacity(expired.len());
        for seq in expired {
            let Some(record) = self.outstanding.get_mut(&seq) else {
                continue;
            };
            if record.retry_count >= max_retries {
                let retries = record.retry_count;
                self.outstanding.remove(&seq);
                self.acked[seq as usize - 1] = true;
                self.retired.insert(seq, Retirement::ForcedDrop { retries });
                actions.push(TickAction::ForcedDrop { seq, retries });
            } else {
                record.on_retransmit(now);
                actions.push(TickAction::Retransmit {
                    seq,
                    packet: record.packet.clone(),
                });
            }
        }
        self.advance_base();
        actions
    }

    fn advance_base(&mut self) {
        while self.send_base <= self.total && self.acked[self.send_base as usize - 1] {
            self.send_base += 1;
        }
    }
}
