//! Receive-side reassembly.
//!
//! [`Reassembler`] accepts data packets in any order and releases their
//! payloads to the application strictly in sequence-number order:
//!
//! - The **first** copy of each sequence number in `1..=expected` is stored;
//!   later copies are reported as duplicates and left untouched.
//! - After every insertion the in-order cursor walks forward over the
//!   buffered run, handing each payload out exactly once.
//! - Buffered entries are kept after delivery; membership in the buffer is
//!   what identifies a duplicate.
//!
//! This module only manages state; acknowledgments are built by the caller
//! from [`Reassembler::cumulative_ack`].

use std::collections::BTreeMap;

/// Result of offering one packet to the [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// First copy of this sequence number.  Carries the payloads released by
    /// this insertion, oldest first (empty when a gap remains).
    Accepted(Vec<Vec<u8>>),
    /// Already buffered; ignored.
    Duplicate,
    /// Sequence number `0` or beyond the expected message count; ignored.
    OutOfRange,
}

/// Receive-side state for one endpoint.
#[derive(Debug)]
pub struct Reassembler {
    /// Next sequence number to hand to the application.
    recv_cursor: u32,
    expected: u32,
    buffer: BTreeMap<u32, Vec<u8>>,
}

impl Reassembler {
    /// Reassembler for a peer that will send `expected` messages.
    pub fn new(expected: u32) -> Self {
        Self {
            recv_cursor: 1,
            expected,
            buffer: BTreeMap::new(),
        }
    }

    pub fn recv_cursor(&self) -> u32 {
        self.recv_cursor
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Number of distinct sequence numbers received so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Highest sequence number up to which everything has arrived.
    pub fn cumulative_ack(&self) -> u32 {
        self.recv_cursor - 1
    }

    /// `true` once every expected message has been delivered.
    pub fn is_complete(&self) -> bool {
        self.recv_cursor > self.expected
    }

    pub fn insert(&mut self, seq: u32, payload: Vec<u8>) -> Arrival {
        if seq == 0 || seq > self.expected {
            return Arrival::OutOfRange;
        }
        if self.buffer.contains_key(&seq) {
            return Arrival::Duplicate;
        }
        self.buffer.insert(seq, payload);

        let mut released = Vec::new();
        while let Some(payload) = self.buffer.get(&self.recv_cursor) {
            released.push(payload.clone());
            self.recv_cursor += 1;
        }
        Arrival::Accepted(released)
    }
}
