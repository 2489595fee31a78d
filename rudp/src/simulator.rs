//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator::pair`] joins two [`SimSocket`]s with in-memory channels and
//! applies a configurable fault model to each direction independently:
//!
//! | Fault            | Description                                         |
//! |------------------|-----------------------------------------------------|
//! | Drop rules       | Drop the n-th transmission of a given data seq.     |
//! | Packet loss      | Drop a datagram with probability `loss_rate`.       |
//! | Duplication      | Deliver a datagram twice.                           |
//! | Reordering       | Hold a datagram back until the next one has passed. |
//!
//! Randomised faults draw from a [`StdRng`] seeded by
//! [`SimulatorConfig::seed`], so every run of a test sees the same faults.
//! Nothing here sleeps except an idle receive; combine with tokio's paused
//! clock for instant, reproducible runs.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::packet::{Packet, PacketKind};
use crate::socket::{Recv, Transport};

/// Address reported for the first socket of a pair.
pub const ACTIVE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 54322);
/// Address reported for the second socket of a pair.
pub const PASSIVE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 54321);

/// A deterministic fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropRule {
    /// Drop transmission number `attempt` (1-based) of the data packet
    /// carrying sequence number `seq`.
    Attempt { seq: u32, attempt: u32 },
}

/// Fault model for one direction of a link.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is held back behind the next one.
    pub reorder_rate: f64,
    pub drop_rules: Vec<DropRule>,
    pub seed: u64,
}

impl SimulatorConfig {
    /// Random faults at the given rates.
    pub fn lossy(loss_rate: f64, duplicate_rate: f64, reorder_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            duplicate_rate,
            reorder_rate,
            drop_rules: Vec::new(),
            seed,
        }
    }

    pub fn with_drop_rule(mut self, rule: DropRule) -> Self {
        self.drop_rules.push(rule);
        self
    }
}

/// Counters for one direction of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Datagrams handed to `send_to`.
    pub sent: u64,
    /// Datagrams placed on the wire, duplicates included.
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

pub struct Simulator;

impl Simulator {
    /// Two connected sockets, at [`ACTIVE_ADDR`] and [`PASSIVE_ADDR`].
    ///
    /// `a_to_b` shapes traffic sent by the first socket, `b_to_a` traffic
    /// sent by the second.
    pub fn pair(a_to_b: SimulatorConfig, b_to_a: SimulatorConfig) -> (SimSocket, SimSocket) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        let a = SimSocket::new(ACTIVE_ADDR, PASSIVE_ADDR, tx_ab, rx_ba, a_to_b);
        let b = SimSocket::new(PASSIVE_ADDR, ACTIVE_ADDR, tx_ba, rx_ab, b_to_a);
        (a, b)
    }
}

type Wire = (Vec<u8>, SocketAddr);

/// One end of a simulated link.
pub struct SimSocket {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Wire>,
    rx: mpsc::UnboundedReceiver<Wire>,
    config: SimulatorConfig,
    rng: StdRng,
    /// Transmissions seen per data sequence number.
    attempts: HashMap<u32, u32>,
    /// Datagram waiting for the next one to overtake it.
    held: Option<Vec<u8>>,
    stats: SimStats,
}

impl SimSocket {
    fn new(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        tx: mpsc::UnboundedSender<Wire>,
        rx: mpsc::UnboundedReceiver<Wire>,
        config: SimulatorConfig,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            local_addr,
            peer_addr,
            tx,
            rx,
            config,
            rng,
            attempts: HashMap::new(),
            held: None,
            stats: SimStats::default(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Transmission count so far of data sequence number `seq`.
    pub fn attempts(&self, seq: u32) -> u32 {
        self.attempts.get(&seq).copied().unwrap_or(0)
    }

    fn chance(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.random::<f64>() < rate
    }

    /// Apply the drop rules; counts the attempt for data packets.
    fn matches_drop_rule(&mut self, bytes: &[u8]) -> bool {
        let Ok(packet) = Packet::decode(bytes) else {
            return false;
        };
        let seq = packet.header.seq_no;
        if seq == 0 || packet.header.kind() != Some(PacketKind::Data) {
            return false;
        }
        let attempt = self.attempts.entry(seq).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;
        self.config.drop_rules.iter().any(|rule| match *rule {
            DropRule::Attempt { seq: s, attempt: a } => s == seq && a == attempt,
        })
    }

    fn put_on_wire(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        self.tx
            .send((bytes, self.local_addr))
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        self.stats.delivered += 1;
        Ok(())
    }

    fn release_held(&mut self) -> io::Result<()> {
        match self.held.take() {
            Some(bytes) => self.put_on_wire(bytes),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for SimSocket {
    async fn send_to(&mut self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        if self.tx.is_closed() {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        self.stats.sent += 1;
        if dest != self.peer_addr {
            // Nobody listens there.
            self.stats.dropped += 1;
            return Ok(());
        }

        if self.matches_drop_rule(bytes) {
            self.stats.dropped += 1;
            return self.release_held();
        }
        if self.chance(self.config.loss_rate) {
            self.stats.dropped += 1;
            return self.release_held();
        }
        if self.held.is_none() && self.chance(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.held = Some(bytes.to_vec());
            return Ok(());
        }

        self.put_on_wire(bytes.to_vec())?;
        if self.chance(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.put_on_wire(bytes.to_vec())?;
        }
        self.release_held()
    }

    async fn recv_from(&mut self, max_size: usize, poll_timeout: Duration) -> io::Result<Recv> {
        // A held datagram must not wait forever for a successor.
        self.release_held()?;

        match tokio::time::timeout(poll_timeout, self.rx.recv()).await {
            Ok(Some((mut bytes, from))) => {
                bytes.truncate(max_size);
                Ok(Recv::Datagram { bytes, from })
            }
            Ok(None) => {
                // Peer socket gone; behave like a silent network.
                tokio::time::sleep(poll_timeout).await;
                Ok(Recv::TimedOut)
            }
            Err(_elapsed) => Ok(Recv::TimedOut),
        }
    }
}
