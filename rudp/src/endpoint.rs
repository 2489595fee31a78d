//! Endpoint: one side of a bidirectional reliable exchange.
//!
//! # Architecture
//!
//! ```text
//!        messages                          delivered
//!            │                                 ▲
//!            ▼                                 │
//!   ┌──────────────────────── Endpoint ───────────────────────┐
//!   │  SendWindow ── RtoEstimator          Reassembler        │
//!   │  (seq, retries,                      (in-order cursor,  │
//!   │   forced drop)                        first copy wins)  │
//!   │                  state: OPEN → CLOSING → CLOSED         │
//!   └────────────────────────────┬────────────────────────────┘
//!                                │ encoded datagrams
//!                        ┌───────▼───────┐
//!                        │   Transport   │  Socket (UDP) or SimSocket
//!                        └───────────────┘
//! ```
//!
//! Both roles run the same loop; they differ only in who knows the peer
//! address up front and what completes their data phase.  While closing, an
//! endpoint repeats `FIN` if it started the teardown itself as the active
//! role, and `FIN_ACK` otherwise.
//!
//! # Event loop
//!
//! Each [`Endpoint::step`]:
//! 1. Enters CLOSING if the role's data phase is complete.
//! 2. While OPEN with a known peer, fills the send window with fresh `DATA`
//!    packets (`ack_no = 0`).
//! 3. Waits at most `poll_timeout` for one datagram and processes it, or
//!    handles the empty poll (retransmit scan while OPEN, teardown packet
//!    while CLOSING, idle accounting always).
//!
//! ```ignore
//! let socket = Socket::bind("127.0.0.1:54322".parse()?).await?;
//! let mut ep = Endpoint::active(EndpointConfig::default(), socket, peer, messages)?;
//! let reason = ep.run().await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::{ConfigError, EndpointConfig};
use crate::packet::{Packet, PacketError, PacketKind, MAX_PAYLOAD_LEN, MAX_U24};
use crate::reassembler::{Arrival, Reassembler};
use crate::send_window::{SendWindow, TickAction};
use crate::socket::{Recv, Transport};
use crate::state::{CloseReason, EndpointState, Role};
use crate::timer::RtoEstimator;

// ---------------------------------------------------------------------------
// Errors and counters
// ---------------------------------------------------------------------------

/// Failures that abort [`Endpoint::run`].
///
/// Running out of retries or patience is not an error; those outcomes are
/// reported as a [`CloseReason`].
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("cannot frame outbound packet: {0}")]
    Encode(#[from] PacketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Running totals, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
    /// Well-formed datagrams for another `conn_id`.
    pub foreign: u64,
    /// Data packets whose sequence number was already buffered.
    pub duplicates: u64,
    pub retransmissions: u64,
    pub forced_drops: u64,
    /// Outbound messages neither acknowledged nor forced-dropped at close.
    pub abandoned: u64,
}

/// FIN handshake bookkeeping, created on entering CLOSING.
#[derive(Debug, Default)]
struct Teardown {
    /// Teardown packets sent by the retry timer.
    attempts: u32,
    last_attempt: Option<Instant>,
    /// The close was started by the peer's `FIN`.
    peer_fin_seen: bool,
    /// A `FIN_ACK` has gone out; the next `FIN` completes the handshake.
    fin_ack_sent: bool,
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

pub struct Endpoint<T: Transport> {
    config: EndpointConfig,
    role: Role,
    state: EndpointState,
    transport: T,
    /// Known up front for the active role, learned from the first accepted
    /// datagram for the passive one.
    peer: Option<SocketAddr>,
    /// Outbound messages; message `i` travels as sequence number `i + 1`.
    messages: Vec<Vec<u8>>,
    window: SendWindow,
    reassembler: Reassembler,
    rto: RtoEstimator,
    delivered: Vec<Vec<u8>>,
    /// Consecutive polls without a decodable datagram.
    idle_polls: u32,
    teardown: Option<Teardown>,
    close_reason: Option<CloseReason>,
    stats: EndpointStats,
}

impl<T: Transport> Endpoint<T> {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Build an endpoint that will send `messages` and expect
    /// `config.expected_messages` in return.
    pub fn new(
        config: EndpointConfig,
        role: Role,
        transport: T,
        messages: Vec<Vec<u8>>,
    ) -> Result<Self, EndpointError> {
        config.validate()?;
        let total = u32::try_from(messages.len()).unwrap_or(u32::MAX);
        if total > MAX_U24 {
            return Err(ConfigError::TooManyMessages(total).into());
        }
        if let Some(oversized) = messages.iter().find(|m| m.len() > MAX_PAYLOAD_LEN) {
            return Err(PacketError::PayloadTooLarge(oversized.len()).into());
        }
        let max = config.max_message_len();
        if let Some(oversized) = messages.iter().find(|m| m.len() > max) {
            return Err(ConfigError::MessageTooLarge {
                len: oversized.len(),
                max,
            }
            .into());
        }

        Ok(Self {
            window: SendWindow::new(total, config.window_size),
            reassembler: Reassembler::new(config.expected_messages),
            rto: RtoEstimator::new(config.initial_rto, config.min_rto, config.max_rto),
            config,
            role,
            state: EndpointState::Open,
            transport,
            peer: None,
            messages,
            delivered: Vec::new(),
            idle_polls: 0,
            teardown: None,
            close_reason: None,
            stats: EndpointStats::default(),
        })
    }

    /// Active endpoint: starts sending to `peer` immediately.
    pub fn active(
        config: EndpointConfig,
        transport: T,
        peer: SocketAddr,
        messages: Vec<Vec<u8>>,
    ) -> Result<Self, EndpointError> {
        Ok(Self::new(config, Role::Active, transport, messages)?.with_peer(peer))
    }

    /// Passive endpoint: waits for the peer to speak first.
    pub fn passive(
        config: EndpointConfig,
        transport: T,
        messages: Vec<Vec<u8>>,
    ) -> Result<Self, EndpointError> {
        Self::new(config, Role::Passive, transport, messages)
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Payloads handed to the application so far, in sequence order.
    pub fn delivered(&self) -> &[Vec<u8>] {
        &self.delivered
    }

    pub fn stats(&self) -> EndpointStats {
        self.stats
    }

    pub fn send_window(&self) -> &SendWindow {
        &self.window
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Every round-trip sample taken, oldest first.
    pub fn rtt_samples(&self) -> &[Duration] {
        self.rto.samples()
    }

    /// `None` until the endpoint has closed without a fatal error.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Drive the endpoint until it is CLOSED.
    pub async fn run(&mut self) -> Result<CloseReason, EndpointError> {
        log::info!(
            "[{}] running: {} message(s) out, {} expected in",
            self.role,
            self.messages.len(),
            self.reassembler.expected()
        );
        while self.state != EndpointState::Closed {
            self.step().await?;
        }
        let reason = self.close_reason.unwrap_or(CloseReason::Graceful);
        log::info!(
            "[{}] closed ({reason}); delivered {} message(s)",
            self.role,
            self.delivered.len()
        );
        Ok(reason)
    }

    /// One loop iteration: at most one inbound datagram or one empty poll.
    pub async fn step(&mut self) -> Result<(), EndpointError> {
        if self.state == EndpointState::Closed {
            return Ok(());
        }
        self.check_data_phase();
        if self.state == EndpointState::Open {
            self.fill_window().await?;
        }
        if self.state == EndpointState::Closed {
            return Ok(());
        }

        let received = match self
            .transport
            .recv_from(self.config.recv_buffer_size, self.config.poll_timeout)
            .await
        {
            Ok(received) => received,
            Err(e) => return self.on_transport_error(e),
        };
        match received {
            Recv::Datagram { bytes, from } => self.on_datagram(&bytes, from).await,
            Recv::TimedOut => self.on_timeout().await,
        }
    }

    /// OPEN → CLOSING once this role has nothing left to do.
    fn check_data_phase(&mut self) {
        if self.state != EndpointState::Open {
            return;
        }
        let done = match self.role {
            Role::Active => self.window.is_complete(),
            Role::Passive => self.reassembler.is_complete(),
        };
        if done {
            self.enter_closing("data phase complete");
        }
    }

    async fn fill_window(&mut self) -> Result<(), EndpointError> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        while self.window.can_send() && self.state == EndpointState::Open {
            let seq = self.window.send_next();
            let bytes = self.data_packet(seq, 0)?;
            self.transmit(&bytes, peer).await?;
            self.window.record_sent(bytes, Instant::now());
            log::debug!(
                "[{}] → DATA seq={} in_flight={}",
                self.role,
                seq,
                self.window.in_flight()
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Result<(), EndpointError> {
        self.stats.datagrams_received += 1;
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed += 1;
                log::debug!("[{}] ← malformed datagram from {from}: {e}", self.role);
                return Ok(());
            }
        };
        self.idle_polls = 0;

        let h = packet.header;
        if h.conn_id != self.config.conn_id {
            self.stats.foreign += 1;
            log::debug!("[{}] ← conn_id {} from {from}; dropped", self.role, h.conn_id);
            return Ok(());
        }
        if self.peer.is_none() {
            log::debug!("[{}] peer is {from}", self.role);
            self.peer = Some(from);
        }

        if h.ack_no > 0 {
            self.on_ack(h.ack_no);
        }
        match h.kind() {
            Some(PacketKind::Data | PacketKind::AckOnly) if h.seq_no > 0 => {
                self.on_data(h.seq_no, packet.payload).await
            }
            Some(PacketKind::Fin) => self.on_fin().await,
            Some(PacketKind::FinAck) => self.on_fin_ack().await,
            _ => Ok(()),
        }
    }

    fn on_ack(&mut self, ack_no: u32) {
        let newly_acked = self.window.on_ack(ack_no, Instant::now(), &mut self.rto);
        if newly_acked > 0 {
            log::debug!(
                "[{}] ← ACK ack={} (slid {}, base={}, rto={:?})",
                self.role,
                ack_no,
                newly_acked,
                self.window.send_base(),
                self.rto.rto()
            );
        }
    }

    /// Reassemble, then answer with the cumulative ack and, window
    /// permitting, the next outbound message.
    async fn on_data(&mut self, seq: u32, payload: Vec<u8>) -> Result<(), EndpointError> {
        match self.reassembler.insert(seq, payload) {
            Arrival::Accepted(released) => {
                log::debug!(
                    "[{}] ← DATA seq={} (released {})",
                    self.role,
                    seq,
                    released.len()
                );
                self.delivered.extend(released);
            }
            Arrival::Duplicate => {
                self.stats.duplicates += 1;
                log::debug!("[{}] ← DATA seq={} duplicate", self.role, seq);
            }
            Arrival::OutOfRange => {
                log::debug!("[{}] ← DATA seq={} out of range", self.role, seq);
            }
        }

        let Some(peer) = self.peer else {
            return Ok(());
        };
        let ack_no = self.reassembler.cumulative_ack();
        if self.window.can_send() {
            let seq = self.window.send_next();
            let bytes = self.data_packet(seq, ack_no)?;
            self.transmit(&bytes, peer).await?;
            self.window.record_sent(bytes, Instant::now());
            log::debug!("[{}] → DATA seq={} ack={}", self.role, seq, ack_no);
        } else {
            let bytes = Packet::ack_only(self.config.conn_id, ack_no)
                .with_ttl(self.config.ttl)
                .encode()?;
            self.transmit(&bytes, peer).await?;
            log::debug!("[{}] → ACK ack={}", self.role, ack_no);
        }
        Ok(())
    }

    async fn on_fin(&mut self) -> Result<(), EndpointError> {
        let answered_before = self.teardown.as_ref().is_some_and(|t| t.fin_ack_sent);
        log::debug!("[{}] ← FIN", self.role);
        self.enter_closing("peer FIN");
        if let Some(teardown) = self.teardown.as_mut() {
            teardown.peer_fin_seen = true;
        }
        self.send_fin_ack().await?;
        if answered_before {
            self.close(CloseReason::Graceful);
        }
        Ok(())
    }

    async fn on_fin_ack(&mut self) -> Result<(), EndpointError> {
        if self.state != EndpointState::Closing {
            log::debug!("[{}] ← FIN_ACK while {}; ignored", self.role, self.state);
            return Ok(());
        }
        log::debug!("[{}] ← FIN_ACK; → FIN", self.role);
        self.send_control(Packet::fin(self.config.conn_id)).await?;
        self.close(CloseReason::Graceful);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    async fn on_timeout(&mut self) -> Result<(), EndpointError> {
        self.idle_polls += 1;
        if self.idle_polls >= self.config.max_timeouts {
            log::warn!(
                "[{}] no datagram in {} polls; closing",
                self.role,
                self.idle_polls
            );
            self.close(CloseReason::IdleTimeout);
            return Ok(());
        }
        match self.state {
            EndpointState::Open => self.retransmit_expired().await,
            EndpointState::Closing => self.teardown_tick().await,
            EndpointState::Closed => Ok(()),
        }
    }

    async fn retransmit_expired(&mut self) -> Result<(), EndpointError> {
        let rto = self.rto.rto();
        let actions = self
            .window
            .on_tick(Instant::now(), rto, self.config.max_retries);
        if actions.is_empty() {
            return Ok(());
        }
        let Some(peer) = self.peer else {
            return Ok(());
        };

        for action in actions {
            match action {
                TickAction::Retransmit { seq, packet } => {
                    self.stats.retransmissions += 1;
                    log::debug!(
                        "[{}] timeout; → DATA seq={} (retry {}, rto={:?})",
                        self.role,
                        seq,
                        self.window.retries(seq),
                        rto
                    );
                    self.transmit(&packet, peer).await?;
                }
                TickAction::ForcedDrop { seq, retries } => {
                    self.stats.forced_drops += 1;
                    log::warn!(
                        "[{}] seq={} unacknowledged after {} retries; dropped",
                        self.role,
                        seq,
                        retries
                    );
                }
            }
        }
        Ok(())
    }

    /// Repeat the teardown packet every `fin_timeout`, giving up once
    /// `max_fin_retries` of them have gone unanswered.
    ///
    /// An endpoint answering the peer's `FIN` repeats `FIN_ACK` whatever its
    /// role; otherwise the active role sends `FIN` and the passive `FIN_ACK`.
    async fn teardown_tick(&mut self) -> Result<(), EndpointError> {
        let now = Instant::now();
        let fin_timeout = self.config.fin_timeout;
        let teardown = self.teardown.get_or_insert_with(Teardown::default);
        let due = teardown
            .last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= fin_timeout);
        if !due {
            return Ok(());
        }
        if teardown.attempts >= self.config.max_fin_retries {
            log::warn!(
                "[{}] {} teardown packet(s) unanswered; closing",
                self.role,
                teardown.attempts
            );
            self.close(CloseReason::FinRetriesExhausted);
            return Ok(());
        }
        teardown.attempts += 1;
        teardown.last_attempt = Some(now);
        let attempt = teardown.attempts;

        if teardown.peer_fin_seen || self.role == Role::Passive {
            log::debug!("[{}] → FIN_ACK (attempt {attempt})", self.role);
            self.send_fin_ack().await
        } else {
            log::debug!("[{}] → FIN (attempt {attempt})", self.role);
            self.send_control(Packet::fin(self.config.conn_id)).await
        }
    }

    // -----------------------------------------------------------------------
    // Transitions and output
    // -----------------------------------------------------------------------

    fn enter_closing(&mut self, cause: &str) {
        if self.state != EndpointState::Open {
            return;
        }
        log::debug!("[{}] OPEN → CLOSING ({cause})", self.role);
        self.state = EndpointState::Closing;
        self.teardown = Some(Teardown::default());
    }

    /// Closed is terminal; later calls keep the first reason.
    fn close(&mut self, reason: CloseReason) {
        if self.state == EndpointState::Closed {
            return;
        }
        let abandoned = self.window.unconfirmed();
        if abandoned > 0 {
            log::warn!(
                "[{}] closing with {abandoned} message(s) unconfirmed",
                self.role
            );
        }
        self.stats.abandoned = u64::from(abandoned);
        log::debug!("[{}] {} → CLOSED ({reason})", self.role, self.state);
        self.state = EndpointState::Closed;
        self.close_reason = Some(reason);
    }

    fn data_packet(&self, seq: u32, ack_no: u32) -> Result<Vec<u8>, EndpointError> {
        let payload = self.messages[seq as usize - 1].clone();
        Ok(Packet::data(self.config.conn_id, seq, ack_no, payload)
            .with_ttl(self.config.ttl)
            .encode()?)
    }

    async fn send_fin_ack(&mut self) -> Result<(), EndpointError> {
        if let Some(teardown) = self.teardown.as_mut() {
            teardown.fin_ack_sent = true;
        }
        self.send_control(Packet::fin_ack(self.config.conn_id)).await
    }

    async fn send_control(&mut self, packet: Packet) -> Result<(), EndpointError> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        let bytes = packet.with_ttl(self.config.ttl).encode()?;
        self.transmit(&bytes, peer).await
    }

    async fn transmit(&mut self, bytes: &[u8], peer: SocketAddr) -> Result<(), EndpointError> {
        match self.transport.send_to(bytes, peer).await {
            Ok(()) => {
                self.stats.datagrams_sent += 1;
                Ok(())
            }
            Err(e) => self.on_transport_error(e),
        }
    }

    /// A failing transport while CLOSING means the peer already left.
    fn on_transport_error(&mut self, e: io::Error) -> Result<(), EndpointError> {
        if self.state == EndpointState::Closing {
            log::debug!("[{}] transport error while closing: {e}", self.role);
            self.close(CloseReason::PeerGone);
            return Ok(());
        }
        log::warn!("[{}] transport error: {e}", self.role);
        self.stats.abandoned = u64::from(self.window.unconfirmed());
        self.state = EndpointState::Closed;
        Err(EndpointError::Transport(e))
    }
}
