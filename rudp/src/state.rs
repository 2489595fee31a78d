//! Endpoint finite-state machine types.
//!
//! Transitions are driven by [`crate::endpoint`]. The legal ones are:
//!
//! ```text
//!            data done / peer FIN            FIN_ACK+FIN exchanged,
//!   OPEN ───────────────────────▶ CLOSING ──FIN retries spent, or ──▶ CLOSED
//!     │                                      transport error
//!     │                                                                 ▲
//!     └──────────────── MAX_TIMEOUTS idle polls (any state) ────────────┘
//! ```

use std::fmt;

/// All possible states of the endpoint FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    /// Bidirectional data exchange.
    #[default]
    Open,
    /// Data phase finished locally or remotely; FIN handshake in progress.
    Closing,
    /// Terminal.  The transport may be released.
    Closed,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Which side of the connection an endpoint plays.
///
/// The active side knows its peer's address up front and initiates the
/// teardown with `FIN` once all of its own data is acknowledged.  The passive
/// side learns the peer address from the first valid datagram and answers
/// with `FIN_ACK`; it enters teardown once it has delivered every message it
/// expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Active,
    Passive,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Passive => f.write_str("passive"),
        }
    }
}

/// Why an endpoint reached [`EndpointState::Closed`] without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The FIN / FIN_ACK exchange completed.
    Graceful,
    /// `MAX_FIN_RETRIES` teardown packets went unanswered.
    FinRetriesExhausted,
    /// `MAX_TIMEOUTS` consecutive polls saw no datagram.
    IdleTimeout,
    /// The transport failed while closing; the peer has gone away.
    PeerGone,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Graceful => "graceful close",
            Self::FinRetriesExhausted => "teardown retries exhausted",
            Self::IdleTimeout => "peer idle",
            Self::PeerGone => "peer closed its socket",
        };
        f.write_str(text)
    }
}
