//! `rudp`: reliable, ordered message exchange between two endpoints over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  DATA / ACK_ONLY   ┌────────────┐
//!  │   Active   │───────────────────▶│  Passive   │
//!  │  Endpoint  │◀───────────────────│  Endpoint  │
//!  └─────┬──────┘  piggybacked acks  └─────┬──────┘
//!        │          FIN / FIN_ACK          │
//!  ┌─────▼──────────────────────────────────▼─────┐
//!  │   SendWindow · Reassembler · RtoEstimator    │
//!  └─────┬──────────────────────────────────┬─────┘
//!        │ encoded datagrams                │
//!  ┌─────▼─────┐                      ┌─────▼─────┐
//!  │ Transport │  Socket (tokio UDP)  │ Transport │
//!  └───────────┘  or SimSocket        └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       wire format (serialise / deserialise, CRC-32)
//! - [`timer`]        retransmit records and RTO estimation
//! - [`send_window`]  sliding window, cumulative acks, forced drop
//! - [`reassembler`]  out-of-order buffering, in-order delivery
//! - [`state`]        finite-state-machine types
//! - [`config`]       endpoint tunables
//! - [`endpoint`]     the per-endpoint event loop
//! - [`socket`]       transport trait and async UDP socket
//! - [`simulator`]    in-memory lossy/reordering network for testing

pub mod config;
pub mod endpoint;
pub mod packet;
pub mod reassembler;
pub mod send_window;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, EndpointError, EndpointStats};
pub use packet::{Packet, PacketError, PacketKind};
pub use socket::{Recv, Socket, Transport};
pub use state::{CloseReason, EndpointState, Role};
