//! Endpoint tunables.
//!
//! Every constant that shapes protocol timing or capacity is a field of
//! [`EndpointConfig`]; [`Default`] yields the protocol defaults.

use std::time::Duration;

use thiserror::Error;

use crate::packet::{DEFAULT_TTL, MAX_PAYLOAD_LEN, MAX_U24, MIN_PACKET_LEN};
use crate::timer::{DEFAULT_RTO, MAX_RTO, MIN_RTO};

pub const DEFAULT_CONN_ID: u32 = 12345;
pub const DEFAULT_WINDOW_SIZE: u32 = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_FIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_FIN_RETRIES: u32 = 3;
pub const DEFAULT_MAX_TIMEOUTS: u32 = 100;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_EXPECTED_MESSAGES: u32 = 5;
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Connection identifier agreed out of band; other ids are dropped.
    pub conn_id: u32,
    /// Maximum number of unacknowledged data packets.
    pub window_size: u32,
    /// Retransmissions allowed per packet before it is forced-dropped.
    pub max_retries: u32,
    /// RTO before any round trip has been measured.
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    /// Spacing between teardown packet attempts.
    pub fin_timeout: Duration,
    /// Teardown packets sent before giving up on the peer.
    pub max_fin_retries: u32,
    /// Consecutive empty polls before the endpoint closes itself.
    pub max_timeouts: u32,
    /// Upper bound on a single wait for inbound datagrams.
    pub poll_timeout: Duration,
    /// Messages the peer is expected to send.
    pub expected_messages: u32,
    /// Hop count stamped on outbound packets.
    pub ttl: u8,
    /// Largest datagram accepted from the transport.
    pub recv_buffer_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            conn_id: DEFAULT_CONN_ID,
            window_size: DEFAULT_WINDOW_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_rto: DEFAULT_RTO,
            min_rto: MIN_RTO,
            max_rto: MAX_RTO,
            fin_timeout: DEFAULT_FIN_TIMEOUT,
            max_fin_retries: DEFAULT_MAX_FIN_RETRIES,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            expected_messages: DEFAULT_EXPECTED_MESSAGES,
            ttl: DEFAULT_TTL,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

impl EndpointConfig {
    pub fn with_conn_id(mut self, conn_id: u32) -> Self {
        self.conn_id = conn_id;
        self
    }

    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_rto_bounds(mut self, min_rto: Duration, max_rto: Duration) -> Self {
        self.min_rto = min_rto;
        self.max_rto = max_rto;
        self
    }

    pub fn with_fin_timeout(mut self, fin_timeout: Duration, max_fin_retries: u32) -> Self {
        self.fin_timeout = fin_timeout;
        self.max_fin_retries = max_fin_retries;
        self
    }

    pub fn with_max_timeouts(mut self, max_timeouts: u32) -> Self {
        self.max_timeouts = max_timeouts;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_expected_messages(mut self, expected_messages: u32) -> Self {
        self.expected_messages = expected_messages;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_recv_buffer_size(mut self, recv_buffer_size: usize) -> Self {
        self.recv_buffer_size = recv_buffer_size;
        self
    }

    /// Longest message that survives a receive buffer of this size.
    ///
    /// Assumes the peer is configured with the same buffer size.
    pub fn max_message_len(&self) -> usize {
        self.recv_buffer_size
            .saturating_sub(MIN_PACKET_LEN)
            .min(MAX_PAYLOAD_LEN)
    }

    /// Reject combinations the endpoint cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conn_id > MAX_U24 {
            return Err(ConfigError::ConnId(self.conn_id));
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.expected_messages > MAX_U24 {
            return Err(ConfigError::TooManyMessages(self.expected_messages));
        }
        if self.min_rto > self.max_rto {
            return Err(ConfigError::RtoBounds {
                min: self.min_rto,
                max: self.max_rto,
            });
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::ZeroPollTimeout);
        }
        if self.recv_buffer_size < MIN_PACKET_LEN {
            return Err(ConfigError::RecvBufferTooSmall(self.recv_buffer_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("conn_id {0} does not fit in 24 bits")]
    ConnId(u32),
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("{0} messages exceed the 24-bit sequence space")]
    TooManyMessages(u32),
    #[error("min RTO {min:?} is above max RTO {max:?}")]
    RtoBounds { min: Duration, max: Duration },
    #[error("poll timeout must be non-zero")]
    ZeroPollTimeout,
    #[error("receive buffer of {0} bytes cannot hold a 17-byte packet")]
    RecvBufferTooSmall(usize),
    #[error("message of {len} bytes exceeds the {max}-byte limit of the receive buffer")]
    MessageTooLarge { len: usize, max: usize },
}
