//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between endpoints is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission,
//!   rejecting field values that do not fit their on-wire width.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated, inconsistent or corrupted input.
//! - Decrementing the hop count of an already-encoded packet for relays.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  offset  size  field
//!  0       3     conn_id
//!  3       3     seq_no
//!  6       3     ack_no
//!  9       1     flags
//!  10      1     ttl
//!  11      2     payload_len
//!  13      N     payload
//!  13+N    4     checksum (CRC-32 over bytes [0, 13+N))
//! ```
//!
//! The smallest legal packet (empty payload) is [`MIN_PACKET_LEN`] = 17 bytes.

use thiserror::Error;

/// Values of the `flags` header byte.
pub mod flags {
    /// Packet carries application data.
    pub const DATA: u8 = 0x00;
    /// No payload; the packet exists to carry `ack_no`.
    pub const ACK_ONLY: u8 = 0x01;
    /// Teardown request.
    pub const FIN: u8 = 0x04;
    /// Teardown confirmation: [`FIN`] combined with the no-payload bit.
    pub const FIN_ACK: u8 = FIN | ACK_ONLY;
}

/// Byte length of the fixed header (three 24-bit fields, flags, ttl).
pub const HEADER_LEN: usize = 11;
/// Byte length of the payload-length field that follows the header.
pub const LENGTH_FIELD_LEN: usize = 2;
/// Byte length of the trailing checksum.
pub const CHECKSUM_LEN: usize = 4;
/// Size of a packet with an empty payload.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + LENGTH_FIELD_LEN + CHECKSUM_LEN;
/// Largest value a 24-bit header field can hold.
pub const MAX_U24: u32 = 0x00FF_FFFF;
/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
/// Hop count stamped on every packet an endpoint originates.
pub const DEFAULT_TTL: u8 = u8::MAX;

// Byte offsets of each field within the serialised packet.
const OFF_CONN_ID: usize = 0;
const OFF_SEQ: usize = 3;
const OFF_ACK: usize = 6;
const OFF_FLAGS: usize = 9;
const OFF_TTL: usize = 10;
const OFF_PAYLOAD_LEN: usize = 11;
const OFF_PAYLOAD: usize = 13;

/// The four flag values the protocol gives a meaning to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    AckOnly,
    Fin,
    FinAck,
}

impl PacketKind {
    /// Classify a raw flags byte; `None` for values the protocol never sends.
    pub fn from_flags(value: u8) -> Option<Self> {
        match value {
            flags::DATA => Some(Self::Data),
            flags::ACK_ONLY => Some(Self::AckOnly),
            flags::FIN => Some(Self::Fin),
            flags::FIN_ACK => Some(Self::FinAck),
            _ => None,
        }
    }

    pub fn flags(self) -> u8 {
        match self {
            Self::Data => flags::DATA,
            Self::AckOnly => flags::ACK_ONLY,
            Self::Fin => flags::FIN,
            Self::FinAck => flags::FIN_ACK,
        }
    }
}

/// Fixed-shape protocol header.
///
/// The three sequence-space fields are 24 bits on the wire; values above
/// [`MAX_U24`] are representable here but rejected by [`Packet::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Identifies the logical connection; agreed out of band.
    pub conn_id: u32,
    /// Sequence number of this packet's payload, `0` if it carries none.
    pub seq_no: u32,
    /// Cumulative acknowledgment of the peer's data, `0` if none.
    pub ack_no: u32,
    /// One of the [`flags`] values.
    pub flags: u8,
    /// Remaining hop count.
    pub ttl: u8,
}

impl Header {
    pub fn kind(&self) -> Option<PacketKind> {
        PacketKind::from_flags(self.flags)
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A data packet carrying `payload` as sequence number `seq_no`.
    pub fn data(conn_id: u32, seq_no: u32, ack_no: u32, payload: Vec<u8>) -> Self {
        Self::control(conn_id, seq_no, ack_no, PacketKind::Data, payload)
    }

    /// A payload-free packet acknowledging everything up to `ack_no`.
    pub fn ack_only(conn_id: u32, ack_no: u32) -> Self {
        Self::control(conn_id, 0, ack_no, PacketKind::AckOnly, Vec::new())
    }

    pub fn fin(conn_id: u32) -> Self {
        Self::control(conn_id, 0, 0, PacketKind::Fin, Vec::new())
    }

    pub fn fin_ack(conn_id: u32) -> Self {
        Self::control(conn_id, 0, 0, PacketKind::FinAck, Vec::new())
    }

    fn control(conn_id: u32, seq_no: u32, ack_no: u32, kind: PacketKind, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                conn_id,
                seq_no,
                ack_no,
                flags: kind.flags(),
                ttl: DEFAULT_TTL,
            },
            payload,
        }
    }

    /// Replace the hop count.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.header.ttl = ttl;
        self
    }

    /// Total number of bytes [`encode`](Self::encode) will produce.
    pub fn wire_len(&self) -> usize {
        MIN_PACKET_LEN + self.payload.len()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The payload length and checksum are computed here; they are not
    /// stored on [`Header`].
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let h = &self.header;
        check_u24("conn_id", h.conn_id)?;
        check_u24("seq_no", h.seq_no)?;
        check_u24("ack_no", h.ack_no)?;

        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }

        let mut buf = Vec::with_capacity(self.wire_len());
        put_u24(&mut buf, h.conn_id);
        put_u24(&mut buf, h.seq_no);
        put_u24(&mut buf, h.ack_no);
        buf.push(h.flags);
        buf.push(h.ttl);
        buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let csum = checksum(&buf);
        buf.extend_from_slice(&csum.to_be_bytes());
        debug_assert_eq!(buf.len(), self.wire_len());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`MIN_PACKET_LEN`],
    /// - the `payload_len` field disagrees with `buf.len()`, or
    /// - the trailing checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(PacketError::Truncated(buf.len()));
        }

        let payload_len =
            u16::from_be_bytes([buf[OFF_PAYLOAD_LEN], buf[OFF_PAYLOAD_LEN + 1]]) as usize;
        let expected = MIN_PACKET_LEN + payload_len;
        if buf.len() != expected {
            return Err(PacketError::LengthMismatch {
                expected,
                actual: buf.len(),
            });
        }

        let (body, trailer) = buf.split_at(buf.len() - CHECKSUM_LEN);
        let received = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = checksum(body);
        if received != computed {
            return Err(PacketError::ChecksumMismatch { received, computed });
        }

        Ok(Packet {
            header: Header {
                conn_id: get_u24(&buf[OFF_CONN_ID..]),
                seq_no: get_u24(&buf[OFF_SEQ..]),
                ack_no: get_u24(&buf[OFF_ACK..]),
                flags: buf[OFF_FLAGS],
                ttl: buf[OFF_TTL],
            },
            payload: body[OFF_PAYLOAD..].to_vec(),
        })
    }
}

/// Encode a packet from loose field values.
///
/// Unlike [`Packet::encode`], `flags` and `ttl` arrive as `u32` and are
/// range-checked against their 8-bit width here.
pub fn encode(
    conn_id: u32,
    seq_no: u32,
    ack_no: u32,
    payload: &[u8],
    flags: u32,
    ttl: u32,
) -> Result<Vec<u8>, PacketError> {
    let header = Header {
        conn_id,
        seq_no,
        ack_no,
        flags: check_u8("flags", flags)?,
        ttl: check_u8("ttl", ttl)?,
    };
    Packet {
        header,
        payload: payload.to_vec(),
    }
    .encode()
}

/// Re-encode `buf` with its hop count lowered by one.
///
/// Every other field is carried over unchanged, so the output differs from
/// the input only in the ttl byte and the checksum.
pub fn decrement_hop_count(buf: &[u8]) -> Result<Vec<u8>, PacketError> {
    let packet = Packet::decode(buf)?;
    if packet.header.ttl == 0 {
        return Err(PacketError::HopLimitExpired);
    }
    let ttl = packet.header.ttl - 1;
    packet.with_ttl(ttl).encode()
}

/// Errors raised while building or parsing a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("{field} {value} out of range (0 to {max})")]
    FieldRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    #[error("payload size {0} exceeds max (65535 bytes)")]
    PayloadTooLarge(usize),
    #[error("packet too small: got {0} bytes, expected at least 17")]
    Truncated(usize),
    #[error("packet size mismatch: got {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("checksum mismatch: got {received:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { received: u32, computed: u32 },
    #[error("hop count already expired")]
    HopLimitExpired,
}

fn check_u24(field: &'static str, value: u32) -> Result<(), PacketError> {
    if value > MAX_U24 {
        return Err(PacketError::FieldRange {
            field,
            value,
            max: MAX_U24,
        });
    }
    Ok(())
}

fn check_u8(field: &'static str, value: u32) -> Result<u8, PacketError> {
    u8::try_from(value).map_err(|_| PacketError::FieldRange {
        field,
        value,
        max: u8::MAX as u32,
    })
}

fn put_u24(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes()[1..]);
}

fn get_u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// CRC-32 (zlib polynomial) over `data`.
fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
