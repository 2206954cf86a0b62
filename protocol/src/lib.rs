//! Wire format for the remote-console (RCON) protocol.
//!
//! Every packet on the wire is length-prefixed, little-endian:
//!
//! ```text
//! +-----------+------------+------------+-------------+------+------+
//! | size i32  | id i32     | type i32   | body bytes  | 0x00 | 0x00 |
//! +-----------+------------+------------+-------------+------+------+
//! ```
//!
//! `size` counts everything after the prefix: `8 + len(body) + 2`.
//! The codec is a pure transform with no I/O so a reader can call
//! [`decode`] repeatedly against a growing buffer.

use thiserror::Error;

/// Bytes taken by the `size` prefix itself.
pub const HEADER_LEN: usize = 4;

/// Smallest legal `size`: id + type + the two terminators around an empty body.
pub const MIN_PACKET_SIZE: i32 = 10;

/// Default upper bound on a declared `size` accepted by [`decode`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Largest body whose `size` still fits in the `i32` prefix.
pub const MAX_BODY_LEN: usize = i32::MAX as usize - 10;

/// Sentinel id the server answers an AUTH packet with when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;

/// Raw packet type as carried on the wire.
///
/// `AUTH_RESPONSE` and `COMMAND` share the value `2`; which one a packet is
/// depends on its direction, so the codec keeps the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub i32);

impl PacketType {
    pub const AUTH: PacketType = PacketType(3);
    pub const AUTH_RESPONSE: PacketType = PacketType(2);
    pub const COMMAND: PacketType = PacketType(2);
    pub const COMMAND_RESPONSE: PacketType = PacketType(0);

    pub fn raw(self) -> i32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: PacketType,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.id, self.packet_type, &self.body)
    }

    /// Value of the `size` field for this packet.
    pub fn size(&self) -> i32 {
        packet_size(self.body.len())
    }
}

/// Errors produced while decoding a frame.
///
/// Each variant knows how many buffered bytes belong to the bad frame so the
/// caller can drop them and try to resynchronise on what follows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("declared packet size {size} is below the minimum of {MIN_PACKET_SIZE}")]
    SizeTooSmall { size: i32 },

    #[error("declared packet size {size} exceeds maximum {max}")]
    SizeTooLarge { size: i32, max: usize },

    #[error("packet {id} is missing its null terminators")]
    MissingTerminator { id: i32, frame_len: usize },
}

impl FrameError {
    /// Number of bytes to discard from the front of the buffer.
    pub fn skip(&self) -> usize {
        match self {
            // The length prefix cannot be trusted, so only drop the prefix.
            FrameError::SizeTooSmall { .. } | FrameError::SizeTooLarge { .. } => HEADER_LEN,
            FrameError::MissingTerminator { frame_len, .. } => *frame_len,
        }
    }
}

/// Outcome of a successful [`decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete packet, and the number of bytes it occupied in the buffer.
    Frame { packet: Packet, consumed: usize },
    /// The buffer does not yet hold a complete packet.
    NeedMoreData,
}

/// `size` field value for a body of `body_len` bytes.
///
/// Saturates at `i32::MAX`; bodies longer than [`MAX_BODY_LEN`] cannot be
/// framed and must be rejected before encoding.
pub fn packet_size(body_len: usize) -> i32 {
    body_len
        .checked_add(10)
        .and_then(|size| i32::try_from(size).ok())
        .unwrap_or(i32::MAX)
}

/// Encodes a packet into its wire representation.
pub fn encode(id: i32, packet_type: PacketType, body: &str) -> Vec<u8> {
    let size = packet_size(body.len());
    let mut out = Vec::with_capacity(HEADER_LEN + size as usize);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&packet_type.raw().to_le_bytes());
    out.extend_from_slice(body.as_bytes());
    // Body terminator, then packet terminator
    out.extend_from_slice(&[0x00, 0x00]);
    out
}

/// Attempts to decode one packet from the front of `buf`.
///
/// Never mutates the buffer; the caller drops `consumed` bytes on success or
/// [`FrameError::skip`] bytes on error.
pub fn decode(buf: &[u8], max_size: usize) -> Result<Decoded, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::NeedMoreData);
    }

    let size = read_i32(buf, 0);
    if size < MIN_PACKET_SIZE {
        return Err(FrameError::SizeTooSmall { size });
    }
    if size as usize > max_size {
        return Err(FrameError::SizeTooLarge {
            size,
            max: max_size,
        });
    }

    let frame_len = HEADER_LEN + size as usize;
    if buf.len() < frame_len {
        return Ok(Decoded::NeedMoreData);
    }

    let id = read_i32(buf, 4);
    let packet_type = PacketType(read_i32(buf, 8));

    let body_end = frame_len - 2;
    if buf[body_end] != 0x00 || buf[body_end + 1] != 0x00 {
        return Err(FrameError::MissingTerminator { id, frame_len });
    }

    let body = String::from_utf8_lossy(&buf[12..body_end]).into_owned();

    Ok(Decoded::Frame {
        packet: Packet {
            id,
            packet_type,
            body,
        },
        consumed: frame_len,
    })
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(bytes)
}
