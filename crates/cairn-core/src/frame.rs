//! Cairn packet framing. The 4-byte header shared by every low-level
//! message on a peer link.
//!
//! These bytes ARE the protocol. The length field counts the payload plus
//! the 2-byte type field; both fields are big-endian. Changing anything
//! here is a breaking change for every deployed node.
//!
//! The header type uses zerocopy big-endian fields for safe,
//! allocation-free serialization. There is no unsafe code in this module.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Size of the packet header on the wire.
pub const HEADER_LEN: usize = 4;

/// Maximum payload bytes a single packet can carry.
/// The stored length field is `payload + 2` and must fit in 16 bits.
pub const MAX_PAYLOAD: usize = 65533;

/// The framing header preceding every packet message.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Payload length + 2 (the type field is counted as part of the body).
    pub length: U16<BigEndian>,
    /// Message type code. See [`type_code`].
    pub type_code: U16<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketHeader, [u8; 4]);

/// Reserved message type code space. Must never change.
///
/// Codes 4 and 7 are reserved and never sent; a conforming node drops them
/// as unknown.
pub mod type_code {
    pub const IDENTIFY: u16 = 0;
    pub const APP_ENVELOPE: u16 = 1;
    pub const TRAILER_CHUNK: u16 = 2;
    pub const TRAILER_CREDIT: u16 = 3;
    /// Reserved. Early drafts carried an abort message here; never shipped.
    pub const TRAILER_ABORT: u16 = 4;
    pub const VOID: u16 = 5;
    pub const TRAILER_KILL: u16 = 6;
    pub const RATE_LIMIT_VIOLATION: u16 = 8;
    pub const GO_AWAY: u16 = 9;
    pub const ADDRESS_DETECTED: u16 = 10;
    pub const RATE_INTERVAL: u16 = 11;
}

/// Errors that can arise when interpreting framing bytes off the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("header truncated: {0} bytes, need {HEADER_LEN}")]
    Truncated(usize),

    #[error("stored length {0} smaller than the type field it must count")]
    LengthTooSmall(u16),
}

/// Encode a framing header.
///
/// Panics if `payload_len` exceeds [`MAX_PAYLOAD`]. An oversized payload is
/// a bug in the caller, not a network condition, so this fails fast rather
/// than returning an error.
pub fn encode_header(payload_len: usize, type_code: u16) -> [u8; 4] {
    assert!(
        payload_len <= MAX_PAYLOAD,
        "payload of {payload_len} bytes cannot be framed (max {MAX_PAYLOAD})"
    );
    let header = PacketHeader {
        length: U16::new(payload_len as u16 + 2),
        type_code: U16::new(type_code),
    };
    let mut out = [0u8; 4];
    out.copy_from_slice(header.as_bytes());
    out
}

/// Decode a framing header, returning `(payload_len, type_code)`.
///
/// A stored length below 2 cannot account for the type field and is
/// malformed input from the network, reported as an error rather than a
/// panic.
pub fn decode_header(bytes: &[u8]) -> Result<(u16, u16), FrameError> {
    let header =
        PacketHeader::read_from_prefix(bytes).ok_or(FrameError::Truncated(bytes.len()))?;
    let stored = header.length.get();
    if stored < 2 {
        return Err(FrameError::LengthTooSmall(stored));
    }
    Ok((stored - 2, header.type_code.get()))
}

/// Frame a payload into complete wire bytes: header followed by payload.
///
/// This is the single encoding path for all outbound messages; message
/// length is always derived from the bytes this returns.
pub fn encode_frame(type_code: u16, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_slice(&encode_header(payload.len(), type_code));
    out.put_slice(payload);
    out.freeze()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
