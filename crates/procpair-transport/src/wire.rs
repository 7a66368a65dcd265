//! ---
//! pp_section: "02-messaging-ipc-data-model"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Broadcast transports and protocol codecs."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
//! Datagram payloads exchanged between primary and backup.
//!
//! Checkpoints are encoded as unsigned LEB128 varints: seven value bits per
//! byte, least significant group first, high bit set on every byte but the
//! last. A `u64` therefore never needs more than [`MAX_VARINT_LEN`] bytes.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest encoding of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Text token carried by heartbeats. Receivers never inspect it.
pub const HEARTBEAT_TOKEN: &[u8] = b"I am alive.";

/// Units of completed work. Non-decreasing on the primary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint(pub u64);

impl Checkpoint {
    /// The value a fresh instance starts from before it has heard anything.
    pub const ZERO: Checkpoint = Checkpoint(0);

    /// Raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// The following checkpoint, or `None` once the counter is exhausted.
    pub fn next(self) -> Option<Checkpoint> {
        self.0.checked_add(1).map(Checkpoint)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Checkpoint {
    fn from(value: u64) -> Self {
        Checkpoint(value)
    }
}

/// Payload decoding failures. Receivers count and discard these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The buffer ended while a continuation bit was still set.
    #[error("varint truncated after {0} bytes")]
    Truncated(usize),
    /// The encoding does not fit in 64 bits.
    #[error("varint overflows u64")]
    Overflow,
}

/// Append the varint encoding of `value` to `buf`.
pub fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decode a varint from the front of `buf`.
///
/// Only the leading encoding is consumed; anything after the terminating byte
/// is left in place. Peers padding the datagram with zeros are accepted.
pub fn get_uvarint(buf: &mut impl Buf) -> Result<u64, WireError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut read = 0usize;
    while buf.has_remaining() {
        let byte = buf.get_u8();
        read += 1;
        if read == MAX_VARINT_LEN && byte > 1 {
            return Err(WireError::Overflow);
        }
        if byte < 0x80 {
            return Ok(value | (u64::from(byte) << shift));
        }
        if read == MAX_VARINT_LEN {
            return Err(WireError::Overflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Err(WireError::Truncated(read))
}

/// Zero-payload liveness signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatMessage;

impl HeartbeatMessage {
    /// Datagram body sent on the heartbeat topic.
    pub fn encode(&self) -> Bytes {
        Bytes::from_static(HEARTBEAT_TOKEN)
    }
}

/// "All work up to and including this checkpoint is done."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointMessage {
    /// Checkpoint being announced.
    pub checkpoint: Checkpoint,
}

impl CheckpointMessage {
    /// Wrap a checkpoint for transmission.
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self { checkpoint }
    }

    /// Datagram body sent on the checkpoint topic.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MAX_VARINT_LEN);
        put_uvarint(&mut buf, self.checkpoint.get());
        buf.freeze()
    }

    /// Parse a received checkpoint datagram.
    pub fn decode(mut payload: &[u8]) -> Result<Self, WireError> {
        get_uvarint(&mut payload).map(|value| Self::new(Checkpoint(value)))
    }
}
