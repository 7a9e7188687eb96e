//! Binary packet type and single-buffer encode/decode.
//!
//! Wire format:
//! ```text
//! [Type(1)] [Length(4, big-endian)] [Payload(N)]
//! ```
//!
//! `from_bytes` treats one buffer as exactly one frame attempt: this is the
//! compatibility decode mode, where a frame split across reads fails. The
//! streaming reassembly lives in [`crate::core::codec::FrameCodec`].

use crate::config::FRAME_HEADER_LEN;
use crate::error::{constants, MuxError, Result};

/// One decoded binary-protocol message.
///
/// Immutable once decoded; produced by the codec and consumed by the
/// application packet handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Application-defined packet type tag
    pub kind: u8,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet from a type tag and payload bytes.
    pub fn new(kind: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encode into a freshly allocated buffer.
    ///
    /// Fails when the payload length does not fit the 32-bit length field.
    /// No other size limit is enforced at this layer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| MuxError::Encode(constants::ERR_PAYLOAD_TOO_LARGE.to_string()))?;

        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.push(self.kind);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a single frame from one buffer.
    ///
    /// The type tag is read at offset 0, the payload length at offsets 1..5,
    /// and the payload at `[5, 5 + length)`. Trailing bytes beyond the frame
    /// are ignored. Fails when fewer than 5 bytes are available or when the
    /// declared length exceeds the remaining bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(MuxError::Decode(constants::ERR_FRAME_TOO_SHORT.to_string()));
        }

        let kind = buf[0];
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[1..FRAME_HEADER_LEN]);
        let length = u32::from_be_bytes(len_bytes) as usize;

        let end = FRAME_HEADER_LEN
            .checked_add(length)
            .ok_or_else(|| MuxError::Decode(constants::ERR_FRAME_TRUNCATED.to_string()))?;
        if end > buf.len() {
            return Err(MuxError::Decode(constants::ERR_FRAME_TRUNCATED.to_string()));
        }

        Ok(Self {
            kind,
            payload: buf[FRAME_HEADER_LEN..end].to_vec(),
        })
    }

    /// Total encoded size of this packet in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}
