//! Streaming frame codec for the binary wire format.
//!
//! TCP does not preserve message boundaries, so the production decode path
//! accumulates bytes until a complete `[Type(1)][Length(4)][Payload(N)]`
//! frame is available. The declared length is validated before any
//! allocation happens.
//!
//! The one-chunk-per-frame behavior of the original wire handling survives
//! as [`CodecMode::Chunked`]; connection handling picks the mode from
//! configuration.

use crate::config::{FRAME_HEADER_LEN, MAX_PAYLOAD_SIZE};
use crate::core::packet::Packet;
use crate::error::{constants, MuxError};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// How inbound bytes are turned into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecMode {
    /// Accumulate bytes until a full frame is available (default).
    Streaming,
    /// Treat each inbound chunk as exactly one frame attempt.
    Chunked,
}

/// Tokio codec for framing packets over a byte stream.
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    /// Codec with the default payload bound.
    pub fn new() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Codec with an explicit payload bound.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, MuxError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[1..FRAME_HEADER_LEN]);
        let length = u32::from_be_bytes(len_bytes) as usize;

        // Reject before reserving: a hostile length field must not drive allocation
        if length > self.max_payload_size {
            return Err(MuxError::Decode(format!(
                "declared payload of {length} bytes exceeds limit of {}",
                self.max_payload_size
            )));
        }

        let frame_len = FRAME_HEADER_LEN + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let kind = src[0];
        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(length).to_vec();

        Ok(Some(Packet { kind, payload }))
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = MuxError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), MuxError> {
        let len = u32::try_from(packet.payload.len())
            .map_err(|_| MuxError::Encode(constants::ERR_PAYLOAD_TOO_LARGE.to_string()))?;

        dst.reserve(FRAME_HEADER_LEN + packet.payload.len());
        dst.put_u8(packet.kind);
        dst.put_u32(len);
        dst.extend_from_slice(&packet.payload);
        Ok(())
    }
}
