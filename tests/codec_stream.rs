//! Integration tests for the frame codec
//!
//! These tests validate both decode modes: streaming reassembly across
//! partial reads, and the one-chunk-per-frame compatibility path.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use conn_mux::core::codec::FrameCodec;
use conn_mux::core::packet::Packet;
use conn_mux::error::MuxError;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn test_round_trip_across_type_range() {
    for kind in 0u16..=255 {
        let kind = kind as u8;
        let payload = vec![kind ^ 0x5A; (kind as usize * 7) % 300];
        let packet = Packet::new(kind, payload.clone());

        let bytes = packet.to_bytes().expect("encode");
        let decoded = Packet::from_bytes(&bytes).expect("decode");

        assert_eq!(decoded.kind, kind);
        assert_eq!(decoded.payload, payload);
    }
}

#[test]
fn test_decode_shorter_than_header_always_fails() {
    for len in 0..5 {
        let result = Packet::from_bytes(&vec![0xFF; len]);
        assert!(
            matches!(result, Err(MuxError::Decode(_))),
            "{len}-byte buffer must fail"
        );
    }
}

#[test]
fn test_decode_declared_length_beyond_buffer_fails() {
    let mut bytes = vec![3u8];
    bytes.extend_from_slice(&100u32.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 50]); // 50 < declared 100

    let result = Packet::from_bytes(&bytes);
    assert!(matches!(result, Err(MuxError::Decode(_))));
}

#[test]
fn test_codec_partial_decode_preserves_buffer() {
    let mut codec = FrameCodec::new();

    // Only 3 bytes of the 5-byte header
    let mut buffer = BytesMut::from(&[0x01, 0x00, 0x00][..]);

    let result = codec.decode(&mut buffer).expect("Decode should not error");

    assert!(result.is_none());
    assert_eq!(buffer.len(), 3); // Buffer unchanged
}

#[test]
fn test_codec_multiple_packets_in_buffer() {
    let mut codec = FrameCodec::new();

    let packet1 = Packet::new(1, vec![1, 2, 3]);
    let packet2 = Packet::new(2, vec![4, 5, 6]);

    let mut buffer = BytesMut::new();
    codec.encode(packet1.clone(), &mut buffer).expect("encode");
    codec.encode(packet2.clone(), &mut buffer).expect("encode");

    let decoded1 = codec
        .decode(&mut buffer)
        .expect("Failed to decode")
        .expect("Should have packet");
    assert_eq!(decoded1, packet1);

    let decoded2 = codec
        .decode(&mut buffer)
        .expect("Failed to decode")
        .expect("Should have packet");
    assert_eq!(decoded2, packet2);

    assert_eq!(buffer.len(), 0);
}

#[test]
fn test_codec_incremental_buffer_fill() {
    let mut codec = FrameCodec::new();

    // Simulate incremental network reads
    let packet = Packet::new(9, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let full_bytes = packet.to_bytes().expect("encode");

    let mut buffer = BytesMut::new();

    for (i, byte) in full_bytes.iter().enumerate() {
        buffer.extend_from_slice(&[*byte]);

        let result = codec.decode(&mut buffer).expect("Should not error");

        if i < full_bytes.len() - 1 {
            // Should return None until complete
            assert!(result.is_none());
            assert!(!buffer.is_empty());
        } else {
            let decoded = result.expect("complete frame");
            assert_eq!(decoded, packet);
            assert_eq!(buffer.len(), 0);
        }
    }
}

#[test]
fn test_chunked_mode_rejects_split_frame() {
    // The compatibility mode treats each chunk as one frame attempt, so a
    // frame split across two chunks fails on both halves.
    let packet = Packet::new(5, vec![0xAA; 64]);
    let full_bytes = packet.to_bytes().expect("encode");
    let (head, tail) = full_bytes.split_at(10);

    assert!(matches!(Packet::from_bytes(head), Err(MuxError::Decode(_))));
    // The tail's 0xAA bytes masquerade as a header declaring far more
    // payload than the chunk carries
    assert!(matches!(Packet::from_bytes(tail), Err(MuxError::Decode(_))));
}

#[test]
fn test_codec_encode_large_payload() {
    let mut codec = FrameCodec::new();

    // 1MB payload
    let payload = vec![0xAB; 1024 * 1024];
    let packet = Packet::new(7, payload.clone());

    let mut buffer = BytesMut::new();
    codec.encode(packet, &mut buffer).expect("Failed to encode");

    assert_eq!(buffer.len(), 5 + 1024 * 1024);

    let decoded = codec
        .decode(&mut buffer)
        .expect("Failed to decode")
        .expect("Should have packet");
    assert_eq!(decoded.payload.len(), 1024 * 1024);
    assert_eq!(decoded.payload[0], 0xAB);
}

#[test]
fn test_streaming_rejects_payload_beyond_limit() {
    let mut codec = FrameCodec::with_max_payload(16);
    let mut buffer = BytesMut::new();
    codec
        .encode(Packet::new(1, vec![0u8; 17]), &mut buffer)
        .expect("encode is not bounded by the decode limit");

    let result = codec.decode(&mut buffer);
    assert!(matches!(result, Err(MuxError::Decode(_))));
}
