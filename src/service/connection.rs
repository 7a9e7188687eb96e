//! Per-connection lifecycle.
//!
//! Each accepted socket runs in its own task and walks a small state
//! machine: `Accepted → Classifying → {BinaryStream | HttpRelay} → Closed`.
//! The ban check happens before registration, classification happens once
//! on the first inbound chunk, and the chosen path consumes that same
//! chunk. Errors on one connection never touch another; codec failures are
//! counted and logged, and in chunked mode the connection stays open.

use crate::core::ban::{BanPolicy, BanStore};
use crate::core::codec::{CodecMode, FrameCodec};
use crate::core::packet::Packet;
use crate::core::registry::{ConnectionId, ConnectionRegistry};
use crate::protocol::handler::{ClientHandle, PacketHandler};
use crate::protocol::sniff::{classify, Protocol};
use crate::service::relay::run_relay;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;
use tracing::{debug, error, warn};

use crate::config::READ_BUFFER_SIZE;

/// Notice written to a banned peer before the socket is closed.
const BANNED_NOTICE: &[u8] = b"rejected: address is banned\n";

/// Notice written when fail-closed policy rejects on a store failure.
const STORE_DOWN_NOTICE: &[u8] = b"rejected: ban list unavailable\n";

/// Lifecycle states of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Accepted,
    Classifying,
    BinaryStream,
    HttpRelay,
    Closed,
}

/// Shared collaborators handed to every connection task.
pub(crate) struct ServerContext {
    pub registry: Arc<ConnectionRegistry>,
    pub ban_store: Arc<dyn BanStore>,
    pub ban_policy: BanPolicy,
    pub packet_handler: Arc<dyn PacketHandler>,
    pub codec_mode: CodecMode,
    pub max_payload_size: usize,
    pub upstream_address: String,
}

/// Drive one accepted socket from ban check to cleanup.
pub(crate) async fn handle_client(ctx: Arc<ServerContext>, mut stream: TcpStream, peer: SocketAddr) {
    let mut state = ConnState::Accepted;
    debug!(peer = %peer, state = ?state, "Socket accepted");

    // Ban check happens before the connection is registered or counted
    match ctx.ban_store.contains(peer.ip()).await {
        Ok(true) => {
            debug!(peer = %peer, "Rejected banned address");
            let _ = stream.write_all(BANNED_NOTICE).await;
            let _ = stream.shutdown().await;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(peer = %peer, error = %e, "Ban store lookup failed");
            if ctx.ban_policy == BanPolicy::FailClosed {
                let _ = stream.write_all(STORE_DOWN_NOTICE).await;
                let _ = stream.shutdown().await;
                return;
            }
            // Fail-open: admit the connection, the failure is already logged
        }
    }

    let id = match ctx.registry.register() {
        Ok(id) => id,
        Err(e) => {
            error!(peer = %peer, error = %e, "Failed to register connection");
            let _ = stream.shutdown().await;
            return;
        }
    };
    state = ConnState::Classifying;
    debug!(id = %id, peer = %peer, state = ?state, "Connection registered");

    let mut first = vec![0u8; READ_BUFFER_SIZE];
    let n = match stream.read(&mut first).await {
        Ok(0) => {
            debug!(id = %id, "Peer closed before sending data");
            finish(&ctx, &id, &mut state);
            return;
        }
        Ok(n) => n,
        Err(e) => {
            let _ = ctx.registry.record_error(&id);
            warn!(id = %id, error = %e, "Socket error before classification");
            finish(&ctx, &id, &mut state);
            return;
        }
    };
    let _ = ctx.registry.record_bytes(&id, n as u64);

    // One-shot decision; this connection is never reclassified
    match classify(&first[..n]) {
        Protocol::Http => {
            state = ConnState::HttpRelay;
            debug!(id = %id, state = ?state, "Classified as HTTP");
            match run_relay(stream, &first[..n], &ctx.upstream_address, &ctx.registry, &id).await {
                Ok(summary) => debug!(
                    id = %id,
                    request_bytes = summary.request_bytes,
                    response_bytes = summary.response_bytes,
                    "Relay complete"
                ),
                Err(e) => {
                    let _ = ctx.registry.record_error(&id);
                    warn!(id = %id, error = %e, "Relay failed, closing connection");
                }
            }
        }
        Protocol::Binary => {
            state = ConnState::BinaryStream;
            debug!(id = %id, state = ?state, "Classified as binary");
            let (reader, writer) = stream.into_split();
            let mut handle = ClientHandle::new(id.clone(), peer, writer);
            match ctx.codec_mode {
                CodecMode::Streaming => {
                    binary_stream_framed(&ctx, &id, reader, &mut handle, &first[..n]).await
                }
                CodecMode::Chunked => {
                    binary_stream_chunked(&ctx, &id, reader, &mut handle, &first[..n]).await
                }
            }
        }
    }

    finish(&ctx, &id, &mut state);
}

fn finish(ctx: &ServerContext, id: &ConnectionId, state: &mut ConnState) {
    if let Err(e) = ctx.registry.unregister(id) {
        error!(id = %id, error = %e, "Failed to unregister connection");
    }
    *state = ConnState::Closed;
    debug!(id = %id, state = ?state, "Connection closed");
}

/// Streaming mode: accumulate bytes and hand out every complete frame.
/// A decode failure here means the stream is desynchronized and terminal.
async fn binary_stream_framed(
    ctx: &ServerContext,
    id: &ConnectionId,
    mut reader: OwnedReadHalf,
    handle: &mut ClientHandle,
    first_chunk: &[u8],
) {
    let mut codec = FrameCodec::with_max_payload(ctx.max_payload_size);
    let mut acc = BytesMut::with_capacity(READ_BUFFER_SIZE.max(first_chunk.len()));
    acc.extend_from_slice(first_chunk);

    'conn: loop {
        loop {
            match codec.decode(&mut acc) {
                Ok(Some(packet)) => {
                    dispatch_packet(ctx, id, packet, handle).await;
                    if handle.is_closed() {
                        break 'conn;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = ctx.registry.record_error(id);
                    warn!(id = %id, error = %e, "Frame stream desynchronized, closing");
                    break 'conn;
                }
            }
        }

        match reader.read_buf(&mut acc).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = ctx.registry.record_bytes(id, n as u64);
            }
            Err(e) => {
                let _ = ctx.registry.record_error(id);
                warn!(id = %id, error = %e, "Socket error on binary stream");
                break;
            }
        }
    }
}

/// Chunked mode: every inbound chunk is exactly one frame attempt.
/// Decode failures are counted and logged; the connection stays open.
async fn binary_stream_chunked(
    ctx: &ServerContext,
    id: &ConnectionId,
    mut reader: OwnedReadHalf,
    handle: &mut ClientHandle,
    first_chunk: &[u8],
) {
    decode_chunk(ctx, id, first_chunk, handle).await;

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if handle.is_closed() {
            break;
        }
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = ctx.registry.record_bytes(id, n as u64);
                decode_chunk(ctx, id, &buf[..n], handle).await;
            }
            Err(e) => {
                let _ = ctx.registry.record_error(id);
                warn!(id = %id, error = %e, "Socket error on binary stream");
                break;
            }
        }
    }
}

async fn decode_chunk(ctx: &ServerContext, id: &ConnectionId, chunk: &[u8], handle: &mut ClientHandle) {
    match Packet::from_bytes(chunk) {
        Ok(packet) => dispatch_packet(ctx, id, packet, handle).await,
        Err(e) => {
            let _ = ctx.registry.record_error(id);
            warn!(id = %id, error = %e, "Failed to decode packet");
        }
    }
}

async fn dispatch_packet(
    ctx: &ServerContext,
    id: &ConnectionId,
    packet: Packet,
    handle: &mut ClientHandle,
) {
    debug!(id = %id, kind = packet.kind, bytes = packet.payload.len(), "Packet received");
    if let Err(e) = ctx.packet_handler.handle(packet, handle).await {
        let _ = ctx.registry.record_error(id);
        warn!(id = %id, error = %e, "Packet handler failed");
    }
}
