//! Application packet handler seam.
//!
//! The multiplexer owns framing and connection lifecycle; what a decoded
//! packet *means* belongs to the application. Implementations receive each
//! decoded frame together with a handle to the originating connection and
//! may write back or close it. Handlers must not block indefinitely.

use crate::core::packet::Packet;
use crate::core::registry::ConnectionId;
use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

/// Write/close surface handed to the packet handler for one connection.
pub struct ClientHandle {
    id: ConnectionId,
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    closed: bool,
}

impl ClientHandle {
    pub(crate) fn new(id: ConnectionId, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            writer,
            closed: false,
        }
    }

    /// Registry id of this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address of this connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Encode and send a packet back to the peer.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes()?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Write raw bytes to the peer.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Close the connection. The read loop stops after the current frame.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Whether the handler asked to close this connection.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Application callback invoked once per successfully decoded frame.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(&self, packet: Packet, conn: &mut ClientHandle) -> Result<()>;
}
