//! # conn-mux
//!
//! Connection multiplexing and protocol-dispatch core for TCP services.
//!
//! One or more listener ports accept raw TCP connections. The first bytes
//! of each connection decide its fate: an HTTP/1.x request line routes the
//! socket to a pass-through relay in front of an internal HTTP handler,
//! anything else stays on the length-prefixed binary protocol and is
//! decoded into packets for an application callback. A separate admin
//! listener answers line-oriented commands for live connection metrics and
//! IP-ban management.
//!
//! ## Components
//! - [`core::packet`] / [`core::codec`]: Wire format and framing
//! - [`core::registry`]: Live-connection table and metrics
//! - [`core::ban`]: Ban-store boundary and enforcement policy
//! - [`protocol::sniff`]: One-shot HTTP vs binary classification
//! - [`protocol::handler`]: Application packet-handler seam
//! - [`service::connection`]: Per-connection state machine
//! - [`service::relay`]: Byte-exact HTTP pass-through
//! - [`service::admin`]: Admin command protocol
//! - [`service::server`]: Listener supervision and shutdown
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Length(4, big-endian)] [Payload(N)]
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use conn_mux::config::MuxConfig;
//! use conn_mux::core::packet::Packet;
//! use conn_mux::error::Result;
//! use conn_mux::protocol::handler::{ClientHandle, PacketHandler};
//! use conn_mux::service::server::Server;
//!
//! struct Ack;
//!
//! #[async_trait]
//! impl PacketHandler for Ack {
//!     async fn handle(&self, packet: Packet, conn: &mut ClientHandle) -> Result<()> {
//!         conn.send(&Packet::new(packet.kind, b"ack".to_vec())).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::builder()
//!         .config(MuxConfig::from_env()?)
//!         .packet_handler(Arc::new(Ack))
//!         .build();
//!     server.bind().await?.run().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use crate::config::MuxConfig;
pub use crate::core::ban::{BanPolicy, BanStore, MemoryBanStore};
pub use crate::core::codec::{CodecMode, FrameCodec};
pub use crate::core::packet::Packet;
pub use crate::core::registry::{AggregateStats, ConnectionRegistry, ConnectionSnapshot};
pub use crate::error::{MuxError, Result};
pub use crate::protocol::handler::{ClientHandle, PacketHandler};
pub use crate::protocol::sniff::{classify, Protocol};
pub use crate::service::server::{BoundServer, Server, ServerBuilder};
