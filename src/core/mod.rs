//! # Core Components
//!
//! Low-level packet handling, framing, and the shared per-connection state.
//!
//! This module provides the foundation for the multiplexer: the wire
//! format, the streaming codec, the live-connection registry, and the
//! ban-store boundary.
//!
//! ## Components
//! - **Packet**: Binary packet format and one-shot decode
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Registry**: Live connections and cumulative metrics
//! - **Ban**: Adapter interface to the external ban list
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Length(4, big-endian)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum payload size enforced by the streaming decoder (16MB default)
//! - Length validation before allocation

pub mod ban;
pub mod codec;
pub mod packet;
pub mod registry;
