//! # Error Types
//!
//! Comprehensive error handling for the connection-mux core.
//!
//! This module defines all error variants that can occur while multiplexing
//! connections, from low-level I/O errors to protocol-dispatch failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and listener failures
//! - **Codec Errors**: Malformed or truncated frames
//! - **Relay Errors**: HTTP handler unreachable or errored
//! - **Store Errors**: Ban-store lookups or mutations failed
//! - **Startup Errors**: Listener bind failures (fatal)
//!
//! ## Propagation Policy
//! Per-connection errors (codec, relay, store) are contained to that
//! connection: they are logged once, counted in the registry, and never
//! affect other connections. `ListenerBind` aborts server startup.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Registry errors
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire lock on connection registry";

    /// Codec errors
    pub const ERR_FRAME_TOO_SHORT: &str = "Frame shorter than the 5-byte header";
    pub const ERR_FRAME_TRUNCATED: &str = "Declared payload length exceeds available bytes";
    pub const ERR_PAYLOAD_TOO_LARGE: &str = "Payload length does not fit in 32 bits";

    /// Relay errors
    pub const ERR_RELAY_UNREACHABLE: &str = "HTTP handler unreachable";
    pub const ERR_RELAY_BAD_HEAD: &str = "Malformed HTTP request head";

    /// Store errors
    pub const ERR_STORE_UNAVAILABLE: &str = "Ban store unavailable";
}

// MuxError is the primary error type for all multiplexer operations
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("Relay forwarding error: {0}")]
    RelayForward(String),

    #[error("Ban store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Failed to bind listener on {addr}: {reason}")]
    ListenerBind { addr: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Custom error: {0}")]
    Custom(String),
}

impl MuxError {
    /// True for errors that are contained to a single connection.
    pub fn is_per_connection(&self) -> bool {
        !matches!(self, MuxError::ListenerBind { .. } | MuxError::Config(_))
    }
}

/// Type alias for Results using MuxError
pub type Result<T> = std::result::Result<T, MuxError>;
