//! # Service Layer
//!
//! Long-running listeners and per-connection tasks.
//!
//! ## Components
//! - **Server**: Supervisor that binds listeners and spawns connection tasks
//! - **Connection**: Per-socket lifecycle and protocol dispatch
//! - **Relay**: HTTP pass-through to the internal request handler
//! - **Admin**: Line-oriented command listener

pub mod admin;
pub mod connection;
pub mod relay;
pub mod server;
