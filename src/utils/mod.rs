//! # Utility Modules
//!
//! Supporting utilities for the multiplexer.
//!
//! ## Components
//! - **Logging**: Structured logging configuration

pub mod logging;
