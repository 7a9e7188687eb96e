//! # Protocol Logic
//!
//! Classification and dispatch above the wire format.
//!
//! ## Components
//! - **Sniff**: One-shot HTTP vs binary classification of a connection
//! - **Handler**: The application callback seam for decoded packets

pub mod handler;
pub mod sniff;
