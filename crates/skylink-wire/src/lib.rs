//! # skylink-wire
//!
//! Radio packet formats exchanged between the vehicle and the ground
//! controller.
//!
//! ## Crate structure
//!
//! - [`header`]: fixed packet header, packet types, reply mirroring
//! - [`negotiation`]: link negotiation commands and payloads
//! - [`adaptive`]: adaptive video parameter update and its ack
//! - [`error`]: decode errors
//!
//! All multi-byte fields are little-endian.

pub mod adaptive;
pub mod error;
pub mod header;
pub mod negotiation;

pub use error::WireError;
pub use header::{PacketHeader, PacketType, HEADER_LEN};
