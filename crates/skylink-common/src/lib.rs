//! Shared types for the Skylink vehicle link.
//!
//! This crate contains:
//! - **Flag sets**: radio, interface, link, capability and profile bit flags
//! - **Datarates**: the `Datarate` sum type and the legacy / MCS ladders
//! - **Bands**: radio frequency bands and per-band default frequencies
//! - **Model**: radio interface/link parameters and negotiated capability
//! - **Profiles**: video profiles and error-correction schemes

pub mod band;
pub mod datarate;
pub mod flags;
pub mod model;
pub mod profiles;

/// Number of radio interface slots carried by every fixed-size array on the
/// wire and in the model.
pub const MAX_RADIO_INTERFACES: usize = 8;

/// Number of radio link slots.
pub const MAX_RADIO_LINKS: usize = MAX_RADIO_INTERFACES;
