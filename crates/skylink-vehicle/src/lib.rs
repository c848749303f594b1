//! # skylink-vehicle
//!
//! Vehicle side of the SkyLink radio link. Owns the radio interfaces, runs
//! the link-negotiation responder and applies adaptive-video requests from
//! the ground controller.
//!
//! ## Ownership
//!
//! Everything below the [`vehicle::VehicleLink`] owner runs on a single
//! control thread. The only other thread is the serial TX worker
//! ([`tx::TxWorker`]), which owns the serial writers and never touches the
//! model, the negotiation session or the adaptive state.
//!
//! ```text
//!  ground packets ──► VehicleLink::on_packet ──┬─► NegotiationEngine
//!                                              └─► AdaptiveVideoController
//!  tick            ──► VehicleLink::periodic_loop
//!                                  │
//!                 RadioLinkManager ┴─► Wi-Fi writers (inline)
//!                                   └─► rtrb ring ─► TxWorker ─► serial writers
//! ```

pub mod adaptive;
pub mod config;
pub mod ipc;
pub mod link_manager;
pub mod negotiation;
pub mod pipeline;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod test_util;
pub mod tx;
pub mod udp;
pub mod vehicle;

pub use adaptive::{AdaptiveConfig, AdaptiveVideoController};
pub use config::VehicleConfig;
pub use link_manager::RadioLinkManager;
pub use negotiation::{NegotiationConfig, NegotiationEngine};
pub use vehicle::VehicleLink;
