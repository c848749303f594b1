//! # Hardware seams
//!
//! The link manager never talks to a driver directly. Interface discovery,
//! frequency/power primitives and the open/close calls live behind
//! [`RadioInterfaceRegistry`]; the receive thread lives behind [`RadioRx`].
//! Both are implemented by the platform layer (and by
//! [`crate::test_util::MockRegistry`] / [`crate::udp`] for benches).

use std::io;

use bytes::Bytes;
use skylink_common::datarate::Datarate;
use skylink_common::flags::{ChannelWidth, RadioFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("interface {iface} does not exist")]
    NoSuchInterface { iface: usize },
    #[error("interface {iface} does not support {freq_khz} kHz")]
    UnsupportedFrequency { iface: usize, freq_khz: u32 },
    #[error("interface {iface}: {op} failed: {reason}")]
    Hardware {
        iface: usize,
        op: &'static str,
        reason: String,
    },
    #[error("interface {iface} is not open")]
    NotOpen { iface: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Per-packet radio parameters for Wi-Fi injection. Serial writers ignore them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxParams {
    pub radio_flags: RadioFlags,
    pub datarate: Datarate,
}

/// Everything a SiK modem needs, pushed in one atomic configuration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SikConfig {
    pub frequency_khz: u32,
    pub tx_power: i32,
    pub air_speed_bps: u32,
    pub ecc: bool,
    pub lbt: bool,
    pub mcs_retry: bool,
}

impl SikConfig {
    /// Air speed used when the link does not pin a legacy data rate.
    pub const DEFAULT_AIR_SPEED_BPS: u32 = 64_000;
}

/// An opened TX handle. Serial writers are moved onto the TX worker thread.
pub trait PacketWriter: Send {
    fn write_packet(&mut self, packet: &[u8], params: &TxParams) -> io::Result<()>;
}

pub trait RadioInterfaceRegistry {
    fn interface_count(&self) -> usize;

    fn set_frequency(
        &mut self,
        iface: usize,
        freq_khz: u32,
        width: ChannelWidth,
    ) -> Result<(), RadioError>;

    fn set_tx_power(&mut self, iface: usize, power_mw: i32) -> Result<(), RadioError>;

    /// Live datarate change for legacy 802.11 adapters.
    fn set_legacy_datarate(&mut self, iface: usize, datarate: Datarate) -> Result<(), RadioError>;

    fn configure_sik(&mut self, iface: usize, config: &SikConfig) -> Result<(), RadioError>;

    fn open_read(&mut self, iface: usize) -> Result<(), RadioError>;

    fn close_read(&mut self, iface: usize);

    fn open_write(&mut self, iface: usize) -> Result<Box<dyn PacketWriter>, RadioError>;

    /// Called after the writer for `iface` has been dropped.
    fn close_write(&mut self, iface: usize);
}

/// Control over the receive thread that feeds inbound packets to the owner.
pub trait RadioRx {
    fn start(&mut self);
    fn stop(&mut self);
    fn reset_uplink_stats(&mut self);
}

/// Outbound path used by the negotiation engine and the adaptive acks.
pub trait PacketSink {
    /// Returns how many interfaces the packet was handed to.
    fn send_packet(&mut self, packet: Bytes) -> usize;
}
