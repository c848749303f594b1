//! Recording doubles for the hardware, pipeline and IPC seams, plus the
//! reference models used across the unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use skylink_common::band::{Band, BandSet};
use skylink_common::datarate::Datarate;
use skylink_common::flags::{CapabilityFlags, ChannelWidth, InterfaceCapabilities, RadioFlags};
use skylink_common::model::{InterfaceParams, Model, RadioKind, RadioLinkParams};
use skylink_common::profiles::EcScheme;

use crate::ipc::{ModelChange, ModelNotifier};
use crate::pipeline::VideoPipeline;
use crate::registry::{
    PacketSink, PacketWriter, RadioError, RadioInterfaceRegistry, RadioRx, SikConfig, TxParams,
};

// ─── Reference models ───────────────────────────────────────────────────

/// Five interfaces on two links.
///
/// | iface | kind | link | role |
/// |-------|------|------|------|
/// | 0 | Wi-Fi `wlan0` | 0 (2.472 GHz) | video + data |
/// | 1 | Wi-Fi `wlan1` | 0 | video + data |
/// | 2 | Wi-Fi `wlan2` | unassigned | spare |
/// | 3 | SiK | 1 (915 MHz) | data |
/// | 4 | ELRS | 1 | RX only |
pub fn two_link_model() -> Model {
    let mut model = Model {
        vehicle_id: 0x5EA1,
        ..Model::default()
    };
    let wifi_bands = BandSet::new(&[Band::B24, Band::B58]);

    for i in 0..3 {
        let mut iface = InterfaceParams::new(RadioKind::Wifi, format!("wlan{i}"), wifi_bands);
        iface.assigned_link = (i < 2).then_some(0);
        iface.supported_radio_flags = RadioFlags::FRAME_TYPE_DATA | RadioFlags::DATARATE_MCS;
        model.radio_interfaces.push(iface);
    }

    let mut sik = InterfaceParams::new(RadioKind::Sik, "ttyUSB0", BandSet::new(&[Band::B915]));
    sik.capabilities = InterfaceCapabilities::CAN_RX
        | InterfaceCapabilities::CAN_TX
        | InterfaceCapabilities::USE_FOR_DATA;
    sik.assigned_link = Some(1);
    sik.tx_power_mw = 100;
    model.radio_interfaces.push(sik);

    let elrs_bands = BandSet::new(&[Band::B915]);
    let mut elrs = InterfaceParams::new(RadioKind::ElrsSerial, "ttyS1", elrs_bands);
    elrs.capabilities = InterfaceCapabilities::CAN_RX | InterfaceCapabilities::USE_FOR_DATA;
    elrs.assigned_link = Some(1);
    model.radio_interfaces.push(elrs);

    model.radio_links.push(RadioLinkParams::new(2_472_000));
    let mut sik_link = RadioLinkParams::new(915_000);
    sik_link.tx_radio_flags =
        RadioFlags::FRAME_TYPE_DATA | RadioFlags::DATARATE_LEGACY | RadioFlags::SIK_ECC;
    sik_link.rx_radio_flags = sik_link.tx_radio_flags;
    sik_link.tx_video_datarate = Datarate::Lowest;
    sik_link.tx_data_datarate = Datarate::Legacy(64_000);
    model.radio_links.push(sik_link);

    model
}

/// [`two_link_model`] with a committed capability whose MCS ceiling on both
/// video interfaces is `mcs_ceiling`.
pub fn negotiated_model(mcs_ceiling: Datarate) -> Model {
    let mut model = two_link_model();
    model.has_negotiated_links = true;
    model.runtime_capability.flags = CapabilityFlags::COMPUTED;
    model.runtime_capability.max_mcs_datarate[0] = mcs_ceiling;
    model.runtime_capability.max_mcs_datarate[1] = mcs_ceiling;
    model.runtime_capability.max_legacy_datarate[0] = Datarate::Legacy(54_000_000);
    model.runtime_capability.max_legacy_datarate[1] = Datarate::Legacy(54_000_000);
    model
}

// ─── Mock Infrastructure ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    SetFrequency(usize, u32),
    SetTxPower(usize, i32),
    SetLegacyDatarate(usize, Datarate),
    ConfigureSik(usize, SikConfig),
    OpenRead(usize),
    CloseRead(usize),
    OpenWrite(usize),
    CloseWrite(usize),
}

#[derive(Debug, Default)]
struct RegistryState {
    interface_count: usize,
    calls: Vec<RegistryCall>,
    written: Vec<(usize, Vec<u8>, TxParams)>,
    open_writers: HashSet<usize>,
    widths: HashMap<usize, ChannelWidth>,
    sik_failures: HashMap<usize, usize>,
    fail_frequency: HashSet<usize>,
    fail_open_read: HashSet<usize>,
    fail_open_write: HashSet<usize>,
}

/// Records every hardware call. Clones share state, so a test can keep one
/// handle and give another to the link manager.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl MockRegistry {
    pub fn new(interface_count: usize) -> Self {
        let registry = Self::default();
        registry.with(|s| s.interface_count = interface_count);
        registry
    }

    fn with<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// The next `times` SiK configuration calls on `iface` fail.
    pub fn fail_sik_times(&self, iface: usize, times: usize) {
        self.with(|s| s.sik_failures.insert(iface, times));
    }

    pub fn fail_frequency(&self, iface: usize) {
        self.with(|s| s.fail_frequency.insert(iface));
    }

    pub fn fail_open_read(&self, iface: usize) {
        self.with(|s| s.fail_open_read.insert(iface));
    }

    pub fn fail_open_write(&self, iface: usize) {
        self.with(|s| s.fail_open_write.insert(iface));
    }

    /// Hardware recovers: opens succeed again.
    pub fn clear_open_failures(&self) {
        self.with(|s| {
            s.fail_open_read.clear();
            s.fail_open_write.clear();
        });
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    /// Every packet written, with the interface and TX parameters used.
    pub fn written(&self) -> Vec<(usize, Vec<u8>, TxParams)> {
        self.with(|s| s.written.clone())
    }

    pub fn open_writers(&self) -> HashSet<usize> {
        self.with(|s| s.open_writers.clone())
    }

    pub fn width(&self, iface: usize) -> Option<ChannelWidth> {
        self.with(|s| s.widths.get(&iface).copied())
    }
}

fn hw_failure(iface: usize, op: &'static str) -> RadioError {
    RadioError::Hardware {
        iface,
        op,
        reason: "injected failure".into(),
    }
}

impl RadioInterfaceRegistry for MockRegistry {
    fn interface_count(&self) -> usize {
        self.with(|s| s.interface_count)
    }

    fn set_frequency(
        &mut self,
        iface: usize,
        freq_khz: u32,
        width: ChannelWidth,
    ) -> Result<(), RadioError> {
        self.with(|s| {
            s.calls.push(RegistryCall::SetFrequency(iface, freq_khz));
            if s.fail_frequency.contains(&iface) {
                return Err(hw_failure(iface, "set_frequency"));
            }
            s.widths.insert(iface, width);
            Ok(())
        })
    }

    fn set_tx_power(&mut self, iface: usize, power_mw: i32) -> Result<(), RadioError> {
        self.with(|s| s.calls.push(RegistryCall::SetTxPower(iface, power_mw)));
        Ok(())
    }

    fn set_legacy_datarate(&mut self, iface: usize, datarate: Datarate) -> Result<(), RadioError> {
        self.with(|s| s.calls.push(RegistryCall::SetLegacyDatarate(iface, datarate)));
        Ok(())
    }

    fn configure_sik(&mut self, iface: usize, config: &SikConfig) -> Result<(), RadioError> {
        self.with(|s| {
            s.calls.push(RegistryCall::ConfigureSik(iface, *config));
            match s.sik_failures.get_mut(&iface) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(hw_failure(iface, "configure_sik"))
                }
                _ => Ok(()),
            }
        })
    }

    fn open_read(&mut self, iface: usize) -> Result<(), RadioError> {
        self.with(|s| {
            s.calls.push(RegistryCall::OpenRead(iface));
            if s.fail_open_read.contains(&iface) {
                return Err(hw_failure(iface, "open_read"));
            }
            Ok(())
        })
    }

    fn close_read(&mut self, iface: usize) {
        self.with(|s| s.calls.push(RegistryCall::CloseRead(iface)));
    }

    fn open_write(&mut self, iface: usize) -> Result<Box<dyn PacketWriter>, RadioError> {
        self.with(|s| {
            s.calls.push(RegistryCall::OpenWrite(iface));
            if s.fail_open_write.contains(&iface) {
                return Err(hw_failure(iface, "open_write"));
            }
            s.open_writers.insert(iface);
            Ok(())
        })?;
        Ok(Box::new(MockWriter {
            iface,
            state: self.state.clone(),
        }))
    }

    fn close_write(&mut self, iface: usize) {
        self.with(|s| {
            s.calls.push(RegistryCall::CloseWrite(iface));
            s.open_writers.remove(&iface);
        });
    }
}

struct MockWriter {
    iface: usize,
    state: Arc<Mutex<RegistryState>>,
}

impl PacketWriter for MockWriter {
    fn write_packet(&mut self, packet: &[u8], params: &TxParams) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.written.push((self.iface, packet.to_vec(), *params));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockRx {
    pub events: Arc<Mutex<Vec<&'static str>>>,
}

impl MockRx {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, event: &'static str) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl RadioRx for MockRx {
    fn start(&mut self) {
        self.push("start");
    }

    fn stop(&mut self) {
        self.push("stop");
    }

    fn reset_uplink_stats(&mut self) {
        self.push("reset");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCall {
    Bitrate(u32, i8),
    Keyframe(i32),
    Ec(Option<EcScheme>),
    Focus(bool),
}

#[derive(Debug, Default)]
pub struct RecordingPipeline {
    pub calls: Vec<VideoCall>,
}

impl RecordingPipeline {
    pub fn bitrates(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                VideoCall::Bitrate(bps, _) => Some(*bps),
                _ => None,
            })
            .collect()
    }
}

impl VideoPipeline for RecordingPipeline {
    fn set_bitrate(&mut self, bitrate_bps: u32, ip_quantization_delta: i8) {
        self.calls.push(VideoCall::Bitrate(bitrate_bps, ip_quantization_delta));
    }

    fn set_keyframe_interval_ms(&mut self, keyframe_ms: i32) {
        self.calls.push(VideoCall::Keyframe(keyframe_ms));
    }

    fn set_ec_override(&mut self, scheme: Option<EcScheme>) {
        self.calls.push(VideoCall::Ec(scheme));
    }

    fn set_focus_mode(&mut self, monochrome: bool) {
        self.calls.push(VideoCall::Focus(monochrome));
    }
}

/// Shared-handle variant for when the pipeline is boxed into an owner.
#[derive(Debug, Clone, Default)]
pub struct SharedPipeline(pub Arc<Mutex<RecordingPipeline>>);

impl SharedPipeline {
    pub fn calls(&self) -> Vec<VideoCall> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).calls.clone()
    }

    pub fn bitrates(&self) -> Vec<u32> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).bitrates()
    }
}

impl VideoPipeline for SharedPipeline {
    fn set_bitrate(&mut self, bitrate_bps: u32, ip_quantization_delta: i8) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_bitrate(bitrate_bps, ip_quantization_delta);
    }

    fn set_keyframe_interval_ms(&mut self, keyframe_ms: i32) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_keyframe_interval_ms(keyframe_ms);
    }

    fn set_ec_override(&mut self, scheme: Option<EcScheme>) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).set_ec_override(scheme);
    }

    fn set_focus_mode(&mut self, monochrome: bool) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).set_focus_mode(monochrome);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    pub changes: Vec<ModelChange>,
}

impl ModelNotifier for RecordingNotifier {
    fn notify_model_changed(&mut self, change: ModelChange) {
        self.changes.push(change);
    }
}

/// Shared-handle notifier for boxed owners.
#[derive(Debug, Clone, Default)]
pub struct SharedNotifier(pub Arc<Mutex<Vec<ModelChange>>>);

impl SharedNotifier {
    pub fn changes(&self) -> Vec<ModelChange> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ModelNotifier for SharedNotifier {
    fn notify_model_changed(&mut self, change: ModelChange) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(change);
    }
}

/// Outbound sink that keeps every packet.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub packets: Vec<Bytes>,
}

impl PacketSink for RecordingSink {
    fn send_packet(&mut self, packet: Bytes) -> usize {
        self.packets.push(packet);
        1
    }
}
