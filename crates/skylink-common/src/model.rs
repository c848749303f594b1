//! The shared vehicle Model as far as the radio link core touches it.
//!
//! The Model is owned by the daemon, persisted through an external store,
//! and mirrored by sibling processes that reload it on a model-changed
//! notification.

use serde::{Deserialize, Serialize};

use crate::band::BandSet;
use crate::datarate::{Datarate, RateFamily};
use crate::flags::{CapabilityFlags, InterfaceCapabilities, LinkCapabilities, RadioFlags};
use crate::profiles::{default_profiles, VideoProfile, VideoProfileKind};
use crate::MAX_RADIO_INTERFACES;

// ── Radio interfaces ────────────────────────────────────────────────

/// Radio technology of a physical interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioKind {
    /// Wi-Fi chipset in packet-injection mode.
    Wifi,
    /// Wi-Fi chipset limited to legacy 802.11 rates; datarate is set on the
    /// interface rather than per packet.
    WifiLegacy,
    /// SiK serial radio.
    Sik,
    /// ELRS module on a serial port.
    ElrsSerial,
}

impl RadioKind {
    pub fn is_wifi(self) -> bool {
        matches!(self, RadioKind::Wifi | RadioKind::WifiLegacy)
    }

    /// Interfaces driven through a file descriptor and the TX thread.
    pub fn is_serial(self) -> bool {
        matches!(self, RadioKind::Sik | RadioKind::ElrsSerial)
    }
}

/// Persisted parameters of one radio interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceParams {
    pub kind: RadioKind,
    pub name: String,
    pub supported_bands: BandSet,
    pub capabilities: InterfaceCapabilities,
    /// Link this interface is assigned to. Unassigned interfaces exist.
    pub assigned_link: Option<usize>,
    /// Driver-specific raw power value.
    pub raw_tx_power: i32,
    /// Power in mW, as negotiated or configured.
    pub tx_power_mw: i32,
    /// Last frequency successfully set on the card, 0 if never.
    pub current_frequency_khz: u32,
    /// Radio flags proven usable by link negotiation.
    pub supported_radio_flags: RadioFlags,
}

impl InterfaceParams {
    pub fn new(kind: RadioKind, name: impl Into<String>, supported_bands: BandSet) -> Self {
        Self {
            kind,
            name: name.into(),
            supported_bands,
            capabilities: InterfaceCapabilities::CAN_RX
                | InterfaceCapabilities::CAN_TX
                | InterfaceCapabilities::USE_FOR_VIDEO
                | InterfaceCapabilities::USE_FOR_DATA,
            assigned_link: None,
            raw_tx_power: 0,
            tx_power_mw: 0,
            current_frequency_khz: 0,
            supported_radio_flags: RadioFlags::FRAME_TYPE_DATA,
        }
    }
}

// ── Radio links ─────────────────────────────────────────────────────

/// Persisted parameters of one logical radio link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioLinkParams {
    pub frequency_khz: u32,
    pub capabilities: LinkCapabilities,
    /// Vehicle to controller (downlink).
    pub tx_radio_flags: RadioFlags,
    /// Controller to vehicle (uplink).
    pub rx_radio_flags: RadioFlags,
    pub tx_video_datarate: Datarate,
    pub tx_data_datarate: Datarate,
    pub rx_data_datarate: Datarate,
    /// Share of the PHY rate the link may be loaded to (1–100).
    pub max_load_percent: u8,
}

impl RadioLinkParams {
    pub fn new(frequency_khz: u32) -> Self {
        Self {
            frequency_khz,
            capabilities: LinkCapabilities::CAN_RX | LinkCapabilities::CAN_TX,
            tx_radio_flags: RadioFlags::FRAME_TYPE_DATA | RadioFlags::DATARATE_MCS,
            rx_radio_flags: RadioFlags::FRAME_TYPE_DATA | RadioFlags::DATARATE_MCS,
            tx_video_datarate: Datarate::Mcs(2),
            tx_data_datarate: Datarate::Lowest,
            rx_data_datarate: Datarate::Lowest,
            max_load_percent: 80,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.capabilities.contains(LinkCapabilities::DISABLED)
    }

    pub fn tx_family(&self) -> RateFamily {
        RateFamily::for_flags(self.tx_radio_flags)
    }
}

/// Relay role assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayParams {
    /// Link currently designated as the relay link.
    pub link: Option<usize>,
    pub frequency_khz: u32,
}

// ── Runtime capability ──────────────────────────────────────────────

/// Per-interface ceilings proven by link negotiation.
///
/// Only trustworthy while [`CapabilityFlags::COMPUTED`] is set and the
/// Model reports negotiated links; see [`Model::has_valid_capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeRadioCapability {
    pub flags: CapabilityFlags,
    pub max_legacy_datarate: [Datarate; MAX_RADIO_INTERFACES],
    pub max_mcs_datarate: [Datarate; MAX_RADIO_INTERFACES],
    pub max_tx_power_mw: [i32; MAX_RADIO_INTERFACES],
}

impl RuntimeRadioCapability {
    /// Wire size: flags plus three interface-sized `i32` arrays.
    pub const ENCODED_LEN: usize = 4 + 3 * MAX_RADIO_INTERFACES * 4;

    pub fn is_computed(&self) -> bool {
        self.flags.contains(CapabilityFlags::COMPUTED)
    }

    /// Proven ceiling of `iface` for `family`. `None` when unknown.
    pub fn ceiling(&self, iface: usize, family: RateFamily) -> Option<Datarate> {
        let dr = match family {
            RateFamily::Legacy => *self.max_legacy_datarate.get(iface)?,
            RateFamily::Mcs => *self.max_mcs_datarate.get(iface)?,
        };
        dr.family().filter(|f| *f == family).map(|_| dr)
    }
}

// ── Video ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub current_profile: VideoProfileKind,
    pub profiles: Vec<VideoProfile>,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            current_profile: VideoProfileKind::default(),
            profiles: default_profiles(),
        }
    }
}

// ── Model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub vehicle_id: u32,
    pub developer_mode: bool,
    pub has_camera: bool,
    pub radio_interfaces: Vec<InterfaceParams>,
    pub radio_links: Vec<RadioLinkParams>,
    /// Set by a committed negotiation session.
    pub has_negotiated_links: bool,
    pub relay: RelayParams,
    pub runtime_capability: RuntimeRadioCapability,
    pub video: VideoParams,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            vehicle_id: 0,
            developer_mode: false,
            has_camera: true,
            radio_interfaces: Vec::new(),
            radio_links: Vec::new(),
            has_negotiated_links: false,
            relay: RelayParams::default(),
            runtime_capability: RuntimeRadioCapability::default(),
            video: VideoParams::default(),
        }
    }
}

impl Model {
    /// Negotiated capability may only be used when both trust flags are set.
    pub fn has_valid_capability(&self) -> bool {
        self.has_negotiated_links && self.runtime_capability.is_computed()
    }

    pub fn active_profile(&self) -> VideoProfile {
        self.video
            .profiles
            .iter()
            .find(|p| p.kind == self.video.current_profile)
            .cloned()
            .unwrap_or_else(|| VideoProfile::preset(self.video.current_profile))
    }

    pub fn active_profile_mut(&mut self) -> &mut VideoProfile {
        let kind = self.video.current_profile;
        let pos = match self.video.profiles.iter().position(|p| p.kind == kind) {
            Some(pos) => pos,
            None => {
                self.video.profiles.push(VideoProfile::preset(kind));
                self.video.profiles.len() - 1
            }
        };
        &mut self.video.profiles[pos]
    }

    /// Link the interface is assigned to, if that link exists.
    pub fn link_of(&self, iface: usize) -> Option<usize> {
        self.radio_interfaces
            .get(iface)?
            .assigned_link
            .filter(|l| *l < self.radio_links.len())
    }

    pub fn interfaces_on_link(&self, link: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.radio_interfaces.len()).filter(move |i| self.link_of(*i) == Some(link))
    }

    pub fn is_relay_link(&self, link: usize) -> bool {
        self.relay.link == Some(link)
    }

    /// Frequency the link must be tuned to right now.
    pub fn effective_link_frequency(&self, link: usize) -> u32 {
        if self.is_relay_link(link) && self.relay.frequency_khz != 0 {
            self.relay.frequency_khz
        } else {
            self.radio_links.get(link).map_or(0, |l| l.frequency_khz)
        }
    }

    /// Drop negotiated trust flags. Returns whether anything changed.
    pub fn strip_negotiated_capability(&mut self) -> bool {
        let changed = self.has_negotiated_links || self.runtime_capability.is_computed();
        self.has_negotiated_links = false;
        self.runtime_capability.flags.remove(CapabilityFlags::COMPUTED);
        changed
    }

    /// Bring radio settings back in line after a capability change.
    ///
    /// Forces the data frame-type bit, clamps every link's video datarate to
    /// the lowest negotiated ceiling among its interfaces, and clears a
    /// relay assignment that points at a missing link. Returns whether
    /// anything changed.
    pub fn validate_radio_settings(&mut self) -> bool {
        let mut changed = false;
        let valid_capability = self.has_valid_capability();

        for link in 0..self.radio_links.len() {
            let params = &self.radio_links[link];
            let tx = params.tx_radio_flags.with(RadioFlags::FRAME_TYPE_DATA);
            let rx = params.rx_radio_flags.with(RadioFlags::FRAME_TYPE_DATA);
            let family = params.tx_family();
            let current = params.tx_video_datarate;

            let mut clamped = current;
            if valid_capability {
                let current_rung = family.rung_of(current);
                for iface in self.interfaces_on_link(link) {
                    let Some(ceiling) = self.runtime_capability.ceiling(iface, family) else {
                        continue;
                    };
                    let ceiling_rung = family.rung_of(ceiling);
                    if let (Some(c), Some(max)) = (current_rung, ceiling_rung) {
                        if c > max && family.rung_of(clamped).is_some_and(|r| r > max) {
                            clamped = ceiling;
                        }
                    }
                }
            }

            let params = &mut self.radio_links[link];
            if params.tx_radio_flags != tx || params.rx_radio_flags != rx || clamped != current {
                changed = true;
            }
            params.tx_radio_flags = tx;
            params.rx_radio_flags = rx;
            params.tx_video_datarate = clamped;
        }

        if self.relay.link.is_some_and(|l| l >= self.radio_links.len()) {
            self.relay.link = None;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Band;

    fn two_link_model() -> Model {
        let mut m = Model::default();
        for i in 0..3 {
            let bands = BandSet::new(&[Band::B58]);
            let mut iface = InterfaceParams::new(RadioKind::Wifi, format!("wlan{i}"), bands);
            iface.assigned_link = Some(if i == 2 { 1 } else { 0 });
            m.radio_interfaces.push(iface);
        }
        m.radio_links.push(RadioLinkParams::new(5_745_000));
        m.radio_links.push(RadioLinkParams::new(5_805_000));
        m
    }

    #[test]
    fn capability_requires_both_flags() {
        let mut m = two_link_model();
        assert!(!m.has_valid_capability());
        m.runtime_capability.flags.insert(CapabilityFlags::COMPUTED);
        assert!(!m.has_valid_capability());
        m.has_negotiated_links = true;
        assert!(m.has_valid_capability());
        assert!(m.strip_negotiated_capability());
        assert!(!m.has_valid_capability());
        assert!(!m.strip_negotiated_capability());
    }

    #[test]
    fn interface_to_link_mapping() {
        let mut m = two_link_model();
        assert_eq!(m.interfaces_on_link(0).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(m.interfaces_on_link(1).collect::<Vec<_>>(), vec![2]);
        m.radio_interfaces[2].assigned_link = Some(7);
        assert_eq!(m.link_of(2), None);
    }

    #[test]
    fn relay_overrides_frequency() {
        let mut m = two_link_model();
        m.relay = RelayParams {
            link: Some(1),
            frequency_khz: 2_412_000,
        };
        assert_eq!(m.effective_link_frequency(0), 5_745_000);
        assert_eq!(m.effective_link_frequency(1), 2_412_000);
    }

    #[test]
    fn ceiling_ignores_wrong_family() {
        let mut cap = RuntimeRadioCapability::default();
        cap.max_mcs_datarate[0] = Datarate::Mcs(3);
        cap.max_legacy_datarate[1] = Datarate::Mcs(3);
        assert_eq!(cap.ceiling(0, RateFamily::Mcs), Some(Datarate::Mcs(3)));
        assert_eq!(cap.ceiling(1, RateFamily::Legacy), None);
        assert_eq!(cap.ceiling(2, RateFamily::Mcs), None);
        assert_eq!(cap.ceiling(99, RateFamily::Mcs), None);
    }

    #[test]
    fn validate_clamps_video_datarate_and_relay() {
        let mut m = two_link_model();
        m.radio_links[0].tx_video_datarate = Datarate::Mcs(5);
        m.radio_links[0].tx_radio_flags = RadioFlags::DATARATE_MCS;
        m.relay.link = Some(4);
        m.has_negotiated_links = true;
        m.runtime_capability.flags.insert(CapabilityFlags::COMPUTED);
        m.runtime_capability.max_mcs_datarate[0] = Datarate::Mcs(4);
        m.runtime_capability.max_mcs_datarate[1] = Datarate::Mcs(2);

        assert!(m.validate_radio_settings());
        assert_eq!(m.radio_links[0].tx_video_datarate, Datarate::Mcs(2));
        assert!(m.radio_links[0].tx_radio_flags.contains(RadioFlags::FRAME_TYPE_DATA));
        assert_eq!(m.relay.link, None);
        assert!(!m.validate_radio_settings());
    }

    #[test]
    fn active_profile_falls_back_to_preset() {
        let mut m = Model::default();
        m.video.profiles.clear();
        m.video.current_profile = VideoProfileKind::LongRange;
        assert_eq!(m.active_profile(), VideoProfile::preset(VideoProfileKind::LongRange));
        m.active_profile_mut().max_dr_boost = 4;
        assert_eq!(m.active_profile().max_dr_boost, 4);
    }
}
