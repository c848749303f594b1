//! # Radio link manager
//!
//! Maps the model's interfaces and links onto hardware: tunes every
//! interface to its link frequency, opens the RX and TX sides, and tears
//! them down again for a restart.
//!
//! ## Bring-up
//!
//! | Step | Effect |
//! |------|--------|
//! | configure | tune each interface on an enabled link, record mismatches |
//! | open RX   | every configured interface whose link and caps allow RX |
//! | open TX   | Wi-Fi writers kept inline, serial writers moved to [`TxWorker`] |
//!
//! A bring-up with no RX or no TX interface is a failure and leaves
//! everything closed.

use bytes::Bytes;
use skylink_common::band::display_khz;
use skylink_common::datarate::Datarate;
use skylink_common::flags::{InterfaceCapabilities, LinkCapabilities, RadioFlags};
use skylink_common::model::{Model, RadioKind, RadioLinkParams};
use tracing::{debug, error, info, warn};

use crate::ipc::{ModelChange, ModelNotifier};
use crate::registry::{
    PacketSink, PacketWriter, RadioError, RadioInterfaceRegistry, RadioRx, SikConfig, TxParams,
};
use crate::tx::{SerialWriter, TxSendError, TxWorker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Packets the serial TX ring holds before dropping.
    pub tx_queue_capacity: usize,
    /// SiK modems sometimes ignore the first configuration burst.
    pub sik_config_attempts: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx_queue_capacity: 256,
            sik_config_attempts: 2,
        }
    }
}

/// Hardware-side state of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceRuntime {
    pub configured: bool,
    pub frequency_mismatch: bool,
    pub current_frequency_khz: u32,
    pub open_read: bool,
    pub open_write: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureOutcome {
    pub configured: usize,
    pub mismatches: usize,
    /// The single-interface fallback rewrote the model's frequencies.
    pub model_changed: bool,
}

/// Where an outbound packet can go, resolved whenever links change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TxRoute {
    iface: usize,
    serial: bool,
    params: TxParams,
}

pub struct RadioLinkManager {
    config: RadioConfig,
    registry: Box<dyn RadioInterfaceRegistry>,
    rx: Box<dyn RadioRx>,
    interfaces: Vec<InterfaceRuntime>,
    wifi_writers: Vec<(usize, Box<dyn PacketWriter>)>,
    tx_worker: Option<TxWorker>,
    routes: Vec<TxRoute>,
    restart_requested: bool,
    bring_ups: u32,
    last_configure: ConfigureOutcome,
    packets_dropped: u64,
}

impl RadioLinkManager {
    pub fn new(
        config: RadioConfig,
        registry: Box<dyn RadioInterfaceRegistry>,
        rx: Box<dyn RadioRx>,
    ) -> Self {
        Self {
            config,
            registry,
            rx,
            interfaces: Vec::new(),
            wifi_writers: Vec::new(),
            tx_worker: None,
            routes: Vec::new(),
            restart_requested: false,
            bring_ups: 0,
            last_configure: ConfigureOutcome::default(),
            packets_dropped: 0,
        }
    }

    pub fn interface_state(&self, iface: usize) -> Option<&InterfaceRuntime> {
        self.interfaces.get(iface)
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    /// Successful synchronous restarts, including the first bring-up.
    pub fn bring_ups(&self) -> u32 {
        self.bring_ups
    }

    pub fn last_configure(&self) -> ConfigureOutcome {
        self.last_configure
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped
    }

    pub fn registry(&self) -> &dyn RadioInterfaceRegistry {
        self.registry.as_ref()
    }

    // ─── Configuration ──────────────────────────────────────────────────

    /// Tune every interface on an enabled link to that link's frequency.
    ///
    /// Disabled interfaces, interfaces whose bands cannot reach the
    /// frequency and interfaces whose hardware call fails are skipped. With
    /// exactly one interface and one link, a mismatch forces both to the
    /// interface's default frequency and the model is marked changed.
    pub fn configure_radio_interfaces_for_current_model(
        &mut self,
        model: &mut Model,
    ) -> ConfigureOutcome {
        let outcome = self.configure_pass(model, true);
        self.last_configure = outcome;
        outcome
    }

    fn configure_pass(&mut self, model: &mut Model, allow_fallback: bool) -> ConfigureOutcome {
        let mut outcome = ConfigureOutcome::default();
        self.interfaces = vec![InterfaceRuntime::default(); model.radio_interfaces.len()];

        if self.registry.interface_count() < model.radio_interfaces.len() {
            warn!(
                model = model.radio_interfaces.len(),
                hardware = self.registry.interface_count(),
                "fewer radio interfaces present than the model describes"
            );
        }

        for iface in 0..model.radio_interfaces.len() {
            if model.link_of(iface).is_none() {
                model.radio_interfaces[iface]
                    .capabilities
                    .remove(InterfaceCapabilities::USED_FOR_RELAY);
                debug!(iface, "interface not assigned to a link");
            }
        }

        for link in 0..model.radio_links.len() {
            let is_relay = model.is_relay_link(link);
            let members: Vec<usize> = model.interfaces_on_link(link).collect();
            // Members mirror the link's relay role even while it is disabled.
            for &iface in &members {
                model.radio_interfaces[iface]
                    .capabilities
                    .set(InterfaceCapabilities::USED_FOR_RELAY, is_relay);
            }
            if !model.radio_links[link].is_enabled() {
                info!(link, "radio link disabled, skipping");
                continue;
            }
            let freq = model.effective_link_frequency(link);
            for iface in members {
                if model.radio_interfaces[iface].capabilities.is_disabled() {
                    info!(iface, link, "radio interface disabled, skipping");
                    continue;
                }
                if !model.radio_interfaces[iface].supported_bands.supports_frequency(freq) {
                    warn!(
                        iface,
                        link,
                        freq = %display_khz(freq),
                        "interface does not support link frequency"
                    );
                    self.interfaces[iface].frequency_mismatch = true;
                    outcome.mismatches += 1;
                    continue;
                }
                match self.tune_interface(model, iface, link, freq) {
                    Ok(()) => {
                        self.interfaces[iface].configured = true;
                        self.interfaces[iface].current_frequency_khz = freq;
                        model.radio_interfaces[iface].current_frequency_khz = freq;
                        outcome.configured += 1;
                        info!(
                            iface,
                            link,
                            relay = is_relay,
                            freq = %display_khz(freq),
                            "interface configured"
                        );
                    }
                    Err(e) => warn!(iface, link, error = %e, "interface configuration failed"),
                }
            }
        }

        if allow_fallback
            && outcome.mismatches > 0
            && model.radio_interfaces.len() == 1
            && model.radio_links.len() == 1
        {
            let default = model.radio_interfaces[0].supported_bands.default_frequency_khz();
            warn!(
                freq = %display_khz(default),
                "single interface cannot reach its link frequency, forcing interface default"
            );
            model.radio_links[0].frequency_khz = default;
            model.radio_interfaces[0].assigned_link = Some(0);
            if model.is_relay_link(0) {
                model.relay.link = None;
            }
            let mut retry = self.configure_pass(model, false);
            retry.model_changed = true;
            return retry;
        }

        outcome
    }

    fn tune_interface(
        &mut self,
        model: &Model,
        iface: usize,
        link: usize,
        freq: u32,
    ) -> Result<(), RadioError> {
        let params = &model.radio_interfaces[iface];
        let link_params = &model.radio_links[link];
        match params.kind {
            RadioKind::Sik => {
                let config = sik_config(link_params, params.tx_power_mw, freq);
                self.configure_sik_with_retry(iface, &config)
            }
            // ELRS modules are bound off-line; nothing to push live.
            RadioKind::ElrsSerial => Ok(()),
            RadioKind::Wifi | RadioKind::WifiLegacy => {
                self.registry
                    .set_frequency(iface, freq, link_params.tx_radio_flags.channel_width())?;
                if params.tx_power_mw > 0 {
                    if let Err(e) = self.registry.set_tx_power(iface, params.tx_power_mw) {
                        let power_mw = params.tx_power_mw;
                        warn!(iface, power_mw, error = %e, "set tx power failed");
                    }
                }
                if params.kind == RadioKind::WifiLegacy {
                    self.push_legacy_datarate(iface, link_params.tx_video_datarate);
                }
                Ok(())
            }
        }
    }

    fn configure_sik_with_retry(
        &mut self,
        iface: usize,
        config: &SikConfig,
    ) -> Result<(), RadioError> {
        let attempts = self.config.sik_config_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.registry.configure_sik(iface, config) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(iface, attempt, attempts, error = %e, "SiK configuration attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or(RadioError::Hardware {
            iface,
            op: "configure_sik",
            reason: "no attempts made".into(),
        }))
    }

    fn push_legacy_datarate(&mut self, iface: usize, datarate: Datarate) {
        if let Err(e) = self.registry.set_legacy_datarate(iface, datarate) {
            warn!(iface, %datarate, error = %e, "legacy datarate change failed");
        }
    }

    // ─── Open / close ───────────────────────────────────────────────────

    fn link_allows(model: &Model, iface: usize, cap: LinkCapabilities) -> bool {
        model
            .link_of(iface)
            .map(|l| &model.radio_links[l])
            .is_some_and(|l| l.is_enabled() && l.capabilities.contains(cap))
    }

    fn rx_eligible(&self, model: &Model, iface: usize) -> bool {
        let caps = model.radio_interfaces[iface].capabilities;
        self.interfaces.get(iface).is_some_and(|rt| rt.configured)
            && !caps.is_disabled()
            && caps.contains(InterfaceCapabilities::CAN_RX)
            && caps.carries_traffic()
            && Self::link_allows(model, iface, LinkCapabilities::CAN_RX)
    }

    fn tx_eligible(&self, model: &Model, iface: usize) -> bool {
        let caps = model.radio_interfaces[iface].capabilities;
        self.interfaces.get(iface).is_some_and(|rt| rt.configured)
            && !caps.is_disabled()
            && caps.contains(InterfaceCapabilities::CAN_TX)
            && caps.carries_traffic()
            && Self::link_allows(model, iface, LinkCapabilities::CAN_TX)
    }

    /// Two passes: RX first, then TX. Returns false (with everything closed
    /// again) when either pass opens nothing.
    pub fn open_rxtx(&mut self, model: &Model) -> bool {
        let mut rx_count = 0;
        for iface in 0..model.radio_interfaces.len() {
            if !self.rx_eligible(model, iface) {
                continue;
            }
            match self.registry.open_read(iface) {
                Ok(()) => {
                    self.interfaces[iface].open_read = true;
                    rx_count += 1;
                    debug!(iface, "opened for RX");
                }
                Err(e) => warn!(iface, error = %e, "open for RX failed"),
            }
        }
        if rx_count == 0 {
            error!("no radio interface could be opened for RX");
            self.close_rxtx();
            return false;
        }

        let mut serial: Vec<SerialWriter> = Vec::new();
        let mut tx_count = 0;
        for iface in 0..model.radio_interfaces.len() {
            if !self.tx_eligible(model, iface) {
                continue;
            }
            match self.registry.open_write(iface) {
                Ok(writer) => {
                    self.interfaces[iface].open_write = true;
                    tx_count += 1;
                    if model.radio_interfaces[iface].kind.is_serial() {
                        serial.push((iface, writer));
                    } else {
                        self.wifi_writers.push((iface, writer));
                    }
                    debug!(iface, "opened for TX");
                }
                Err(e) => warn!(iface, error = %e, "open for TX failed"),
            }
        }

        if !serial.is_empty() {
            match TxWorker::start(serial, self.config.tx_queue_capacity) {
                Ok(worker) => self.tx_worker = Some(worker),
                Err(e) => {
                    error!(error = %e, "failed to spawn serial TX worker");
                    self.close_rxtx();
                    return false;
                }
            }
        }
        if tx_count == 0 {
            error!("no radio interface could be opened for TX");
            self.close_rxtx();
            return false;
        }

        self.refresh_tx_routes(model);
        info!(rx = rx_count, tx = tx_count, "radio interfaces open");
        true
    }

    /// Stops the TX worker (joining it), then closes every open endpoint.
    pub fn close_rxtx(&mut self) {
        if let Some(mut worker) = self.tx_worker.take() {
            for (iface, writer) in worker.stop() {
                drop(writer);
                self.registry.close_write(iface);
            }
        }
        for (iface, writer) in self.wifi_writers.drain(..) {
            drop(writer);
            self.registry.close_write(iface);
        }
        for iface in 0..self.interfaces.len() {
            if self.interfaces[iface].open_read {
                self.registry.close_read(iface);
            }
            self.interfaces[iface].open_read = false;
            self.interfaces[iface].open_write = false;
        }
        self.routes.clear();
    }

    /// Recompute which interfaces data packets go to, and with what
    /// per-packet radio parameters.
    pub fn refresh_tx_routes(&mut self, model: &Model) {
        self.routes.clear();
        for iface in 0..model.radio_interfaces.len() {
            let open = self.interfaces.get(iface).is_some_and(|rt| rt.open_write);
            let params = &model.radio_interfaces[iface];
            if !open || !params.capabilities.contains(InterfaceCapabilities::USE_FOR_DATA) {
                continue;
            }
            if !Self::link_allows(model, iface, LinkCapabilities::CAN_TX) {
                continue;
            }
            let Some(link) = model.link_of(iface) else { continue };
            let link = &model.radio_links[link];
            self.routes.push(TxRoute {
                iface,
                serial: params.kind.is_serial(),
                params: TxParams {
                    radio_flags: link.tx_radio_flags.with(RadioFlags::FRAME_TYPE_DATA),
                    datarate: link.tx_data_datarate,
                },
            });
        }
    }

    // ─── Restart ────────────────────────────────────────────────────────

    /// Tear down and bring the radios back up.
    ///
    /// With `asynchronous` set this only raises the restart flag; the owner
    /// performs the restart on its next periodic tick. Only successful
    /// bring-ups are counted, and every successful one after the first
    /// notifies sibling processes.
    pub fn restart(
        &mut self,
        asynchronous: bool,
        model: &mut Model,
        notifier: &mut dyn ModelNotifier,
    ) -> bool {
        if asynchronous {
            if !self.restart_requested {
                info!("radio restart requested");
            }
            self.restart_requested = true;
            return true;
        }
        self.restart_requested = false;

        self.rx.stop();
        self.close_rxtx();
        self.rx.reset_uplink_stats();
        self.configure_radio_interfaces_for_current_model(model);
        if !self.open_rxtx(model) {
            warn!(bring_ups = self.bring_ups, "radio restart failed");
            return false;
        }
        self.rx.start();

        if self.bring_ups > 0 {
            notifier.notify_model_changed(ModelChange::RadioConfiguration);
        }
        self.bring_ups += 1;
        info!(bring_ups = self.bring_ups, "radio restart complete");
        true
    }

    // ─── Live changes ───────────────────────────────────────────────────

    /// Apply a changed link parameter block without a full restart.
    ///
    /// When frequency or channel width changed, retunes every interface on
    /// the link (skipping those whose bands cannot reach it). Legacy 802.11
    /// interfaces also get the new video datarate pushed. Returns false if
    /// any interface failed.
    pub fn apply_settings(
        &mut self,
        link: usize,
        old: &RadioLinkParams,
        new: &RadioLinkParams,
        model: &mut Model,
    ) -> bool {
        let Some(slot) = model.radio_links.get_mut(link) else {
            warn!(link, "apply settings on unknown link");
            return false;
        };
        *slot = new.clone();

        let retune = old.frequency_khz != new.frequency_khz
            || old.tx_radio_flags.channel_width() != new.tx_radio_flags.channel_width();
        let datarate_changed = old.tx_video_datarate != new.tx_video_datarate;
        let freq = model.effective_link_frequency(link);
        let width = new.tx_radio_flags.channel_width();
        let members: Vec<usize> = model.interfaces_on_link(link).collect();

        let mut ok = true;
        for iface in members {
            if self.interfaces.len() <= iface {
                self.interfaces.resize(iface + 1, InterfaceRuntime::default());
            }
            let kind = model.radio_interfaces[iface].kind;
            if model.radio_interfaces[iface].capabilities.is_disabled() {
                continue;
            }
            if retune {
                if !model.radio_interfaces[iface].supported_bands.supports_frequency(freq) {
                    warn!(
                        iface,
                        link,
                        freq = %display_khz(freq),
                        "interface does not support new frequency"
                    );
                    self.interfaces[iface].frequency_mismatch = true;
                    ok = false;
                    continue;
                }
                let result = match kind {
                    RadioKind::Sik => {
                        let power = model.radio_interfaces[iface].tx_power_mw;
                        let config = sik_config(new, power, freq);
                        self.configure_sik_with_retry(iface, &config)
                    }
                    RadioKind::ElrsSerial => Ok(()),
                    RadioKind::Wifi | RadioKind::WifiLegacy => {
                        self.registry.set_frequency(iface, freq, width)
                    }
                };
                match result {
                    Ok(()) => {
                        self.interfaces[iface].frequency_mismatch = false;
                        self.interfaces[iface].current_frequency_khz = freq;
                        model.radio_interfaces[iface].current_frequency_khz = freq;
                        info!(iface, link, freq = %display_khz(freq), "interface retuned");
                    }
                    Err(e) => {
                        warn!(iface, link, error = %e, "retune failed");
                        ok = false;
                        continue;
                    }
                }
            }
            if kind == RadioKind::WifiLegacy && (retune || datarate_changed) {
                self.push_legacy_datarate(iface, new.tx_video_datarate);
            }
        }

        self.refresh_tx_routes(model);
        ok
    }

    // ─── Data path ──────────────────────────────────────────────────────

    /// Route `packet` to every TX-open interface usable for data. Wi-Fi is
    /// written inline; serial targets go through the TX worker. Returns the
    /// number of interfaces the packet was handed to.
    pub fn send_data_packet(&mut self, packet: Bytes) -> usize {
        let mut sent = 0;
        let mut serial_targets = Vec::new();
        for route in &self.routes {
            if route.serial {
                serial_targets.push((route.iface, route.params));
                continue;
            }
            let writer = self.wifi_writers.iter_mut().find(|(i, _)| *i == route.iface);
            let Some((_, writer)) = writer else {
                continue;
            };
            match writer.write_packet(&packet, &route.params) {
                Ok(()) => sent += 1,
                Err(e) => warn!(iface = route.iface, error = %e, "radio write failed"),
            }
        }

        if !serial_targets.is_empty() {
            let count = serial_targets.len();
            match self.tx_worker.as_mut().map(|w| w.try_send(serial_targets, packet)) {
                Some(Ok(())) => sent += count,
                Some(Err(TxSendError::Full)) => {
                    self.packets_dropped += 1;
                    warn!(dropped = self.packets_dropped, "serial TX queue full, dropping packet");
                }
                Some(Err(TxSendError::Disconnected)) | None => {
                    self.packets_dropped += 1;
                    warn!("serial TX worker not running, dropping packet");
                }
            }
        }
        sent
    }

    /// Total packets the serial worker has written so far.
    pub fn serial_packets_written(&self) -> u64 {
        self.tx_worker
            .as_ref()
            .map_or(0, |w| w.stats().packets_written.load(std::sync::atomic::Ordering::Relaxed))
    }
}

impl PacketSink for RadioLinkManager {
    fn send_packet(&mut self, packet: Bytes) -> usize {
        self.send_data_packet(packet)
    }
}

impl Drop for RadioLinkManager {
    fn drop(&mut self) {
        self.close_rxtx();
    }
}

fn sik_config(link: &RadioLinkParams, tx_power: i32, freq: u32) -> SikConfig {
    let air_speed_bps = match link.tx_data_datarate {
        Datarate::Legacy(bps) => bps,
        _ => SikConfig::DEFAULT_AIR_SPEED_BPS,
    };
    SikConfig {
        frequency_khz: freq,
        tx_power,
        air_speed_bps,
        ecc: link.tx_radio_flags.contains(RadioFlags::SIK_ECC),
        lbt: link.tx_radio_flags.contains(RadioFlags::SIK_LBT),
        mcs_retry: link.tx_radio_flags.contains(RadioFlags::SIK_MCSTR),
    }
}
