//! # Adaptive video controller
//!
//! Applies the controller's adaptive-video requests (keyframe interval,
//! EC scheme, video bitrate, radio datarate boost) to the local video
//! pipeline while keeping every boosted datarate inside the negotiated
//! capability ceiling.
//!
//! ## Datarate boost
//!
//! The base video datarate of an interface is the lowest rung of its link's
//! ladder that carries the current bitrate (EC overhead included) under the
//! link's load limit. A boost shifts that rung up. A boost is only kept when
//! the capability is valid and the shifted rung stays within the
//! interface's negotiated ceiling (and, for MCS, within MCS 7); otherwise it
//! is reduced rung by rung, down to zero.
//!
//! ## Focus mode
//!
//! Profiles with the focus cue switch the encoder to monochrome while the
//! link is on its lowest rate with no boost, and back to colour a fixed
//! delay after the last adverse reading.

use std::path::PathBuf;
use std::time::Duration;

use quanta::{Clock, Instant};
use skylink_common::datarate::{Datarate, RateFamily, MAX_MCS_INDEX};
use skylink_common::flags::{InterfaceCapabilities, LinkCapabilities, ProfileFlags};
use skylink_common::model::Model;
use skylink_common::profiles::{EcScheme, VideoProfile};
use skylink_common::MAX_RADIO_INTERFACES;
use skylink_wire::adaptive::{AdaptiveFlags, AdaptiveVideoParams};
use tracing::{debug, info, warn};

use crate::pipeline::VideoPipeline;
use crate::snapshot::AdaptiveSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveConfig {
    /// `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
    pub focus_off_delay: Duration,
    pub log_interval: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            snapshot_path: Some(PathBuf::from("/tmp/skylink_adaptive.state")),
            focus_off_delay: Duration::from_secs(3),
            log_interval: Duration::from_secs(5),
        }
    }
}

/// Lets an active negotiation session hold the video bitrate.
pub trait BitrateHold {
    fn holds_video_bitrate(&self) -> bool;
    /// Remember `bitrate_bps` for when the hold is released.
    fn stage_video_bitrate(&mut self, bitrate_bps: u32);
}

/// No hold ever active.
#[derive(Debug, Default)]
pub struct NoHold;

impl BitrateHold for NoHold {
    fn holds_video_bitrate(&self) -> bool {
        false
    }

    fn stage_video_bitrate(&mut self, _bitrate_bps: u32) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FocusState {
    pub active: bool,
    pub off_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Applied,
    Duplicate,
}

/// A video-capable Wi-Fi interface and its link.
#[derive(Debug, Clone, Copy)]
struct VideoPath {
    iface: usize,
    link: usize,
}

pub struct AdaptiveVideoController {
    config: AdaptiveConfig,
    clock: Clock,
    last_request: Option<(u32, AdaptiveFlags)>,
    keyframe_ms: i32,
    video_bitrate_bps: u32,
    ec_scheme: Option<EcScheme>,
    dr_boost: Option<u8>,
    interface_boost: [Option<u8>; MAX_RADIO_INTERFACES],
    on_lowest_rate: bool,
    focus: FocusState,
    last_log_at: Instant,
    requests_applied: u64,
}

impl AdaptiveVideoController {
    pub fn new(config: AdaptiveConfig, clock: Clock) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            last_request: None,
            keyframe_ms: 0,
            video_bitrate_bps: 0,
            ec_scheme: None,
            dr_boost: None,
            interface_boost: [None; MAX_RADIO_INTERFACES],
            on_lowest_rate: false,
            focus: FocusState::default(),
            last_log_at: now,
            requests_applied: 0,
        }
    }

    // ─── Introspection ──────────────────────────────────────────────────

    /// Last applied video bitrate, 0 before the first one.
    pub fn video_bitrate_bps(&self) -> u32 {
        self.video_bitrate_bps
    }

    pub fn keyframe_ms(&self) -> i32 {
        self.keyframe_ms
    }

    pub fn dr_boost(&self) -> Option<u8> {
        self.dr_boost
    }

    pub fn interface_boost(&self, iface: usize) -> Option<u8> {
        self.interface_boost.get(iface).copied().flatten()
    }

    pub fn ec_scheme(&self) -> Option<EcScheme> {
        self.ec_scheme
    }

    pub fn on_lowest_rate(&self) -> bool {
        self.on_lowest_rate
    }

    pub fn focus(&self) -> FocusState {
        self.focus
    }

    pub fn requests_applied(&self) -> u64 {
        self.requests_applied
    }

    /// Bitrate to fall back to when no request has been applied yet.
    pub fn current_bitrate_bps(&self, model: &Model) -> u32 {
        if self.video_bitrate_bps != 0 {
            self.video_bitrate_bps
        } else {
            model.active_profile().bitrate_bps
        }
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Apply one adaptive-video request. A repeat of the last
    /// `(request_id, flags)` is reported as a duplicate and changes nothing.
    pub fn handle_message(
        &mut self,
        params: &AdaptiveVideoParams,
        model: &Model,
        video: &mut dyn VideoPipeline,
        hold: &mut dyn BitrateHold,
    ) -> RequestOutcome {
        let key = (params.request_id, params.flags);
        if self.last_request == Some(key) {
            debug!(request_id = params.request_id, "duplicate adaptive video request");
            return RequestOutcome::Duplicate;
        }
        self.last_request = Some(key);
        self.requests_applied += 1;

        if params.flags.contains(AdaptiveFlags::KEYFRAME) {
            self.keyframe_ms = params.keyframe_ms;
            video.set_keyframe_interval_ms(params.keyframe_ms);
            debug!(keyframe_ms = params.keyframe_ms, "keyframe interval");
        }

        if params.flags.contains(AdaptiveFlags::EC) {
            self.ec_scheme = EcScheme::from_wire(params.ec_scheme);
            video.set_ec_override(self.ec_scheme);
            debug!(scheme = ?self.ec_scheme, "EC scheme");
            self.check_current_dr_boost_rate(model);
        }

        if params.flags.contains(AdaptiveFlags::BITRATE) {
            self.request_bitrate(params.video_bitrate_bps, model, video, hold);
        }

        if params.flags.contains(AdaptiveFlags::DR_BOOST) {
            self.set_dr_boost(params.dr_boost, model);
            self.update_focus_mode(model, video);
        }

        self.save_state();
        RequestOutcome::Applied
    }

    fn set_dr_boost(&mut self, requested: Option<u8>, model: &Model) {
        let profile = model.active_profile();
        let mut boost = requested.map(|b| b.min(profile.max_dr_boost));
        if boost.is_some() && !model.has_valid_capability() {
            info!("no negotiated capability, datarate boost left unset");
            boost = None;
        }
        if requested != boost {
            debug!(
                ?requested,
                applied = ?boost,
                max = profile.max_dr_boost,
                "datarate boost clamped"
            );
        }
        self.dr_boost = boost;
        self.interface_boost = [boost; MAX_RADIO_INTERFACES];
        self.check_current_dr_boost_rate(model);
    }

    fn request_bitrate(
        &mut self,
        requested: u32,
        model: &Model,
        video: &mut dyn VideoPipeline,
        hold: &mut dyn BitrateHold,
    ) {
        let profile = model.active_profile();
        let mut bitrate = profile.clamp_bitrate(requested);
        if let Some(max) = self.max_sustainable_bitrate(model) {
            if bitrate > max {
                debug!(bitrate, max, "bitrate above negotiated link capacity");
                bitrate = max;
            }
        }
        if hold.holds_video_bitrate() {
            info!(bitrate, "negotiation in progress, bitrate staged");
            hold.stage_video_bitrate(bitrate);
            return;
        }
        self.apply_bitrate_now(bitrate, model, video);
    }

    /// Push `bitrate_bps` to the encoder immediately, bypassing any hold.
    pub fn apply_bitrate_now(
        &mut self,
        bitrate_bps: u32,
        model: &Model,
        video: &mut dyn VideoPipeline,
    ) {
        let profile = model.active_profile();
        self.video_bitrate_bps = bitrate_bps;
        self.on_lowest_rate = self.is_on_lowest_rate(model, &profile);

        let mut delta = profile.ip_quantization_delta;
        if self.on_lowest_rate && profile.flags.contains(ProfileFlags::LOWER_QP_ON_LOW_LINK) {
            let steps = if profile.flags.contains(ProfileFlags::LOWER_QP_STRONG) { 2 } else { 1 };
            delta = delta.saturating_sub(steps);
        }
        video.set_bitrate(bitrate_bps, delta);
        debug!(bitrate_bps, delta, lowest = self.on_lowest_rate, "video bitrate applied");

        self.check_current_dr_boost_rate(model);
        self.update_focus_mode(model, video);
        self.save_state();
    }

    // ─── Datarate math ──────────────────────────────────────────────────

    fn video_paths(model: &Model) -> Vec<VideoPath> {
        (0..model.radio_interfaces.len())
            .filter_map(|iface| {
                let params = &model.radio_interfaces[iface];
                let caps = params.capabilities;
                if !params.kind.is_wifi()
                    || caps.is_disabled()
                    || !caps.contains(InterfaceCapabilities::USE_FOR_VIDEO)
                    || !caps.contains(InterfaceCapabilities::CAN_TX)
                {
                    return None;
                }
                let link = model.link_of(iface)?;
                let lp = &model.radio_links[link];
                (lp.is_enabled() && lp.capabilities.contains(LinkCapabilities::CAN_TX))
                    .then_some(VideoPath { iface, link })
            })
            .collect()
    }

    fn ec(&self, model: &Model) -> EcScheme {
        self.ec_scheme.unwrap_or(model.active_profile().ec)
    }

    /// Unboosted datarate `bitrate_bps` needs on `link`.
    fn required_datarate(&self, model: &Model, link: usize, bitrate_bps: u32) -> Datarate {
        let lp = &model.radio_links[link];
        let payload = self.ec(model).with_overhead(bitrate_bps as u64);
        lp.tx_family()
            .required_for(payload, lp.tx_radio_flags.channel_width(), lp.max_load_percent)
    }

    /// Highest video bitrate every video interface can carry at its
    /// negotiated ceiling. `None` without a valid capability.
    pub fn max_sustainable_bitrate(&self, model: &Model) -> Option<u32> {
        if !model.has_valid_capability() {
            return None;
        }
        let ec = self.ec(model);
        let mut max: Option<u64> = None;
        for path in Self::video_paths(model) {
            let lp = &model.radio_links[path.link];
            let Some(ceiling) = model.runtime_capability.ceiling(path.iface, lp.tx_family()) else {
                continue;
            };
            let Some(radio_bps) = ceiling.bitrate_bps(lp.tx_radio_flags.channel_width()) else {
                continue;
            };
            let usable = radio_bps * lp.max_load_percent.clamp(1, 100) as u64 / 100;
            let video = ec.without_overhead(usable);
            max = Some(max.map_or(video, |m| m.min(video)));
        }
        max.map(|m| m.min(u32::MAX as u64) as u32)
    }

    /// Largest boost `<= requested` that keeps `path` within its ceiling.
    fn bounded_boost(&self, model: &Model, path: VideoPath, requested: u8) -> u8 {
        if requested == 0 || !model.has_valid_capability() {
            return 0;
        }
        let lp = &model.radio_links[path.link];
        let family = lp.tx_family();
        let base = self.required_datarate(model, path.link, self.current_bitrate_bps(model));
        let Some(base_rung) = family.rung_of(base) else {
            return 0;
        };
        let Some(ceiling_rung) = model
            .runtime_capability
            .ceiling(path.iface, family)
            .and_then(|c| family.rung_of(c))
        else {
            return 0;
        };
        let mut boost = requested;
        while boost > 0 {
            let rung = base_rung + boost as usize;
            let within_ladder = rung < family.ladder_len()
                && (family != RateFamily::Mcs || rung <= MAX_MCS_INDEX as usize);
            if within_ladder && rung <= ceiling_rung {
                break;
            }
            boost -= 1;
        }
        boost
    }

    /// Reduce any per-interface boost that would push its datarate past the
    /// negotiated ceiling. Runs after every bitrate or EC change.
    pub fn check_current_dr_boost_rate(&mut self, model: &Model) {
        for path in Self::video_paths(model) {
            let Some(stored) = self.interface_boost[path.iface] else {
                continue;
            };
            let bounded = self.bounded_boost(model, path, stored);
            if bounded < stored {
                info!(
                    iface = path.iface,
                    from = stored,
                    to = bounded,
                    "datarate boost exceeds negotiated ceiling, reducing"
                );
                self.interface_boost[path.iface] = Some(bounded);
            }
        }
    }

    fn requested_boost(&self, profile: &VideoProfile, iface: usize) -> u8 {
        self.interface_boost
            .get(iface)
            .copied()
            .flatten()
            .unwrap_or(profile.default_dr_boost)
            .min(profile.max_dr_boost)
    }

    /// Boost actually in effect on `iface`: zero without a valid capability
    /// or for interfaces that do not carry video.
    pub fn effective_dr_boost(&self, model: &Model, iface: usize) -> u8 {
        if !model.has_valid_capability() {
            return 0;
        }
        let profile = model.active_profile();
        let Some(path) = Self::video_paths(model).into_iter().find(|p| p.iface == iface) else {
            return 0;
        };
        self.bounded_boost(model, path, self.requested_boost(&profile, iface))
    }

    /// Datarate the video TX path must use on `iface` for the current
    /// bitrate. `None` for interfaces that do not carry video.
    pub fn effective_video_datarate(&self, model: &Model, iface: usize) -> Option<Datarate> {
        let path = Self::video_paths(model).into_iter().find(|p| p.iface == iface)?;
        let family = model.radio_links[path.link].tx_family();
        let base = self.required_datarate(model, path.link, self.current_bitrate_bps(model));
        let boost = self.effective_dr_boost(model, iface);
        let rung = family.boosted_rung(base, boost)?;
        family.rung(rung).or(Some(base))
    }

    fn effective_global_boost(&self, model: &Model, profile: &VideoProfile) -> u8 {
        if !model.has_valid_capability() {
            return 0;
        }
        Self::video_paths(model)
            .into_iter()
            .map(|p| self.bounded_boost(model, p, self.requested_boost(profile, p.iface)))
            .max()
            .unwrap_or(0)
    }

    fn is_on_lowest_rate(&self, model: &Model, profile: &VideoProfile) -> bool {
        let threshold = usize::from(profile.flags.contains(ProfileFlags::ADAPTIVE_MEDIUM_ONLY));
        Self::video_paths(model).into_iter().any(|p| {
            let family = model.radio_links[p.link].tx_family();
            let dr = self.required_datarate(model, p.link, self.video_bitrate_bps);
            family.rung_of(dr).is_some_and(|r| r <= threshold)
        })
    }

    // ─── Focus mode ─────────────────────────────────────────────────────

    fn update_focus_mode(&mut self, model: &Model, video: &mut dyn VideoPipeline) {
        let profile = model.active_profile();
        if !profile.flags.contains(ProfileFlags::FOCUS_MODE_CUE) {
            if self.focus.active {
                video.set_focus_mode(false);
            }
            self.focus = FocusState::default();
            return;
        }

        if self.link_limited(model, &profile) {
            if !self.focus.active {
                info!("link limited, focus mode on");
                video.set_focus_mode(true);
                self.focus.active = true;
            }
            self.focus.off_at = None;
        } else if self.focus.active && self.focus.off_at.is_none() {
            self.focus.off_at = Some(self.clock.now() + self.config.focus_off_delay);
        }
    }

    /// Lowest usable rate with no boost in effect.
    fn link_limited(&self, model: &Model, profile: &VideoProfile) -> bool {
        self.on_lowest_rate && self.effective_global_boost(model, profile) == 0
    }

    // ─── Profile changes ────────────────────────────────────────────────

    /// Re-fit the adaptive state to the newly active profile.
    ///
    /// A change of adaptivity between profiles would warrant a full reset;
    /// it is still handled inline: boosts are re-clamped, the boost
    /// correction is rerun and the current bitrate is re-pushed within the
    /// new profile's envelope.
    pub fn on_video_profile_changed(
        &mut self,
        old: &VideoProfile,
        model: &Model,
        video: &mut dyn VideoPipeline,
    ) {
        let new = model.active_profile();
        let reset_needed = old.is_adaptive() != new.is_adaptive()
            || old.flags.contains(ProfileFlags::ADAPTIVE_MEDIUM_ONLY)
                != new.flags.contains(ProfileFlags::ADAPTIVE_MEDIUM_ONLY);
        info!(from = ?old.kind, to = ?new.kind, reset_needed, "video profile changed");

        let clamp = |b: Option<u8>| b.map(|v| v.min(new.max_dr_boost));
        self.dr_boost = clamp(self.dr_boost);
        for slot in self.interface_boost.iter_mut() {
            *slot = clamp(*slot);
        }
        self.check_current_dr_boost_rate(model);

        if self.video_bitrate_bps != 0 {
            self.apply_bitrate_now(new.clamp_bitrate(self.video_bitrate_bps), model, video);
        } else {
            self.update_focus_mode(model, video);
            self.save_state();
        }
    }

    // ─── Periodic ───────────────────────────────────────────────────────

    pub fn periodic(&mut self, model: &Model, video: &mut dyn VideoPipeline) {
        let now = self.clock.now();
        if self.focus.active && self.focus.off_at.is_some_and(|t| now >= t) {
            if self.link_limited(model, &model.active_profile()) {
                self.focus.off_at = None;
            } else {
                info!("link recovered, focus mode off");
                video.set_focus_mode(false);
                self.focus = FocusState::default();
            }
        }

        if now.duration_since(self.last_log_at) >= self.config.log_interval {
            self.last_log_at = now;
            let profile = model.active_profile();
            info!(
                current_bps = self.video_bitrate_bps,
                target_bps = profile.bitrate_bps,
                boost = ?self.dr_boost,
                lowest = self.on_lowest_rate,
                "adaptive video"
            );
        }
    }

    // ─── Persistence ────────────────────────────────────────────────────

    fn snapshot(&self) -> AdaptiveSnapshot {
        AdaptiveSnapshot {
            keyframe_ms: self.keyframe_ms,
            bitrate_bps: self.video_bitrate_bps,
            dr_boost: self.dr_boost,
            interface_boost: self.interface_boost,
        }
    }

    pub fn save_state(&self) {
        let Some(path) = &self.config.snapshot_path else { return };
        if let Err(e) = self.snapshot().write(path) {
            warn!(path = %path.display(), error = %e, "failed to save adaptive video state");
        }
    }

    /// Restore from the snapshot file, deleting it. Boosts are dropped when
    /// the capability is not valid. Returns whether a snapshot was loaded.
    pub fn load_state(&mut self, model: &Model) -> bool {
        let Some(path) = self.config.snapshot_path.clone() else {
            return false;
        };
        let snap = match AdaptiveSnapshot::take(&path) {
            Ok(Some(snap)) => snap,
            Ok(None) => return false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding adaptive video state");
                return false;
            }
        };
        self.keyframe_ms = snap.keyframe_ms;
        self.video_bitrate_bps = snap.bitrate_bps;
        if model.has_valid_capability() {
            self.dr_boost = snap.dr_boost;
            self.interface_boost = snap.interface_boost;
        } else {
            self.dr_boost = None;
            self.interface_boost = [None; MAX_RADIO_INTERFACES];
        }
        info!(
            keyframe_ms = self.keyframe_ms,
            bitrate_bps = self.video_bitrate_bps,
            boost = ?self.dr_boost,
            "adaptive video state restored"
        );
        true
    }

    /// Push restored keyframe and bitrate targets to the pipeline.
    pub fn reapply(&mut self, model: &Model, video: &mut dyn VideoPipeline) {
        if self.keyframe_ms != 0 {
            video.set_keyframe_interval_ms(self.keyframe_ms);
        }
        if self.video_bitrate_bps != 0 {
            let bitrate = model.active_profile().clamp_bitrate(self.video_bitrate_bps);
            self.apply_bitrate_now(bitrate, model, video);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{negotiated_model, two_link_model, RecordingPipeline, VideoCall};
    use skylink_common::profiles::VideoProfileKind;

    fn controller() -> (AdaptiveVideoController, std::sync::Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let config = AdaptiveConfig {
            snapshot_path: None,
            ..AdaptiveConfig::default()
        };
        (AdaptiveVideoController::new(config, clock), mock)
    }

    fn request(id: u32, flags: AdaptiveFlags) -> AdaptiveVideoParams {
        AdaptiveVideoParams {
            request_id: id,
            flags,
            video_bitrate_bps: 0,
            ec_scheme: 0,
            stream_index: 0,
            radio_datarate: Datarate::Auto,
            keyframe_ms: 0,
            dr_boost: None,
        }
    }

    #[test]
    fn duplicate_request_changes_nothing() {
        let (mut ctl, _) = controller();
        let model = two_link_model();
        let mut video = RecordingPipeline::default();
        let mut req = request(7, AdaptiveFlags::KEYFRAME);
        req.keyframe_ms = 250;

        let first = ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        let second = ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(first, RequestOutcome::Applied);
        assert_eq!(second, RequestOutcome::Duplicate);
        assert_eq!(video.calls, vec![VideoCall::Keyframe(250)]);
    }

    #[test]
    fn boost_left_unset_without_capability() {
        let (mut ctl, _) = controller();
        let model = two_link_model();
        let mut video = RecordingPipeline::default();
        let mut req = request(1, AdaptiveFlags::DR_BOOST);
        req.dr_boost = Some(1);
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(ctl.dr_boost(), None);
        assert_eq!(ctl.effective_dr_boost(&model, 0), 0);
    }

    #[test]
    fn boost_clamped_to_profile_and_ceiling() {
        let (mut ctl, _) = controller();
        // MCS 3 ceiling on the video interfaces.
        let model = negotiated_model(Datarate::Mcs(3));
        let mut video = RecordingPipeline::default();

        let mut req = request(1, AdaptiveFlags::BITRATE);
        req.video_bitrate_bps = 1_000_000;
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);

        let mut req = request(2, AdaptiveFlags::DR_BOOST);
        req.dr_boost = Some(2);
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);

        // HighPerformance allows at most 2; 1 Mbps needs MCS 0, so 2 fits.
        assert_eq!(ctl.dr_boost(), Some(2));
        assert_eq!(ctl.effective_video_datarate(&model, 0), Some(Datarate::Mcs(2)));
    }

    #[test]
    fn bitrate_rise_reduces_boost_below_ceiling() {
        let (mut ctl, _) = controller();
        let model = negotiated_model(Datarate::Mcs(3));
        let mut video = RecordingPipeline::default();

        let mut req = request(1, AdaptiveFlags::BITRATE | AdaptiveFlags::DR_BOOST);
        req.video_bitrate_bps = 1_000_000;
        req.dr_boost = Some(2);
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(ctl.interface_boost(0), Some(2));

        // 12 Mbps with 12/4 EC needs MCS 3 at 20 MHz and 80 % load.
        let mut req = request(2, AdaptiveFlags::BITRATE);
        req.video_bitrate_bps = 12_000_000;
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(ctl.interface_boost(0), Some(0));
        assert_eq!(ctl.effective_video_datarate(&model, 0), Some(Datarate::Mcs(3)));
    }

    #[test]
    fn bitrate_clamped_to_profile_envelope() {
        let (mut ctl, _) = controller();
        let model = two_link_model();
        let mut video = RecordingPipeline::default();
        let mut req = request(1, AdaptiveFlags::BITRATE);
        req.video_bitrate_bps = 50_000_000;
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        let max = model.active_profile().max_bitrate_bps;
        assert_eq!(ctl.video_bitrate_bps(), max);
    }

    #[test]
    fn ec_profile_default_clears_override() {
        let (mut ctl, _) = controller();
        let model = two_link_model();
        let mut video = RecordingPipeline::default();
        let mut req = request(1, AdaptiveFlags::EC);
        req.ec_scheme = EcScheme::new(8, 2).to_wire();
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(ctl.ec_scheme(), Some(EcScheme::new(8, 2)));

        let mut req = request(2, AdaptiveFlags::EC);
        req.ec_scheme = 0xFFFF;
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(ctl.ec_scheme(), None);
        assert_eq!(video.calls.last(), Some(&VideoCall::Ec(None)));
    }

    #[test]
    fn focus_mode_holds_while_limited_and_clears_after_recovery() {
        let (mut ctl, mock) = controller();
        let mut model = two_link_model();
        model.video.current_profile = VideoProfileKind::LongRange;
        let mut video = RecordingPipeline::default();

        ctl.apply_bitrate_now(500_000, &model, &mut video);
        assert!(ctl.on_lowest_rate());
        assert!(ctl.focus().active);
        assert_eq!(ctl.focus().off_at, None);

        // No deadline runs while the link stays on its lowest rate.
        mock.increment(Duration::from_millis(3_100));
        ctl.periodic(&model, &mut video);
        assert!(ctl.focus().active);

        // 4 Mbps with 8/4 EC needs MCS 1, so the link is no longer limited.
        ctl.apply_bitrate_now(4_000_000, &model, &mut video);
        assert!(!ctl.on_lowest_rate());
        assert!(ctl.focus().off_at.is_some());

        mock.increment(Duration::from_secs(2));
        ctl.periodic(&model, &mut video);
        assert!(ctl.focus().active);

        mock.increment(Duration::from_millis(1_100));
        ctl.periodic(&model, &mut video);
        assert!(!ctl.focus().active);
        let focus_on = video.calls.iter().filter(|c| matches!(c, VideoCall::Focus(true)));
        assert_eq!(focus_on.count(), 1);
        assert_eq!(video.calls.last(), Some(&VideoCall::Focus(false)));
    }

    #[test]
    fn focus_mode_stays_on_when_link_limited_again_before_deadline() {
        let (mut ctl, mock) = controller();
        let mut model = two_link_model();
        model.video.current_profile = VideoProfileKind::LongRange;
        let mut video = RecordingPipeline::default();

        ctl.apply_bitrate_now(500_000, &model, &mut video);
        ctl.apply_bitrate_now(4_000_000, &model, &mut video);
        assert!(ctl.focus().off_at.is_some());

        mock.increment(Duration::from_secs(1));
        ctl.apply_bitrate_now(500_000, &model, &mut video);
        assert_eq!(ctl.focus().off_at, None);

        mock.increment(Duration::from_secs(5));
        ctl.periodic(&model, &mut video);
        assert!(ctl.focus().active);
        assert!(!video.calls.contains(&VideoCall::Focus(false)));
    }

    #[test]
    fn low_link_lowers_qp_delta() {
        let (mut ctl, _) = controller();
        let mut model = two_link_model();
        model.video.current_profile = VideoProfileKind::LongRange;
        let mut video = RecordingPipeline::default();
        ctl.apply_bitrate_now(500_000, &model, &mut video);
        let base = model.active_profile().ip_quantization_delta;
        assert_eq!(video.calls.first(), Some(&VideoCall::Bitrate(500_000, base - 2)));
    }

    #[test]
    fn profile_change_reclamps_boost() {
        let (mut ctl, _) = controller();
        let mut model = negotiated_model(Datarate::Mcs(7));
        let mut video = RecordingPipeline::default();
        let mut req = request(1, AdaptiveFlags::BITRATE | AdaptiveFlags::DR_BOOST);
        req.video_bitrate_bps = 8_000_000;
        req.dr_boost = Some(2);
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        assert_eq!(ctl.dr_boost(), Some(2));

        let old = model.active_profile();
        model.video.current_profile = VideoProfileKind::LongRange;
        ctl.on_video_profile_changed(&old, &model, &mut video);
        assert_eq!(ctl.dr_boost(), Some(1));
        assert_eq!(ctl.video_bitrate_bps(), model.active_profile().max_bitrate_bps);
    }

    struct Hold(Option<u32>);

    impl BitrateHold for Hold {
        fn holds_video_bitrate(&self) -> bool {
            true
        }
        fn stage_video_bitrate(&mut self, bitrate_bps: u32) {
            self.0 = Some(bitrate_bps);
        }
    }

    #[test]
    fn held_bitrate_is_staged_not_applied() {
        let (mut ctl, _) = controller();
        let model = two_link_model();
        let mut video = RecordingPipeline::default();
        let mut hold = Hold(None);
        let mut req = request(1, AdaptiveFlags::BITRATE);
        req.video_bitrate_bps = 3_000_000;
        ctl.handle_message(&req, &model, &mut video, &mut hold);
        assert_eq!(hold.0, Some(3_000_000));
        assert!(video.calls.is_empty());
        assert_eq!(ctl.video_bitrate_bps(), 0);
    }

    #[test]
    fn load_state_keeps_boosts_with_valid_capability() {
        let path = std::env::temp_dir()
            .join(format!("skylink_adaptive_boost_{}.state", std::process::id()));
        let config = AdaptiveConfig {
            snapshot_path: Some(path.clone()),
            ..AdaptiveConfig::default()
        };
        let model = negotiated_model(Datarate::Mcs(3));
        let mut video = RecordingPipeline::default();

        let (clock, _mock) = Clock::mock();
        let mut ctl = AdaptiveVideoController::new(config.clone(), clock);
        let mut req = request(1, AdaptiveFlags::BITRATE | AdaptiveFlags::DR_BOOST);
        req.video_bitrate_bps = 1_000_000;
        req.dr_boost = Some(2);
        ctl.handle_message(&req, &model, &mut video, &mut NoHold);
        ctl.save_state();

        let (clock, _mock) = Clock::mock();
        let mut restored = AdaptiveVideoController::new(config, clock);
        assert!(restored.load_state(&model));
        assert_eq!(restored.dr_boost(), Some(2));
        assert_eq!(restored.interface_boost(0), ctl.interface_boost(0));
        assert_eq!(restored.video_bitrate_bps(), 1_000_000);
        assert!(!path.exists());
    }
}
