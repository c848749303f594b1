//! # Link negotiation responder
//!
//! The ground controller drives a bounded session that probes candidate
//! radio parameters per interface and finally sends the set that worked.
//! The vehicle echoes every probe so the controller can measure the round
//! trip, and commits the final set into the model's capability.
//!
//! ```text
//!   Idle ──TEST──► Testing ──APPLY──► Applying ──► Ended(Applied)
//!                    │
//!                    ├──END{canceled}──────────► Ended(Canceled)
//!                    └──silence / ceiling──────► Ended(TimedOut)
//! ```
//!
//! | Event | Effect |
//! |-------|--------|
//! | first TEST | snapshot video bitrate, force lowest, start session |
//! | TEST | store current test, echo |
//! | APPLY (exact length) | store pending commit, echo, end committing |
//! | END | echo, end (commit only if APPLY was seen, or developer mode keeps it) |
//! | KEEP_ALIVE | refresh liveness, no reply |
//! | repeat of last message | resend cached reply, no state change |
//!
//! Whatever the outcome, ending a session restores the video bitrate: the
//! value staged during the session if any, else the snapshot.

use std::thread;
use std::time::Duration;

use bytes::Bytes;
use quanta::{Clock, Instant};
use skylink_common::flags::{CapabilityFlags, RadioFlags};
use skylink_common::model::Model;
use skylink_common::MAX_RADIO_INTERFACES;
use skylink_wire::header::{mirror_reply, PacketHeader};
use skylink_wire::negotiation::{
    ApplyParams, DedupKey, NegotiationCommand, NegotiationMessage, NegotiationPayload, TestParams,
};
use skylink_wire::WireError;
use tracing::{debug, info, warn};

use crate::adaptive::{AdaptiveVideoController, BitrateHold};
use crate::ipc::{ModelChange, ModelNotifier};
use crate::pipeline::VideoPipeline;
use crate::registry::PacketSink;
use crate::store::ModelStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Sessions older than this end once the controller goes quiet for
    /// `idle_after_ceiling`.
    pub session_ceiling: Duration,
    pub idle_after_ceiling: Duration,
    /// Silence that ends a session at any age.
    pub message_timeout: Duration,
    pub keepalive_count: u8,
    pub keepalive_spacing: Duration,
    /// Pause before each echo.
    pub reply_spacing: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            session_ceiling: Duration::from_secs(120),
            idle_after_ceiling: Duration::from_secs(10),
            message_timeout: Duration::from_secs(12),
            keepalive_count: 3,
            keepalive_spacing: Duration::from_millis(2),
            reply_spacing: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Testing,
    Applying,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Applied,
    /// Ended by the controller without a commit (or, in developer mode,
    /// canceled with the received data kept).
    Canceled,
    TimedOut,
}

/// Everything the engine touches besides its own session.
pub struct NegotiationContext<'a> {
    pub model: &'a mut Model,
    pub radio: &'a mut dyn PacketSink,
    pub video: &'a mut dyn VideoPipeline,
    pub adaptive: &'a mut AdaptiveVideoController,
    pub store: &'a mut dyn ModelStore,
    pub notifier: &'a mut dyn ModelNotifier,
}

struct NegotiationSession {
    state: SessionState,
    controller_id: u32,
    started_at: Instant,
    last_message_at: Instant,
    last_key: Option<DedupKey>,
    last_reply: Option<Bytes>,
    current_test: Option<TestParams>,
    restore_bitrate_bps: u32,
    staged_bitrate_bps: Option<u32>,
    apply_received: bool,
    pending: Option<Box<ApplyParams>>,
    tests_seen: u32,
}

pub struct NegotiationEngine {
    config: NegotiationConfig,
    clock: Clock,
    session: Option<NegotiationSession>,
    last_outcome: Option<SessionOutcome>,
    messages_processed: u64,
}

impl NegotiationEngine {
    pub fn new(config: NegotiationConfig, clock: Clock) -> Self {
        Self {
            config,
            clock,
            session: None,
            last_outcome: None,
            messages_processed: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            Some(s) => s.state,
            None if self.last_outcome.is_some() => SessionState::Ended,
            None => SessionState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn last_outcome(&self) -> Option<SessionOutcome> {
        self.last_outcome
    }

    /// Messages that changed session state (duplicates excluded).
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    pub fn current_test(&self) -> Option<TestParams> {
        self.session.as_ref().and_then(|s| s.current_test)
    }

    pub fn staged_bitrate_bps(&self) -> Option<u32> {
        self.session.as_ref().and_then(|s| s.staged_bitrate_bps)
    }

    // ─── Inbound ────────────────────────────────────────────────────────

    /// Handle one negotiation packet (header included).
    pub fn handle_message(
        &mut self,
        packet: &[u8],
        header: &PacketHeader,
        body: &[u8],
        ctx: &mut NegotiationContext<'_>,
    ) {
        let msg = match NegotiationMessage::decode(body) {
            Ok(msg) => msg,
            Err(e @ WireError::LengthMismatch { .. }) => {
                warn!(error = %e, "negotiation apply payload has wrong length, ignoring");
                return;
            }
            Err(e) => {
                warn!(error = %e, "malformed negotiation message, ignoring");
                return;
            }
        };
        let key = msg.key();
        let now = self.clock.now();

        if let Some(session) = self.session.as_mut() {
            if session.last_key == Some(key) {
                session.last_message_at = now;
                debug!(
                    test_index = key.test_index,
                    command = ?key.command,
                    "duplicate negotiation message"
                );
                if key.command != NegotiationCommand::KeepAlive {
                    if let Some(reply) = session.last_reply.clone() {
                        send_reply(self.config.reply_spacing, reply, ctx);
                    }
                }
                return;
            }
        }

        let reply = match key.command {
            NegotiationCommand::KeepAlive => None,
            _ => match mirror_reply(packet, ctx.model.vehicle_id) {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!(error = %e, "cannot mirror negotiation message");
                    return;
                }
            },
        };

        match msg.payload {
            NegotiationPayload::Test(test) => {
                self.on_test(test, msg.test_index, header.source_id, now, ctx)
            }
            NegotiationPayload::Apply(apply) => {
                if let Some(reply) = reply.clone() {
                    send_reply(self.config.reply_spacing, reply, ctx);
                }
                self.on_apply(apply, ctx);
                self.messages_processed += 1;
                return;
            }
            NegotiationPayload::End { canceled } => {
                if let Some(reply) = reply.clone() {
                    send_reply(self.config.reply_spacing, reply, ctx);
                }
                self.on_end(canceled, ctx);
                self.messages_processed += 1;
                return;
            }
            NegotiationPayload::KeepAlive => {
                if let Some(session) = self.session.as_mut() {
                    session.last_message_at = now;
                }
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.last_message_at = now;
            session.last_key = Some(key);
            if reply.is_some() {
                session.last_reply = reply.clone();
            }
        }
        self.messages_processed += 1;
        if let Some(reply) = reply {
            send_reply(self.config.reply_spacing, reply, ctx);
        }
    }

    fn on_test(
        &mut self,
        mut test: TestParams,
        test_index: u8,
        controller_id: u32,
        now: Instant,
        ctx: &mut NegotiationContext<'_>,
    ) {
        if self.session.is_none() {
            let restore = ctx.adaptive.current_bitrate_bps(ctx.model);
            let lowest = ctx.model.active_profile().min_bitrate_bps;
            info!(restore_bps = restore, lowest_bps = lowest, "negotiation session started");
            ctx.adaptive.apply_bitrate_now(lowest, ctx.model, ctx.video);
            self.session = Some(NegotiationSession {
                state: SessionState::Testing,
                controller_id,
                started_at: now,
                last_message_at: now,
                last_key: None,
                last_reply: None,
                current_test: None,
                restore_bitrate_bps: restore,
                staged_bitrate_bps: None,
                apply_received: false,
                pending: None,
                tests_seen: 0,
            });
        }

        test.radio_flags.insert(RadioFlags::FRAME_TYPE_DATA);
        if let Some(session) = self.session.as_mut() {
            session.controller_id = controller_id;
            session.current_test = Some(test);
            session.tests_seen += 1;
        }
        debug!(
            test_index,
            iface = test.interface_index,
            datarate = %test.datarate,
            tx_power_mw = test.tx_power_mw,
            "negotiation test"
        );
    }

    fn on_apply(&mut self, apply: Box<ApplyParams>, ctx: &mut NegotiationContext<'_>) {
        let Some(session) = self.session.as_mut() else {
            warn!("negotiation apply without an active session, ignoring");
            return;
        };
        session.state = SessionState::Applying;
        session.apply_received = true;
        session.pending = Some(apply);
        info!(tests = session.tests_seen, "negotiation apply received");
        self.end_session(SessionOutcome::Applied, ctx);
    }

    fn on_end(&mut self, canceled: bool, ctx: &mut NegotiationContext<'_>) {
        let Some(session) = self.session.as_ref() else {
            debug!(canceled, "negotiation end without an active session");
            return;
        };
        let outcome = if canceled {
            SessionOutcome::Canceled
        } else if session.apply_received {
            SessionOutcome::Applied
        } else {
            info!("negotiation ended without apply data, nothing to commit");
            SessionOutcome::Canceled
        };
        self.end_session(outcome, ctx);
    }

    // ─── Session end ────────────────────────────────────────────────────

    fn end_session(&mut self, outcome: SessionOutcome, ctx: &mut NegotiationContext<'_>) {
        let Some(session) = self.session.take() else { return };

        let developer_keep = outcome == SessionOutcome::Canceled && ctx.model.developer_mode;
        let keep = outcome == SessionOutcome::Applied || developer_keep;
        match session.pending.as_deref() {
            Some(pending) if keep => commit(pending, ctx),
            None if developer_keep => {
                info!(
                    tests = session.tests_seen,
                    "developer mode, keeping capability of canceled session"
                );
                if let Err(e) = ctx.store.save(ctx.model) {
                    warn!(error = %e, "failed to persist model");
                }
            }
            _ => strip(ctx),
        }

        let bitrate = session.staged_bitrate_bps.unwrap_or(session.restore_bitrate_bps);
        ctx.adaptive.apply_bitrate_now(bitrate, ctx.model, ctx.video);
        info!(?outcome, restored_bps = bitrate, "negotiation session ended");
        self.last_outcome = Some(outcome);
    }

    // ─── Periodic ───────────────────────────────────────────────────────

    /// Timeout checks, then keepalives for camera-less vehicles.
    pub fn periodic(&mut self, ctx: &mut NegotiationContext<'_>) {
        let Some(session) = self.session.as_ref() else { return };
        let now = self.clock.now();
        let age = now.duration_since(session.started_at);
        let silence = now.duration_since(session.last_message_at);

        let ceiling_hit =
            age > self.config.session_ceiling && silence > self.config.idle_after_ceiling;
        if ceiling_hit || silence > self.config.message_timeout {
            warn!(
                age_ms = age.as_millis() as u64,
                silence_ms = silence.as_millis() as u64,
                "negotiation session timed out"
            );
            self.end_session(SessionOutcome::TimedOut, ctx);
            return;
        }

        if !ctx.model.has_camera {
            let test_index = session.last_key.map_or(0, |k| k.test_index);
            let packet = NegotiationMessage {
                test_index,
                payload: NegotiationPayload::KeepAlive,
            }
            .to_packet(ctx.model.vehicle_id, session.controller_id);
            for i in 0..self.config.keepalive_count {
                if i > 0 && !self.config.keepalive_spacing.is_zero() {
                    thread::sleep(self.config.keepalive_spacing);
                }
                ctx.radio.send_packet(packet.clone());
            }
        }
    }
}

fn send_reply(spacing: Duration, reply: Bytes, ctx: &mut NegotiationContext<'_>) {
    if !spacing.is_zero() {
        thread::sleep(spacing);
    }
    if ctx.radio.send_packet(reply) == 0 {
        debug!("negotiation reply reached no interface");
    }
}

impl BitrateHold for NegotiationEngine {
    fn holds_video_bitrate(&self) -> bool {
        self.is_active()
    }

    fn stage_video_bitrate(&mut self, bitrate_bps: u32) {
        if let Some(session) = self.session.as_mut() {
            session.staged_bitrate_bps = Some(bitrate_bps);
        }
    }
}

fn commit(pending: &ApplyParams, ctx: &mut NegotiationContext<'_>) {
    let model = &mut *ctx.model;
    model.runtime_capability = pending.capability;
    model.runtime_capability.flags.insert(CapabilityFlags::COMPUTED);

    let interfaces = model.radio_interfaces.iter_mut().enumerate();
    for (iface, params) in interfaces.take(MAX_RADIO_INTERFACES) {
        params.supported_radio_flags =
            pending.interface_flags[iface].with(RadioFlags::FRAME_TYPE_DATA);
        let power = pending.capability.max_tx_power_mw[iface];
        if power > 0 {
            params.tx_power_mw = power;
        }
    }
    for (link, params) in model.radio_links.iter_mut().enumerate().take(MAX_RADIO_INTERFACES) {
        params.tx_radio_flags = pending.link_tx_flags[link];
        params.rx_radio_flags = pending.link_rx_flags[link];
    }
    model.has_negotiated_links = true;
    model.validate_radio_settings();
    info!(
        interfaces = model.radio_interfaces.len(),
        links = model.radio_links.len(),
        "negotiated capability committed"
    );

    if let Err(e) = ctx.store.save(model) {
        warn!(error = %e, "failed to persist negotiated model");
    }
    ctx.notifier.notify_model_changed(ModelChange::NegotiatedCapability);
}

fn strip(ctx: &mut NegotiationContext<'_>) {
    if !ctx.model.strip_negotiated_capability() {
        return;
    }
    info!("negotiated capability stripped");
    if let Err(e) = ctx.store.save(ctx.model) {
        warn!(error = %e, "failed to persist model");
    }
    ctx.notifier.notify_model_changed(ModelChange::NegotiatedCapability);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::AdaptiveConfig;
    use crate::store::MemoryModelStore;
    use crate::test_util::{
        negotiated_model, two_link_model, RecordingNotifier, RecordingPipeline, RecordingSink,
    };
    use skylink_common::datarate::Datarate;
    use skylink_wire::header::split_packet;
    use std::sync::Arc;

    const CONTROLLER: u32 = 0xC0;

    struct Harness {
        engine: NegotiationEngine,
        mock: Arc<quanta::Mock>,
        model: Model,
        sink: RecordingSink,
        video: RecordingPipeline,
        adaptive: AdaptiveVideoController,
        store: MemoryModelStore,
        notifier: RecordingNotifier,
    }

    impl Harness {
        fn new(model: Model) -> Self {
            let (clock, mock) = Clock::mock();
            let adaptive = AdaptiveVideoController::new(
                AdaptiveConfig {
                    snapshot_path: None,
                    ..AdaptiveConfig::default()
                },
                clock.clone(),
            );
            Self {
                engine: NegotiationEngine::new(NegotiationConfig::default(), clock),
                mock,
                model,
                sink: RecordingSink::default(),
                video: RecordingPipeline::default(),
                adaptive,
                store: MemoryModelStore::default(),
                notifier: RecordingNotifier::default(),
            }
        }

        fn feed(&mut self, msg: &NegotiationMessage) {
            let packet = msg.to_packet(CONTROLLER, self.model.vehicle_id);
            let (header, body) = split_packet(&packet).unwrap();
            let mut ctx = NegotiationContext {
                model: &mut self.model,
                radio: &mut self.sink,
                video: &mut self.video,
                adaptive: &mut self.adaptive,
                store: &mut self.store,
                notifier: &mut self.notifier,
            };
            self.engine.handle_message(&packet, &header, body, &mut ctx);
        }

        fn tick(&mut self) {
            let mut ctx = NegotiationContext {
                model: &mut self.model,
                radio: &mut self.sink,
                video: &mut self.video,
                adaptive: &mut self.adaptive,
                store: &mut self.store,
                notifier: &mut self.notifier,
            };
            self.engine.periodic(&mut ctx);
        }
    }

    fn test_msg(index: u8, power: i32) -> NegotiationMessage {
        NegotiationMessage {
            test_index: index,
            payload: NegotiationPayload::Test(TestParams {
                interface_index: 0,
                datarate: Datarate::Mcs(3),
                radio_flags: RadioFlags::DATARATE_MCS,
                tx_power_mw: power,
            }),
        }
    }

    fn end_msg(index: u8, canceled: bool) -> NegotiationMessage {
        NegotiationMessage {
            test_index: index,
            payload: NegotiationPayload::End { canceled },
        }
    }

    #[test]
    fn duplicate_test_echoed_twice_processed_once() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(1, 20));
        h.feed(&test_msg(1, 20));

        assert_eq!(h.engine.messages_processed(), 1);
        assert_eq!(h.sink.packets.len(), 2);
        assert_eq!(h.sink.packets[0], h.sink.packets[1]);
        let (header, _) = split_packet(&h.sink.packets[0]).unwrap();
        assert_eq!(header.dest_id, CONTROLLER);
        assert_eq!(header.source_id, h.model.vehicle_id);
        let test = h.engine.current_test().unwrap();
        assert!(test.radio_flags.contains(RadioFlags::FRAME_TYPE_DATA));
    }

    #[test]
    fn power_change_is_a_new_message() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(1, 20));
        h.feed(&test_msg(1, 40));
        assert_eq!(h.engine.messages_processed(), 2);
        assert_eq!(h.engine.current_test().unwrap().tx_power_mw, 40);
    }

    #[test]
    fn session_entry_forces_lowest_bitrate_and_exit_restores() {
        let mut h = Harness::new(two_link_model());
        h.adaptive.apply_bitrate_now(6_000_000, &h.model, &mut h.video);
        h.video.calls.clear();

        h.feed(&test_msg(1, 20));
        assert_eq!(h.video.bitrates(), vec![1_000_000]);
        h.feed(&end_msg(2, true));
        assert_eq!(h.video.bitrates(), vec![1_000_000, 6_000_000]);
        assert!(!h.engine.is_active());
    }

    #[test]
    fn cancel_strips_capability() {
        let mut h = Harness::new(negotiated_model(Datarate::Mcs(5)));
        h.feed(&test_msg(1, 20));
        h.feed(&end_msg(2, true));
        assert!(!h.model.has_negotiated_links);
        assert!(!h.model.runtime_capability.is_computed());
        assert_eq!(h.engine.last_outcome(), Some(SessionOutcome::Canceled));
        assert_eq!(h.notifier.changes, vec![ModelChange::NegotiatedCapability]);
        assert_eq!(h.store.saves, 1);
    }

    #[test]
    fn developer_cancel_keeps_capability() {
        let mut model = negotiated_model(Datarate::Mcs(5));
        model.developer_mode = true;
        let mut h = Harness::new(model);
        h.feed(&test_msg(1, 20));
        h.feed(&end_msg(2, true));
        assert!(h.model.has_valid_capability());
        assert_eq!(h.engine.last_outcome(), Some(SessionOutcome::Canceled));
        assert_eq!(h.store.saves, 1);
        assert!(h.notifier.changes.is_empty());
    }

    #[test]
    fn end_without_apply_does_not_raise_flags() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(1, 20));
        h.feed(&end_msg(2, false));
        assert!(!h.model.has_negotiated_links);
        assert!(!h.model.runtime_capability.is_computed());
        assert_eq!(h.store.saves, 0);
    }

    #[test]
    fn silence_times_out() {
        let mut h = Harness::new(negotiated_model(Datarate::Mcs(5)));
        h.feed(&test_msg(1, 20));
        h.mock.increment(Duration::from_secs(11));
        h.tick();
        assert!(h.engine.is_active());
        h.mock.increment(Duration::from_secs(2));
        h.tick();
        assert!(!h.engine.is_active());
        assert_eq!(h.engine.last_outcome(), Some(SessionOutcome::TimedOut));
        assert!(!h.model.has_valid_capability());
        assert_eq!(h.engine.state(), SessionState::Ended);
    }

    #[test]
    fn session_ceiling_needs_ten_seconds_quiet() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(0, 10));
        // Keep the controller chatty past the ceiling.
        for i in 1..=13u8 {
            h.mock.increment(Duration::from_secs(10));
            h.feed(&test_msg(i, 10));
            h.tick();
        }
        assert!(h.engine.is_active());
        h.mock.increment(Duration::from_millis(10_500));
        h.tick();
        assert_eq!(h.engine.last_outcome(), Some(SessionOutcome::TimedOut));
    }

    #[test]
    fn keepalives_only_without_camera() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(1, 20));
        h.tick();
        assert_eq!(h.sink.packets.len(), 1);

        h.model.has_camera = false;
        h.tick();
        assert_eq!(h.sink.packets.len(), 4);
        let (_, body) = split_packet(&h.sink.packets[3]).unwrap();
        let msg = NegotiationMessage::decode(body).unwrap();
        assert_eq!(msg.payload, NegotiationPayload::KeepAlive);
    }

    #[test]
    fn keepalive_gets_no_reply() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(1, 20));
        h.feed(&NegotiationMessage {
            test_index: 1,
            payload: NegotiationPayload::KeepAlive,
        });
        assert_eq!(h.sink.packets.len(), 1);
    }

    #[test]
    fn malformed_apply_leaves_state_unchanged() {
        let mut h = Harness::new(two_link_model());
        h.feed(&test_msg(1, 20));
        let processed = h.engine.messages_processed();
        let echoes = h.sink.packets.len();

        let mut body = vec![2u8, NegotiationCommand::ApplyParams as u8];
        body.resize(skylink_wire::negotiation::APPLY_PARAMS_BODY_LEN - 1, 0);
        let packet = skylink_wire::header::build_packet(
            skylink_wire::PacketType::NegotiateRadioLinks,
            CONTROLLER,
            h.model.vehicle_id,
            &body,
        );
        let (header, body) = split_packet(&packet).unwrap();
        let mut ctx = NegotiationContext {
            model: &mut h.model,
            radio: &mut h.sink,
            video: &mut h.video,
            adaptive: &mut h.adaptive,
            store: &mut h.store,
            notifier: &mut h.notifier,
        };
        h.engine.handle_message(&packet, &header, body, &mut ctx);

        assert!(h.engine.is_active());
        assert_eq!(h.engine.messages_processed(), processed);
        assert_eq!(h.sink.packets.len(), echoes);
        assert!(!h.model.has_negotiated_links);
    }
}
