//! # Vehicle link owner
//!
//! Owns the model and the three link components, dispatches inbound
//! packets by type and drives their periodic work from one thread.

use bytes::Bytes;
use skylink_common::model::{Model, RadioLinkParams};
use skylink_common::profiles::VideoProfileKind;
use skylink_wire::adaptive::{AdaptiveVideoAck, AdaptiveVideoParams};
use skylink_wire::header::split_packet;
use skylink_wire::PacketType;
use tracing::{debug, info, warn};

use crate::adaptive::{AdaptiveVideoController, RequestOutcome};
use crate::ipc::ModelNotifier;
use crate::link_manager::RadioLinkManager;
use crate::negotiation::{NegotiationContext, NegotiationEngine};
use crate::pipeline::VideoPipeline;
use crate::registry::PacketSink;
use crate::store::ModelStore;

pub struct VehicleLink {
    model: Model,
    radio: RadioLinkManager,
    negotiation: NegotiationEngine,
    adaptive: AdaptiveVideoController,
    video: Box<dyn VideoPipeline>,
    store: Box<dyn ModelStore>,
    notifier: Box<dyn ModelNotifier>,
}

impl VehicleLink {
    pub fn new(
        model: Model,
        radio: RadioLinkManager,
        negotiation: NegotiationEngine,
        adaptive: AdaptiveVideoController,
        video: Box<dyn VideoPipeline>,
        store: Box<dyn ModelStore>,
        notifier: Box<dyn ModelNotifier>,
    ) -> Self {
        Self {
            model,
            radio,
            negotiation,
            adaptive,
            video,
            store,
            notifier,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn radio(&self) -> &RadioLinkManager {
        &self.radio
    }

    pub fn negotiation(&self) -> &NegotiationEngine {
        &self.negotiation
    }

    pub fn adaptive(&self) -> &AdaptiveVideoController {
        &self.adaptive
    }

    /// Resume adaptive state from a previous process, then bring the
    /// radios up. Returns the bring-up result.
    pub fn start(&mut self) -> bool {
        if self.adaptive.load_state(&self.model) {
            self.adaptive.reapply(&self.model, self.video.as_mut());
        }
        self.restart_radio()
    }

    fn restart_radio(&mut self) -> bool {
        let ok = self.radio.restart(false, &mut self.model, self.notifier.as_mut());
        if self.radio.last_configure().model_changed {
            self.save_model();
        }
        if !ok {
            warn!("radio bring-up failed");
        }
        ok
    }

    /// Coalesced: the restart runs on the next [`Self::periodic_loop`].
    pub fn request_radio_restart(&mut self) {
        self.radio.restart(true, &mut self.model, self.notifier.as_mut());
    }

    fn save_model(&mut self) {
        if let Err(e) = self.store.save(&self.model) {
            warn!(error = %e, "failed to persist model");
        }
    }

    // ─── Inbound ────────────────────────────────────────────────────────

    pub fn on_packet(&mut self, packet: &[u8]) {
        let (header, body) = match split_packet(packet) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(error = %e, len = packet.len(), "dropping undecodable packet");
                return;
            }
        };

        match header.packet_type {
            PacketType::NegotiateRadioLinks => {
                let mut ctx = NegotiationContext {
                    model: &mut self.model,
                    radio: &mut self.radio,
                    video: self.video.as_mut(),
                    adaptive: &mut self.adaptive,
                    store: self.store.as_mut(),
                    notifier: self.notifier.as_mut(),
                };
                self.negotiation.handle_message(packet, &header, body, &mut ctx);
                self.radio.refresh_tx_routes(&self.model);
            }
            PacketType::AdaptiveVideoParams => {
                let params = match AdaptiveVideoParams::decode(body) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "malformed adaptive video message");
                        return;
                    }
                };
                let outcome = self.adaptive.handle_message(
                    &params,
                    &self.model,
                    self.video.as_mut(),
                    &mut self.negotiation,
                );
                if outcome == RequestOutcome::Duplicate {
                    debug!(request_id = params.request_id, "re-acknowledging adaptive request");
                }
                let ack = AdaptiveVideoAck {
                    request_id: params.request_id,
                    flags: params.flags,
                }
                .to_packet(self.model.vehicle_id, header.source_id);
                self.radio.send_packet(ack);
            }
            PacketType::AdaptiveVideoAck => {
                debug!("ignoring adaptive video ack on vehicle");
            }
        }
    }

    // ─── Periodic ───────────────────────────────────────────────────────

    pub fn periodic_loop(&mut self) {
        if self.radio.restart_requested() {
            self.restart_radio();
        }

        let mut ctx = NegotiationContext {
            model: &mut self.model,
            radio: &mut self.radio,
            video: self.video.as_mut(),
            adaptive: &mut self.adaptive,
            store: self.store.as_mut(),
            notifier: self.notifier.as_mut(),
        };
        self.negotiation.periodic(&mut ctx);
        self.adaptive.periodic(&self.model, self.video.as_mut());
    }

    // ─── Local changes ──────────────────────────────────────────────────

    pub fn send_data_packet(&mut self, packet: Bytes) -> usize {
        self.radio.send_data_packet(packet)
    }

    /// Apply new parameters to one link in place and persist them.
    pub fn apply_link_settings(&mut self, link: usize, new: RadioLinkParams) -> bool {
        let Some(old) = self.model.radio_links.get(link).cloned() else {
            warn!(link, "no such radio link");
            return false;
        };
        let ok = self.radio.apply_settings(link, &old, &new, &mut self.model);
        self.save_model();
        ok
    }

    pub fn change_video_profile(&mut self, kind: VideoProfileKind) {
        if self.model.video.current_profile == kind {
            return;
        }
        let old = self.model.active_profile();
        self.model.video.current_profile = kind;
        info!(from = ?old.kind, to = ?kind, "switching video profile");
        self.adaptive
            .on_video_profile_changed(&old, &self.model, self.video.as_mut());
        self.save_model();
    }

    pub fn shutdown(&mut self) {
        info!("vehicle link shutting down");
        self.radio.close_rxtx();
        self.adaptive.save_state();
    }
}
