//! Model-change notifications to sibling processes.

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChange {
    /// Radio interfaces were reconfigured by a restart.
    RadioConfiguration,
    /// A negotiation session committed or stripped capability.
    NegotiatedCapability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingProcess {
    Telemetry,
    Commands,
    Rc,
}

pub trait ModelNotifier {
    fn notify_model_changed(&mut self, change: ModelChange);
}

/// Fans every change out to one bounded channel per sibling. Never blocks.
#[derive(Debug, Default)]
pub struct ChannelNotifier {
    channels: Vec<(SiblingProcess, Sender<ModelChange>)>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sibling: SiblingProcess, tx: Sender<ModelChange>) {
        self.channels.push((sibling, tx));
    }
}

impl ModelNotifier for ChannelNotifier {
    fn notify_model_changed(&mut self, change: ModelChange) {
        for (sibling, tx) in &self.channels {
            match tx.try_send(change) {
                Ok(()) => debug!(?sibling, ?change, "model change sent"),
                Err(TrySendError::Full(_)) => {
                    warn!(?sibling, ?change, "sibling channel full, dropping notification")
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!(?sibling, ?change, "sibling channel disconnected")
                }
            }
        }
    }
}
