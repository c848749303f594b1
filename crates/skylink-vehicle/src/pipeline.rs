//! Video pipeline seam.
//!
//! The encoder and packetiser are external; the adaptive controller only
//! pushes targets through this trait.

use skylink_common::profiles::EcScheme;
use tracing::info;

pub trait VideoPipeline {
    fn set_bitrate(&mut self, bitrate_bps: u32, ip_quantization_delta: i8);
    fn set_keyframe_interval_ms(&mut self, keyframe_ms: i32);
    /// `None` reverts to the profile's EC scheme.
    fn set_ec_override(&mut self, scheme: Option<EcScheme>);
    /// Monochrome focus mode.
    fn set_focus_mode(&mut self, monochrome: bool);
}

/// Pipeline that only logs, for benches without an encoder attached.
#[derive(Debug, Default)]
pub struct LoggingPipeline;

impl VideoPipeline for LoggingPipeline {
    fn set_bitrate(&mut self, bitrate_bps: u32, ip_quantization_delta: i8) {
        info!(bitrate_bps, ip_quantization_delta, "video bitrate");
    }

    fn set_keyframe_interval_ms(&mut self, keyframe_ms: i32) {
        info!(keyframe_ms, "video keyframe interval");
    }

    fn set_ec_override(&mut self, scheme: Option<EcScheme>) {
        info!(?scheme, "video EC override");
    }

    fn set_focus_mode(&mut self, monochrome: bool) {
        info!(monochrome, "video focus mode");
    }
}
