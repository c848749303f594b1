//! Video profile presets: bitrate envelope, keyframe interval, error
//! correction and adaptive behaviour for each encoder profile.

use serde::{Deserialize, Serialize};

use crate::flags::ProfileFlags;

/// Wire sentinel meaning "use the profile's own scheme".
pub const EC_SCHEME_PROFILE_DEFAULT: u16 = 0xFFFF;

/// Ratio of data packets to error-correction packets per video block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcScheme {
    pub data_packets: u8,
    pub ec_packets: u8,
}

impl EcScheme {
    pub const fn new(data_packets: u8, ec_packets: u8) -> Self {
        Self {
            data_packets,
            ec_packets,
        }
    }

    /// Decode the packed wire form (high byte data, low byte EC). `0` and
    /// `0xFFFF` mean "profile default"; a zero data count is invalid and
    /// also resolves to the default.
    pub fn from_wire(raw: u16) -> Option<Self> {
        if raw == 0 || raw == EC_SCHEME_PROFILE_DEFAULT {
            return None;
        }
        let data_packets = (raw >> 8) as u8;
        if data_packets == 0 {
            return None;
        }
        Some(Self::new(data_packets, (raw & 0xFF) as u8))
    }

    pub fn to_wire(self) -> u16 {
        ((self.data_packets as u16) << 8) | self.ec_packets as u16
    }

    /// Radio payload rate needed to carry `video_bps` with this EC overhead.
    pub fn with_overhead(self, video_bps: u64) -> u64 {
        let data = self.data_packets.max(1) as u64;
        video_bps * (data + self.ec_packets as u64) / data
    }

    /// Video rate carried by `radio_bps` of payload after EC overhead.
    pub fn without_overhead(self, radio_bps: u64) -> u64 {
        let data = self.data_packets.max(1) as u64;
        radio_bps * data / (data + self.ec_packets as u64)
    }
}

/// Which built-in profile is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoProfileKind {
    #[default]
    HighPerformance,
    HighQuality,
    LongRange,
    User,
}

/// An encoder profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub kind: VideoProfileKind,
    pub flags: ProfileFlags,
    /// Lowest bitrate adaptive video may drop to.
    pub min_bitrate_bps: u32,
    /// Nominal bitrate when the link is healthy.
    pub bitrate_bps: u32,
    /// Hard ceiling; adaptive requests are clamped to this.
    pub max_bitrate_bps: u32,
    /// Keyframe interval in ms. Negative encodes "auto".
    pub keyframe_ms: i32,
    pub ec: EcScheme,
    /// Baseline I/P frame quantization delta.
    pub ip_quantization_delta: i8,
    /// Maximum datarate boost (rungs) the controller may request.
    pub max_dr_boost: u8,
    /// Boost used while the controller has not requested one.
    pub default_dr_boost: u8,
}

impl VideoProfile {
    pub fn preset(kind: VideoProfileKind) -> Self {
        let adaptive = ProfileFlags::ADAPTIVE_VIDEO | ProfileFlags::LOWER_QP_ON_LOW_LINK;
        match kind {
            VideoProfileKind::HighPerformance => VideoProfile {
                kind,
                flags: adaptive,
                min_bitrate_bps: 1_000_000,
                bitrate_bps: 7_000_000,
                max_bitrate_bps: 12_000_000,
                keyframe_ms: -200,
                ec: EcScheme::new(12, 4),
                ip_quantization_delta: -12,
                max_dr_boost: 2,
                default_dr_boost: 1,
            },
            VideoProfileKind::HighQuality => VideoProfile {
                kind,
                flags: adaptive | ProfileFlags::ADAPTIVE_MEDIUM_ONLY,
                min_bitrate_bps: 2_000_000,
                bitrate_bps: 10_000_000,
                max_bitrate_bps: 20_000_000,
                keyframe_ms: -500,
                ec: EcScheme::new(12, 3),
                ip_quantization_delta: -8,
                max_dr_boost: 1,
                default_dr_boost: 0,
            },
            VideoProfileKind::LongRange => VideoProfile {
                kind,
                flags: adaptive | ProfileFlags::LOWER_QP_STRONG | ProfileFlags::FOCUS_MODE_CUE,
                min_bitrate_bps: 500_000,
                bitrate_bps: 2_500_000,
                max_bitrate_bps: 5_000_000,
                keyframe_ms: -1_000,
                ec: EcScheme::new(8, 4),
                ip_quantization_delta: -16,
                max_dr_boost: 1,
                default_dr_boost: 0,
            },
            VideoProfileKind::User => VideoProfile {
                kind,
                flags: ProfileFlags::ADAPTIVE_VIDEO,
                min_bitrate_bps: 1_000_000,
                bitrate_bps: 6_000_000,
                max_bitrate_bps: 12_000_000,
                keyframe_ms: 500,
                ec: EcScheme::new(12, 2),
                ip_quantization_delta: -12,
                max_dr_boost: 3,
                default_dr_boost: 0,
            },
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.flags.contains(ProfileFlags::ADAPTIVE_VIDEO)
    }

    pub fn clamp_bitrate(&self, bps: u32) -> u32 {
        bps.clamp(self.min_bitrate_bps, self.max_bitrate_bps.max(self.min_bitrate_bps))
    }
}

/// All built-in profiles in display order.
pub fn default_profiles() -> Vec<VideoProfile> {
    [
        VideoProfileKind::HighPerformance,
        VideoProfileKind::HighQuality,
        VideoProfileKind::LongRange,
        VideoProfileKind::User,
    ]
    .into_iter()
    .map(VideoProfile::preset)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_scheme_wire_sentinels() {
        assert_eq!(EcScheme::from_wire(0), None);
        assert_eq!(EcScheme::from_wire(0xFFFF), None);
        assert_eq!(EcScheme::from_wire(0x0004), None);
        assert_eq!(EcScheme::from_wire(0x0C04), Some(EcScheme::new(12, 4)));
        assert_eq!(EcScheme::new(8, 2).to_wire(), 0x0802);
    }

    #[test]
    fn ec_overhead() {
        let ec = EcScheme::new(12, 4);
        assert_eq!(ec.with_overhead(6_000_000), 8_000_000);
        assert_eq!(ec.without_overhead(8_000_000), 6_000_000);
    }

    #[test]
    fn presets_have_sane_envelopes() {
        for p in default_profiles() {
            assert!(p.min_bitrate_bps <= p.bitrate_bps, "{:?}", p.kind);
            assert!(p.bitrate_bps <= p.max_bitrate_bps, "{:?}", p.kind);
            assert!(p.default_dr_boost <= p.max_dr_boost, "{:?}", p.kind);
        }
    }

    #[test]
    fn clamp_bitrate_to_envelope() {
        let p = VideoProfile::preset(VideoProfileKind::LongRange);
        assert_eq!(p.clamp_bitrate(100), 500_000);
        assert_eq!(p.clamp_bitrate(50_000_000), 5_000_000);
        assert_eq!(p.clamp_bitrate(3_000_000), 3_000_000);
    }
}
