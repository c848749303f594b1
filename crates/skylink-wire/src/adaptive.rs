//! # Adaptive Video Messages
//!
//! ```text
//! request id u32 | flags u8 | video bitrate bps u32 | ec scheme u16
//! | stream index u8 | radio datarate i32 | keyframe ms i32 | dr boost u8
//! ```
//!
//! `flags` selects which of the four dimensions the update carries; the
//! other fields are ignored by the vehicle.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use skylink_common::datarate::Datarate;
use skylink_common::flag_set;

use crate::error::{need, WireError};
use crate::header::{build_packet, PacketType};

/// Wire sentinel for an unset datarate boost.
pub const DR_BOOST_UNSET: u8 = 0xFF;

flag_set! {
    /// Sparse-update dimensions.
    AdaptiveFlags: u8 {
        const KEYFRAME = 1 << 0;
        const DR_BOOST = 1 << 1;
        const BITRATE = 1 << 2;
        const EC = 1 << 3;
    }
}

/// Adaptive video parameter update from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveVideoParams {
    pub request_id: u32,
    pub flags: AdaptiveFlags,
    pub video_bitrate_bps: u32,
    /// High byte data packets, low byte EC packets.
    pub ec_scheme: u16,
    pub stream_index: u8,
    pub radio_datarate: Datarate,
    pub keyframe_ms: i32,
    /// Requested boost in rungs; `None` on the wire sentinel.
    pub dr_boost: Option<u8>,
}

impl AdaptiveVideoParams {
    pub const ENCODED_LEN: usize = 4 + 1 + 4 + 2 + 1 + 4 + 4 + 1;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.request_id);
        buf.put_u8(self.flags.bits());
        buf.put_u32_le(self.video_bitrate_bps);
        buf.put_u16_le(self.ec_scheme);
        buf.put_u8(self.stream_index);
        buf.put_i32_le(self.radio_datarate.to_wire());
        buf.put_i32_le(self.keyframe_ms);
        buf.put_u8(self.dr_boost.unwrap_or(DR_BOOST_UNSET));
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        Ok(Self {
            request_id: buf.get_u32_le(),
            flags: AdaptiveFlags::from_bits_retain(buf.get_u8()),
            video_bitrate_bps: buf.get_u32_le(),
            ec_scheme: buf.get_u16_le(),
            stream_index: buf.get_u8(),
            radio_datarate: Datarate::from_wire(buf.get_i32_le()),
            keyframe_ms: buf.get_i32_le(),
            dr_boost: match buf.get_u8() {
                DR_BOOST_UNSET => None,
                v => Some(v),
            },
        })
    }

    pub fn to_packet(&self, source_id: u32, dest_id: u32) -> Bytes {
        let mut body = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut body);
        build_packet(PacketType::AdaptiveVideoParams, source_id, dest_id, &body)
    }
}

/// Vehicle acknowledgement of an adaptive video update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveVideoAck {
    pub request_id: u32,
    pub flags: AdaptiveFlags,
}

impl AdaptiveVideoAck {
    pub const ENCODED_LEN: usize = 5;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.request_id);
        buf.put_u8(self.flags.bits());
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        Ok(Self {
            request_id: buf.get_u32_le(),
            flags: AdaptiveFlags::from_bits_retain(buf.get_u8()),
        })
    }

    pub fn to_packet(&self, source_id: u32, dest_id: u32) -> Bytes {
        let mut body = BytesMut::with_capacity(Self::ENCODED_LEN);
        self.encode(&mut body);
        build_packet(PacketType::AdaptiveVideoAck, source_id, dest_id, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::split_packet;

    #[test]
    fn params_layout_is_21_bytes() {
        assert_eq!(AdaptiveVideoParams::ENCODED_LEN, 21);
        let p = AdaptiveVideoParams {
            request_id: 0x11223344,
            flags: AdaptiveFlags::BITRATE | AdaptiveFlags::EC,
            video_bitrate_bps: 4_000_000,
            ec_scheme: 0x0C04,
            stream_index: 0,
            radio_datarate: Datarate::Mcs(2),
            keyframe_ms: -200,
            dr_boost: None,
        };
        let mut buf = BytesMut::new();
        p.encode(&mut buf);
        assert_eq!(buf.len(), 21);
        assert_eq!(buf[4], 0b1100);
        assert_eq!(buf[20], DR_BOOST_UNSET);
        assert_eq!(AdaptiveVideoParams::decode(&buf).unwrap(), p);
    }

    #[test]
    fn params_truncated() {
        assert_eq!(
            AdaptiveVideoParams::decode(&[0u8; 20]),
            Err(WireError::Truncated { need: 21, have: 20 })
        );
    }

    #[test]
    fn ack_packet() {
        let ack = AdaptiveVideoAck {
            request_id: 77,
            flags: AdaptiveFlags::DR_BOOST,
        };
        let pkt = ack.to_packet(1, 2);
        let (h, body) = split_packet(&pkt).unwrap();
        assert_eq!(h.packet_type, PacketType::AdaptiveVideoAck);
        assert_eq!(AdaptiveVideoAck::decode(body).unwrap(), ack);
    }

    #[test]
    fn flags_contains() {
        let f = AdaptiveFlags::from_bits_retain(0b0101);
        assert!(f.contains(AdaptiveFlags::KEYFRAME));
        assert!(f.contains(AdaptiveFlags::BITRATE));
        assert!(!f.contains(AdaptiveFlags::DR_BOOST));
        assert_eq!(f.bits(), 0b0101u8);
        assert_eq!(format!("{f:?}"), "AdaptiveFlags(KEYFRAME | BITRATE)");
        assert_eq!(f.without(AdaptiveFlags::KEYFRAME), AdaptiveFlags::BITRATE);
    }
}
