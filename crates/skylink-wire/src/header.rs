//! # Packet Header
//!
//! ```text
//!  0       1       2               6               10      12
//! +-------+-------+---------------+---------------+-------+----------
//! |  ver  | type  |  source id    |  dest id      |  len  |  body ...
//! +-------+-------+---------------+---------------+-------+----------
//! ```
//!
//! `len` is the total packet length including the header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{need, WireError};

/// Header format version.
pub const HEADER_VERSION: u8 = 1;

/// Header size in bytes.
pub const HEADER_LEN: usize = 12;

/// Destination id addressing every listener.
pub const BROADCAST_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Link negotiation request/reply.
    NegotiateRadioLinks = 0x31,
    /// Adaptive video parameter update from the controller.
    AdaptiveVideoParams = 0x40,
    /// Vehicle acknowledgement of an adaptive video update.
    AdaptiveVideoAck = 0x41,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0x31 => Ok(PacketType::NegotiateRadioLinks),
            0x40 => Ok(PacketType::AdaptiveVideoParams),
            0x41 => Ok(PacketType::AdaptiveVideoAck),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub source_id: u32,
    pub dest_id: u32,
    pub total_len: u16,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, source_id: u32, dest_id: u32, body_len: usize) -> Self {
        Self {
            packet_type,
            source_id,
            dest_id,
            total_len: (HEADER_LEN + body_len).min(u16::MAX as usize) as u16,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(HEADER_VERSION);
        buf.put_u8(self.packet_type as u8);
        buf.put_u32_le(self.source_id);
        buf.put_u32_le(self.dest_id);
        buf.put_u16_le(self.total_len);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        need(buf, HEADER_LEN)?;
        let version = buf.get_u8();
        if version != HEADER_VERSION {
            return Err(WireError::BadVersion(version));
        }
        let packet_type = PacketType::from_byte(buf.get_u8())?;
        Ok(Self {
            packet_type,
            source_id: buf.get_u32_le(),
            dest_id: buf.get_u32_le(),
            total_len: buf.get_u16_le(),
        })
    }
}

/// A decoded header plus the body bytes that follow it.
///
/// The body is cut to `total_len` when the buffer carries trailing bytes.
pub fn split_packet(packet: &[u8]) -> Result<(PacketHeader, &[u8]), WireError> {
    let header = PacketHeader::decode(packet)?;
    let total = header.total_len as usize;
    if total < HEADER_LEN {
        return Err(WireError::Truncated {
            need: HEADER_LEN,
            have: total,
        });
    }
    need(packet, total)?;
    Ok((header, &packet[HEADER_LEN..total]))
}

/// Build a complete packet from a header template and a body.
pub fn build_packet(packet_type: PacketType, source_id: u32, dest_id: u32, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    PacketHeader::new(packet_type, source_id, dest_id, body.len()).encode(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}

/// Mirror an inbound packet back to its sender: identical bytes, with
/// source and destination rewritten.
pub fn mirror_reply(packet: &[u8], own_id: u32) -> Result<Bytes, WireError> {
    let (header, body) = split_packet(packet)?;
    Ok(build_packet(header.packet_type, own_id, header.source_id, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let mut buf = BytesMut::new();
        PacketHeader::new(PacketType::AdaptiveVideoAck, 0x0102_0304, 7, 5).encode(&mut buf);
        assert_eq!(
            &buf[..],
            &[1, 0x41, 0x04, 0x03, 0x02, 0x01, 7, 0, 0, 0, 17, 0]
        );
    }

    #[test]
    fn rejects_unknown_type_and_version() {
        let mut raw = build_packet(PacketType::NegotiateRadioLinks, 1, 2, &[]).to_vec();
        raw[1] = 0x99;
        assert_eq!(PacketHeader::decode(&raw), Err(WireError::UnknownPacketType(0x99)));
        raw[0] = 9;
        assert_eq!(PacketHeader::decode(&raw), Err(WireError::BadVersion(9)));
    }

    #[test]
    fn split_honours_total_len() {
        let mut raw = build_packet(PacketType::NegotiateRadioLinks, 1, 2, &[5, 6, 7]).to_vec();
        raw.extend_from_slice(&[0xAA, 0xBB]);
        let (_, body) = split_packet(&raw).unwrap();
        assert_eq!(body, &[5, 6, 7]);
        assert!(split_packet(&raw[..13]).is_err());
    }

    #[test]
    fn mirror_swaps_addresses_only() {
        let raw = build_packet(PacketType::NegotiateRadioLinks, 0xC0, 0xA1, &[1, 2, 3, 4]);
        let reply = mirror_reply(&raw, 0xA1).unwrap();
        let (h, body) = split_packet(&reply).unwrap();
        assert_eq!(h.source_id, 0xA1);
        assert_eq!(h.dest_id, 0xC0);
        assert_eq!(body, &[1, 2, 3, 4]);
        assert_eq!(&reply[10..], &raw[10..]);
    }
}
