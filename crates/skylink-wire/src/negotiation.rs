//! # Link Negotiation Messages
//!
//! Body layout (after the packet header):
//!
//! ```text
//! +------------+---------+---------------------------------------------+
//! | test index | command | command payload                             |
//! +------------+---------+---------------------------------------------+
//!
//! TEST_PARAMS   interface u8 | datarate i32 | radio flags u32 | tx mW i32
//! APPLY_PARAMS  iface flags u32[N] | link tx flags u32[N] | link rx flags u32[N]
//!               | RuntimeRadioCapability
//! END_TESTS     canceled u8
//! KEEP_ALIVE    (empty)
//! ```
//!
//! `N` is [`MAX_RADIO_INTERFACES`]. APPLY_PARAMS is checked against its
//! exact size; every other command accepts trailing bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use skylink_common::datarate::Datarate;
use skylink_common::flags::{CapabilityFlags, RadioFlags};
use skylink_common::model::RuntimeRadioCapability;
use skylink_common::MAX_RADIO_INTERFACES;

use crate::error::{need, WireError};
use crate::header::{build_packet, PacketType};

/// Test index + command byte.
pub const BODY_PREFIX_LEN: usize = 2;

/// TEST_PARAMS payload size.
pub const TEST_PARAMS_LEN: usize = 1 + 4 + 4 + 4;

/// Exact APPLY_PARAMS body size, prefix included.
pub const APPLY_PARAMS_BODY_LEN: usize =
    BODY_PREFIX_LEN + 3 * MAX_RADIO_INTERFACES * 4 + RuntimeRadioCapability::ENCODED_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NegotiationCommand {
    TestParams = 1,
    ApplyParams = 2,
    EndTests = 3,
    KeepAlive = 4,
}

impl NegotiationCommand {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            1 => Ok(NegotiationCommand::TestParams),
            2 => Ok(NegotiationCommand::ApplyParams),
            3 => Ok(NegotiationCommand::EndTests),
            4 => Ok(NegotiationCommand::KeepAlive),
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

/// Candidate parameters under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestParams {
    pub interface_index: u8,
    pub datarate: Datarate,
    pub radio_flags: RadioFlags,
    pub tx_power_mw: i32,
}

/// Negotiated settings to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyParams {
    pub interface_flags: [RadioFlags; MAX_RADIO_INTERFACES],
    pub link_tx_flags: [RadioFlags; MAX_RADIO_INTERFACES],
    pub link_rx_flags: [RadioFlags; MAX_RADIO_INTERFACES],
    pub capability: RuntimeRadioCapability,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationPayload {
    Test(TestParams),
    Apply(Box<ApplyParams>),
    End { canceled: bool },
    KeepAlive,
}

impl NegotiationPayload {
    pub fn command(&self) -> NegotiationCommand {
        match self {
            NegotiationPayload::Test(_) => NegotiationCommand::TestParams,
            NegotiationPayload::Apply(_) => NegotiationCommand::ApplyParams,
            NegotiationPayload::End { .. } => NegotiationCommand::EndTests,
            NegotiationPayload::KeepAlive => NegotiationCommand::KeepAlive,
        }
    }
}

/// A decoded negotiation message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationMessage {
    pub test_index: u8,
    pub payload: NegotiationPayload,
}

/// Identity of a message for duplicate suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub test_index: u8,
    pub command: NegotiationCommand,
    pub tx_power_mw: i32,
}

impl NegotiationMessage {
    pub fn key(&self) -> DedupKey {
        let tx_power_mw = match &self.payload {
            NegotiationPayload::Test(t) => t.tx_power_mw,
            _ => 0,
        };
        DedupKey {
            test_index: self.test_index,
            command: self.payload.command(),
            tx_power_mw,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        need(body, BODY_PREFIX_LEN)?;
        let mut buf = body;
        let test_index = buf.get_u8();
        let command = NegotiationCommand::from_byte(buf.get_u8())?;

        let payload = match command {
            NegotiationCommand::TestParams => {
                need(buf, TEST_PARAMS_LEN)?;
                NegotiationPayload::Test(TestParams {
                    interface_index: buf.get_u8(),
                    datarate: Datarate::from_wire(buf.get_i32_le()),
                    radio_flags: RadioFlags::from_bits_retain(buf.get_u32_le()),
                    tx_power_mw: buf.get_i32_le(),
                })
            }
            NegotiationCommand::ApplyParams => {
                if body.len() != APPLY_PARAMS_BODY_LEN {
                    return Err(WireError::LengthMismatch {
                        expected: APPLY_PARAMS_BODY_LEN,
                        actual: body.len(),
                    });
                }
                let interface_flags = get_flags(&mut buf);
                let link_tx_flags = get_flags(&mut buf);
                let link_rx_flags = get_flags(&mut buf);
                let capability = decode_capability(&mut buf)?;
                NegotiationPayload::Apply(Box::new(ApplyParams {
                    interface_flags,
                    link_tx_flags,
                    link_rx_flags,
                    capability,
                }))
            }
            NegotiationCommand::EndTests => {
                need(buf, 1)?;
                NegotiationPayload::End {
                    canceled: buf.get_u8() != 0,
                }
            }
            NegotiationCommand::KeepAlive => NegotiationPayload::KeepAlive,
        };

        Ok(NegotiationMessage {
            test_index,
            payload,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.test_index);
        buf.put_u8(self.payload.command() as u8);
        match &self.payload {
            NegotiationPayload::Test(t) => {
                buf.put_u8(t.interface_index);
                buf.put_i32_le(t.datarate.to_wire());
                buf.put_u32_le(t.radio_flags.bits());
                buf.put_i32_le(t.tx_power_mw);
            }
            NegotiationPayload::Apply(a) => {
                put_flags(buf, &a.interface_flags);
                put_flags(buf, &a.link_tx_flags);
                put_flags(buf, &a.link_rx_flags);
                encode_capability(&a.capability, buf);
            }
            NegotiationPayload::End { canceled } => buf.put_u8(*canceled as u8),
            NegotiationPayload::KeepAlive => {}
        }
    }

    /// Encode as a complete packet.
    pub fn to_packet(&self, source_id: u32, dest_id: u32) -> Bytes {
        let mut body = BytesMut::new();
        self.encode(&mut body);
        build_packet(PacketType::NegotiateRadioLinks, source_id, dest_id, &body)
    }
}

fn get_flags(buf: &mut &[u8]) -> [RadioFlags; MAX_RADIO_INTERFACES] {
    let mut out = [RadioFlags::empty(); MAX_RADIO_INTERFACES];
    for f in out.iter_mut() {
        *f = RadioFlags::from_bits_retain(buf.get_u32_le());
    }
    out
}

fn put_flags(buf: &mut BytesMut, flags: &[RadioFlags; MAX_RADIO_INTERFACES]) {
    for f in flags {
        buf.put_u32_le(f.bits());
    }
}

// ─── RuntimeRadioCapability ─────────────────────────────────────────────────

pub fn encode_capability(cap: &RuntimeRadioCapability, buf: &mut impl BufMut) {
    buf.put_u32_le(cap.flags.bits());
    for dr in &cap.max_legacy_datarate {
        buf.put_i32_le(dr.to_wire());
    }
    for dr in &cap.max_mcs_datarate {
        buf.put_i32_le(dr.to_wire());
    }
    for mw in &cap.max_tx_power_mw {
        buf.put_i32_le(*mw);
    }
}

pub fn decode_capability(buf: &mut &[u8]) -> Result<RuntimeRadioCapability, WireError> {
    need(buf, RuntimeRadioCapability::ENCODED_LEN)?;
    let mut cap = RuntimeRadioCapability {
        flags: CapabilityFlags::from_bits_retain(buf.get_u32_le()),
        ..RuntimeRadioCapability::default()
    };
    for dr in cap.max_legacy_datarate.iter_mut() {
        *dr = Datarate::from_wire(buf.get_i32_le());
    }
    for dr in cap.max_mcs_datarate.iter_mut() {
        *dr = Datarate::from_wire(buf.get_i32_le());
    }
    for mw in cap.max_tx_power_mw.iter_mut() {
        *mw = buf.get_i32_le();
    }
    Ok(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(msg: &NegotiationMessage) -> Vec<u8> {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        buf.to_vec()
    }

    fn apply_message() -> NegotiationMessage {
        let mut capability = RuntimeRadioCapability::default();
        capability.max_mcs_datarate[0] = Datarate::Mcs(3);
        capability.max_legacy_datarate[1] = Datarate::Legacy(24_000_000);
        NegotiationMessage {
            test_index: 9,
            payload: NegotiationPayload::Apply(Box::new(ApplyParams {
                interface_flags: [RadioFlags::FRAME_TYPE_DATA; MAX_RADIO_INTERFACES],
                link_tx_flags: [RadioFlags::DATARATE_MCS; MAX_RADIO_INTERFACES],
                link_rx_flags: [RadioFlags::DATARATE_LEGACY; MAX_RADIO_INTERFACES],
                capability,
            })),
        }
    }

    #[test]
    fn apply_body_size() {
        assert_eq!(APPLY_PARAMS_BODY_LEN, 2 + 3 * 8 * 4 + 100);
        assert_eq!(encoded(&apply_message()).len(), APPLY_PARAMS_BODY_LEN);
    }

    #[test]
    fn test_params_layout() {
        let msg = NegotiationMessage {
            test_index: 3,
            payload: NegotiationPayload::Test(TestParams {
                interface_index: 1,
                datarate: Datarate::Mcs(3),
                radio_flags: RadioFlags::DATARATE_MCS,
                tx_power_mw: 100,
            }),
        };
        let raw = encoded(&msg);
        assert_eq!(raw[..3], [3, 1, 1]);
        assert_eq!(raw[3..7], (-4i32).to_le_bytes());
        assert_eq!(NegotiationMessage::decode(&raw).unwrap(), msg);
        assert_eq!(
            msg.key(),
            DedupKey {
                test_index: 3,
                command: NegotiationCommand::TestParams,
                tx_power_mw: 100
            }
        );
    }

    #[test]
    fn apply_decodes_capability() {
        let raw = encoded(&apply_message());
        let NegotiationPayload::Apply(apply) = NegotiationMessage::decode(&raw).unwrap().payload
        else {
            panic!("expected apply");
        };
        assert_eq!(apply.capability.max_mcs_datarate[0], Datarate::Mcs(3));
        assert_eq!(apply.capability.max_legacy_datarate[1], Datarate::Legacy(24_000_000));
        assert_eq!(apply.link_rx_flags[7], RadioFlags::DATARATE_LEGACY);
    }

    #[test]
    fn apply_rejects_one_byte_short_and_long() {
        let raw = encoded(&apply_message());
        assert_eq!(
            NegotiationMessage::decode(&raw[..raw.len() - 1]),
            Err(WireError::LengthMismatch {
                expected: APPLY_PARAMS_BODY_LEN,
                actual: APPLY_PARAMS_BODY_LEN - 1
            })
        );
        let mut long = raw.clone();
        long.push(0);
        assert!(matches!(
            NegotiationMessage::decode(&long),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn end_and_keepalive() {
        let end = NegotiationMessage::decode(&[4, 3, 1]).unwrap();
        assert_eq!(end.payload, NegotiationPayload::End { canceled: true });
        let ka = NegotiationMessage::decode(&[0, 4]).unwrap();
        assert_eq!(ka.payload, NegotiationPayload::KeepAlive);
        assert_eq!(
            NegotiationMessage::decode(&[0, 3]).unwrap_err(),
            WireError::Truncated { need: 1, have: 0 }
        );
        assert_eq!(
            NegotiationMessage::decode(&[0, 42]).unwrap_err(),
            WireError::UnknownCommand(42)
        );
    }
}
