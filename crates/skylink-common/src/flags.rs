//! # Bit-flag sets
//!
//! Every flag set is an integer newtype whose bit positions are fixed by the
//! radio wire format. Unknown bits are retained so that a value received
//! from the controller round-trips unchanged.
//!
//! [`flag_set!`] is exported so the wire crate can declare its message
//! masks the same way.

use serde::{Deserialize, Serialize};

/// Declare a bit-flag newtype over `$repr`.
///
/// Attributes written before the name are forwarded to the struct, so
/// serde derives are opt-in per set.
#[macro_export]
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident: $repr:ty {
            $( $(#[$fmeta:meta])* const $flag:ident = $bit:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name($repr);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($bit); )*

            /// The empty set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Wrap raw bits, keeping bits that have no name.
            pub const fn from_bits_retain(bits: $repr) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            #[must_use]
            pub const fn with(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl ::core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                $(
                    if self.contains(Self::$flag) && Self::$flag.0 != 0 {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(stringify!($flag))?;
                        first = false;
                    }
                )*
                if first {
                    write!(f, "{:#x}", self.0)?;
                }
                write!(f, ")")
            }
        }
    };
}

flag_set! {
    /// Per-packet radio flags of a link direction.
    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    RadioFlags: u32 {
        /// 802.11 data frames. Always set on negotiated flags.
        const FRAME_TYPE_DATA = 1 << 0;
        const FRAME_TYPE_RTS = 1 << 1;
        /// Legacy 802.11 a/g rates.
        const DATARATE_LEGACY = 1 << 2;
        /// HT MCS rates.
        const DATARATE_MCS = 1 << 3;
        /// 40 MHz channel width (20 MHz when clear).
        const HT40 = 1 << 4;
        const STBC = 1 << 5;
        const LDPC = 1 << 6;
        const SHORT_GI = 1 << 7;
        /// SiK: golay error correction on air.
        const SIK_ECC = 1 << 8;
        /// SiK: listen-before-talk.
        const SIK_LBT = 1 << 9;
        /// SiK: manchester / retry mode.
        const SIK_MCSTR = 1 << 10;
    }
}

impl RadioFlags {
    pub fn uses_mcs(self) -> bool {
        self.contains(Self::DATARATE_MCS)
    }

    pub fn channel_width(self) -> ChannelWidth {
        if self.contains(Self::HT40) {
            ChannelWidth::Mhz40
        } else {
            ChannelWidth::Mhz20
        }
    }
}

/// Radio channel width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelWidth {
    Mhz20,
    Mhz40,
}

flag_set! {
    /// User-configured capabilities of a physical radio interface.
    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    InterfaceCapabilities: u32 {
        const CAN_RX = 1 << 0;
        const CAN_TX = 1 << 1;
        const USE_FOR_VIDEO = 1 << 2;
        const USE_FOR_DATA = 1 << 3;
        const DISABLED = 1 << 4;
        const HIGH_CAPACITY = 1 << 5;
        /// Mirrors the relay role of the link the interface is assigned to.
        const USED_FOR_RELAY = 1 << 6;
    }
}

impl InterfaceCapabilities {
    pub fn is_disabled(self) -> bool {
        self.contains(Self::DISABLED)
    }

    pub fn carries_traffic(self) -> bool {
        self.intersects(Self::USE_FOR_VIDEO | Self::USE_FOR_DATA)
    }
}

flag_set! {
    /// Capabilities of a logical radio link.
    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    LinkCapabilities: u32 {
        const CAN_RX = 1 << 0;
        const CAN_TX = 1 << 1;
        const DISABLED = 1 << 2;
        const USED_FOR_RELAY = 1 << 3;
    }
}

flag_set! {
    /// Trust flags of the negotiated runtime radio capability.
    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    CapabilityFlags: u32 {
        /// Set only by a committed negotiation session.
        const COMPUTED = 1 << 0;
    }
}

flag_set! {
    /// Video profile encoding flags.
    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    ProfileFlags: u32 {
        /// Controller-driven adaptive video is enabled on this profile.
        const ADAPTIVE_VIDEO = 1 << 0;
        /// Less aggressive adaptation: the lowest rate band is the bottom two rungs.
        const ADAPTIVE_MEDIUM_ONLY = 1 << 1;
        /// Lower the I/P quantization delta while the link is on its lowest rate.
        const LOWER_QP_ON_LOW_LINK = 1 << 2;
        /// Second intensity level for `LOWER_QP_ON_LOW_LINK`.
        const LOWER_QP_STRONG = 1 << 3;
        /// Switch to the monochrome focus cue while link-limited.
        const FOCUS_MODE_CUE = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_retained() {
        let f = RadioFlags::from_bits_retain(0x8000_0001);
        assert!(f.contains(RadioFlags::FRAME_TYPE_DATA));
        assert_eq!(f.bits(), 0x8000_0001);
    }

    #[test]
    fn insert_remove_set() {
        let mut caps = InterfaceCapabilities::CAN_RX | InterfaceCapabilities::CAN_TX;
        caps.insert(InterfaceCapabilities::USED_FOR_RELAY);
        assert!(caps.contains(InterfaceCapabilities::USED_FOR_RELAY));
        caps.set(InterfaceCapabilities::USED_FOR_RELAY, false);
        assert!(!caps.contains(InterfaceCapabilities::USED_FOR_RELAY));
        caps.remove(InterfaceCapabilities::CAN_TX);
        assert_eq!(caps, InterfaceCapabilities::CAN_RX);
    }

    #[test]
    fn channel_width_follows_ht40_bit() {
        assert_eq!(RadioFlags::empty().channel_width(), ChannelWidth::Mhz20);
        assert_eq!(RadioFlags::HT40.channel_width(), ChannelWidth::Mhz40);
    }

    #[test]
    fn debug_lists_named_bits() {
        let f = RadioFlags::FRAME_TYPE_DATA | RadioFlags::DATARATE_MCS;
        assert_eq!(format!("{f:?}"), "RadioFlags(FRAME_TYPE_DATA | DATARATE_MCS)");
        assert_eq!(format!("{:?}", LinkCapabilities::empty()), "LinkCapabilities(0x0)");
    }
}
