//! # Radio Datarates
//!
//! Two mutually exclusive modulation families share one signed wire
//! integer:
//!
//! | Wire value   | Meaning                               |
//! |--------------|---------------------------------------|
//! | `0`          | auto (radio driver default)           |
//! | `-100`       | lowest rate of the link's family      |
//! | `> 0`        | legacy 802.11 rate in bits per second |
//! | `-1 ..= -99` | MCS index `-(value + 1)`              |
//!
//! The control logic never compares raw integers; it works on [`Datarate`]
//! and walks the per-family [`RateFamily`] ladder.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::flags::{ChannelWidth, RadioFlags};

/// Wire value for "auto".
pub const WIRE_AUTO: i32 = 0;
/// Wire value for "lowest".
pub const WIRE_LOWEST: i32 = -100;

/// Highest MCS index the radios can be driven at.
pub const MAX_MCS_INDEX: u8 = 7;

/// Legacy OFDM / DSSS rates in bits per second, ascending.
pub const LEGACY_RATES_BPS: &[u32] = &[
    2_000_000, 6_000_000, 9_000_000, 12_000_000, 18_000_000, 24_000_000, 36_000_000, 48_000_000,
    54_000_000,
];

/// HT single-stream, long guard interval PHY rates (kbps) for MCS 0..=7.
const MCS_RATES_20MHZ_KBPS: [u32; 8] = [
    6_500, 13_000, 19_500, 26_000, 39_000, 52_000, 58_500, 65_000,
];
const MCS_RATES_40MHZ_KBPS: [u32; 8] = [
    13_500, 27_000, 40_500, 54_000, 81_000, 108_000, 121_500, 135_000,
];

/// A radio datarate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Datarate {
    #[default]
    Auto,
    Lowest,
    /// Legacy rate in bits per second.
    Legacy(u32),
    /// MCS index.
    Mcs(u8),
}

impl Datarate {
    /// Decode the wire integer. Out-of-range negatives resolve to `Lowest`.
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            WIRE_AUTO => Datarate::Auto,
            WIRE_LOWEST => Datarate::Lowest,
            r if r > 0 => Datarate::Legacy(r as u32),
            r if r > WIRE_LOWEST => Datarate::Mcs((-r - 1) as u8),
            _ => Datarate::Lowest,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Datarate::Auto => WIRE_AUTO,
            Datarate::Lowest => WIRE_LOWEST,
            Datarate::Legacy(bps) => bps.min(i32::MAX as u32) as i32,
            Datarate::Mcs(idx) => -(idx as i32) - 1,
        }
    }

    pub fn family(self) -> Option<RateFamily> {
        match self {
            Datarate::Legacy(_) => Some(RateFamily::Legacy),
            Datarate::Mcs(_) => Some(RateFamily::Mcs),
            Datarate::Auto | Datarate::Lowest => None,
        }
    }

    /// PHY throughput in bits per second. `None` for auto/lowest and for MCS
    /// indices outside the table.
    pub fn bitrate_bps(self, width: ChannelWidth) -> Option<u64> {
        match self {
            Datarate::Legacy(bps) => Some(bps as u64),
            Datarate::Mcs(idx) => {
                let table = match width {
                    ChannelWidth::Mhz20 => &MCS_RATES_20MHZ_KBPS,
                    ChannelWidth::Mhz40 => &MCS_RATES_40MHZ_KBPS,
                };
                table.get(idx as usize).map(|kbps| *kbps as u64 * 1000)
            }
            Datarate::Auto | Datarate::Lowest => None,
        }
    }
}

impl From<i32> for Datarate {
    fn from(raw: i32) -> Self {
        Datarate::from_wire(raw)
    }
}

impl From<Datarate> for i32 {
    fn from(dr: Datarate) -> Self {
        dr.to_wire()
    }
}

impl fmt::Display for Datarate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datarate::Auto => write!(f, "auto"),
            Datarate::Lowest => write!(f, "lowest"),
            Datarate::Legacy(bps) => write!(f, "{:.1}Mbps", *bps as f64 / 1_000_000.0),
            Datarate::Mcs(idx) => write!(f, "MCS-{idx}"),
        }
    }
}

// ─── Ladders ────────────────────────────────────────────────────────────────

/// Modulation family and its ordered rate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateFamily {
    Legacy,
    Mcs,
}

impl RateFamily {
    pub fn for_flags(flags: RadioFlags) -> Self {
        if flags.uses_mcs() {
            RateFamily::Mcs
        } else {
            RateFamily::Legacy
        }
    }

    pub fn ladder_len(self) -> usize {
        match self {
            RateFamily::Legacy => LEGACY_RATES_BPS.len(),
            RateFamily::Mcs => MAX_MCS_INDEX as usize + 1,
        }
    }

    pub fn rung(self, index: usize) -> Option<Datarate> {
        match self {
            RateFamily::Legacy => LEGACY_RATES_BPS.get(index).map(|bps| Datarate::Legacy(*bps)),
            RateFamily::Mcs => (index < self.ladder_len()).then_some(Datarate::Mcs(index as u8)),
        }
    }

    pub fn lowest(self) -> Datarate {
        match self {
            RateFamily::Legacy => Datarate::Legacy(LEGACY_RATES_BPS[0]),
            RateFamily::Mcs => Datarate::Mcs(0),
        }
    }

    /// Position of `dr` on this ladder.
    ///
    /// `Lowest` maps to rung 0. A legacy rate between two rungs maps to the
    /// highest rung that does not exceed it. MCS indices above the ladder
    /// are reported as-is so callers can detect them; `Auto` and the
    /// other family have no rung.
    pub fn rung_of(self, dr: Datarate) -> Option<usize> {
        match (self, dr) {
            (_, Datarate::Lowest) => Some(0),
            (RateFamily::Legacy, Datarate::Legacy(bps)) => {
                LEGACY_RATES_BPS.iter().rposition(|r| *r <= bps).or(Some(0))
            }
            (RateFamily::Mcs, Datarate::Mcs(idx)) => Some(idx as usize),
            _ => None,
        }
    }

    /// The lowest rung whose usable throughput carries `payload_bps`, or
    /// the top rung when none does.
    pub fn required_for(self, payload_bps: u64, width: ChannelWidth, load_percent: u8) -> Datarate {
        let load = load_percent.clamp(1, 100) as u64;
        for index in 0..self.ladder_len() {
            if let Some(dr) = self.rung(index) {
                let usable = dr.bitrate_bps(width).unwrap_or(0) * load / 100;
                if usable >= payload_bps {
                    return dr;
                }
            }
        }
        self.rung(self.ladder_len() - 1).unwrap_or(self.lowest())
    }

    /// Shift `dr` up by `rungs`. Returns the rung index even when it falls
    /// off the top of the ladder, so the caller can reject it.
    pub fn boosted_rung(self, dr: Datarate, rungs: u8) -> Option<usize> {
        self.rung_of(dr).map(|r| r + rungs as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_mapping() {
        assert_eq!(Datarate::from_wire(0), Datarate::Auto);
        assert_eq!(Datarate::from_wire(-100), Datarate::Lowest);
        assert_eq!(Datarate::from_wire(-4), Datarate::Mcs(3));
        assert_eq!(Datarate::from_wire(-1), Datarate::Mcs(0));
        assert_eq!(Datarate::from_wire(18_000_000), Datarate::Legacy(18_000_000));
        assert_eq!(Datarate::from_wire(-250), Datarate::Lowest);
        assert_eq!(Datarate::Mcs(3).to_wire(), -4);
        assert_eq!(Datarate::Lowest.to_wire(), -100);
    }

    #[test]
    fn mcs_throughput_by_width() {
        assert_eq!(Datarate::Mcs(0).bitrate_bps(ChannelWidth::Mhz20), Some(6_500_000));
        assert_eq!(Datarate::Mcs(7).bitrate_bps(ChannelWidth::Mhz40), Some(135_000_000));
        assert_eq!(Datarate::Mcs(9).bitrate_bps(ChannelWidth::Mhz20), None);
        assert_eq!(Datarate::Auto.bitrate_bps(ChannelWidth::Mhz20), None);
    }

    #[test]
    fn legacy_rung_rounds_down() {
        let fam = RateFamily::Legacy;
        assert_eq!(fam.rung_of(Datarate::Legacy(18_000_000)), Some(4));
        assert_eq!(fam.rung_of(Datarate::Legacy(20_000_000)), Some(4));
        assert_eq!(fam.rung_of(Datarate::Legacy(1_000_000)), Some(0));
        assert_eq!(fam.rung_of(Datarate::Mcs(2)), None);
    }

    #[test]
    fn required_rate_respects_load() {
        // 5 Mbps at 50% load needs >= 10 Mbps PHY: MCS1 (13 Mbps).
        let dr = RateFamily::Mcs.required_for(5_000_000, ChannelWidth::Mhz20, 50);
        assert_eq!(dr, Datarate::Mcs(1));
        // Way beyond the ladder saturates at the top rung.
        let dr = RateFamily::Mcs.required_for(500_000_000, ChannelWidth::Mhz20, 80);
        assert_eq!(dr, Datarate::Mcs(MAX_MCS_INDEX));
        let dr = RateFamily::Legacy.required_for(1_000_000, ChannelWidth::Mhz20, 100);
        assert_eq!(dr, Datarate::Legacy(2_000_000));
    }

    #[test]
    fn boosted_rung_can_overflow_ladder() {
        assert_eq!(RateFamily::Mcs.boosted_rung(Datarate::Mcs(6), 3), Some(9));
        assert_eq!(RateFamily::Mcs.rung(9), None);
    }
}
