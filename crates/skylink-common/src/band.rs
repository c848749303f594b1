//! # Radio Frequency Bands
//!
//! Frequency bands a radio interface can be tuned to, and the hard-coded
//! fallback frequency used when a single-interface vehicle ends up with a
//! frequency its only card cannot support.
//!
//! | Band    | Range (MHz)   | Typical hardware     |
//! |---------|---------------|----------------------|
//! | 433     | 420–450       | SiK                  |
//! | 868     | 860–880       | SiK, ELRS            |
//! | 915     | 902–928       | SiK, ELRS            |
//! | 2.3 GHz | 2312–2392     | Wi-Fi (extended)     |
//! | 2.4 GHz | 2412–2484     | Wi-Fi, ELRS          |
//! | 2.5 GHz | 2487–2700     | Wi-Fi (extended)     |
//! | 5.8 GHz | 5180–5925     | Wi-Fi                |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frequency used when the configuration has to be forced back to a known
/// good state, in kHz.
pub const DEFAULT_FREQUENCY_KHZ: u32 = 2_472_000;
/// Fallback for cards without 2.4 GHz support.
pub const DEFAULT_FREQUENCY_58_KHZ: u32 = 5_745_000;
/// Fallbacks for sub-GHz serial radios.
pub const DEFAULT_FREQUENCY_433_KHZ: u32 = 443_000;
pub const DEFAULT_FREQUENCY_868_KHZ: u32 = 868_000;
pub const DEFAULT_FREQUENCY_915_KHZ: u32 = 915_000;

/// A frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    B433,
    B868,
    B915,
    B23,
    B24,
    B25,
    B58,
}

impl Band {
    pub const ALL: [Band; 7] = [
        Band::B433,
        Band::B868,
        Band::B915,
        Band::B23,
        Band::B24,
        Band::B25,
        Band::B58,
    ];

    /// Inclusive range in kHz.
    pub fn range_khz(self) -> (u32, u32) {
        match self {
            Band::B433 => (420_000, 450_000),
            Band::B868 => (860_000, 880_000),
            Band::B915 => (902_000, 928_000),
            Band::B23 => (2_312_000, 2_392_000),
            Band::B24 => (2_412_000, 2_484_000),
            Band::B25 => (2_487_000, 2_700_000),
            Band::B58 => (5_180_000, 5_925_000),
        }
    }

    pub fn contains(self, freq_khz: u32) -> bool {
        let (lo, hi) = self.range_khz();
        (lo..=hi).contains(&freq_khz)
    }

    pub fn of(freq_khz: u32) -> Option<Band> {
        Band::ALL.into_iter().find(|b| b.contains(freq_khz))
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Band::B433 => "433MHz",
            Band::B868 => "868MHz",
            Band::B915 => "915MHz",
            Band::B23 => "2.3GHz",
            Band::B24 => "2.4GHz",
            Band::B25 => "2.5GHz",
            Band::B58 => "5.8GHz",
        };
        f.write_str(s)
    }
}

/// Set of bands supported by one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandSet(u32);

impl BandSet {
    pub fn new(bands: &[Band]) -> Self {
        BandSet(bands.iter().fold(0, |acc, b| acc | b.bit()))
    }

    pub fn has(self, band: Band) -> bool {
        self.0 & band.bit() != 0
    }

    pub fn supports_frequency(self, freq_khz: u32) -> bool {
        Band::of(freq_khz).is_some_and(|b| self.has(b))
    }

    /// The hard-coded fallback frequency for a card with these bands.
    pub fn default_frequency_khz(self) -> u32 {
        if self.has(Band::B24) {
            DEFAULT_FREQUENCY_KHZ
        } else if self.has(Band::B58) {
            DEFAULT_FREQUENCY_58_KHZ
        } else if self.has(Band::B915) {
            DEFAULT_FREQUENCY_915_KHZ
        } else if self.has(Band::B868) {
            DEFAULT_FREQUENCY_868_KHZ
        } else if self.has(Band::B433) {
            DEFAULT_FREQUENCY_433_KHZ
        } else {
            DEFAULT_FREQUENCY_KHZ
        }
    }
}

/// Format a frequency in kHz for log lines.
pub fn display_khz(freq_khz: u32) -> String {
    if freq_khz >= 1_000_000 {
        format!("{:.3} GHz", freq_khz as f64 / 1_000_000.0)
    } else {
        format!("{:.3} MHz", freq_khz as f64 / 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_lookup() {
        assert_eq!(Band::of(2_472_000), Some(Band::B24));
        assert_eq!(Band::of(5_745_000), Some(Band::B58));
        assert_eq!(Band::of(443_000), Some(Band::B433));
        assert_eq!(Band::of(3_000_000), None);
    }

    #[test]
    fn band_set_support() {
        let set = BandSet::new(&[Band::B24, Band::B58]);
        assert!(set.supports_frequency(5_805_000));
        assert!(!set.supports_frequency(915_000));
        assert!(!BandSet::default().supports_frequency(2_472_000));
    }

    #[test]
    fn default_frequency_prefers_24ghz() {
        assert_eq!(BandSet::new(&[Band::B58, Band::B24]).default_frequency_khz(), 2_472_000);
        assert_eq!(BandSet::new(&[Band::B58]).default_frequency_khz(), 5_745_000);
        assert_eq!(BandSet::new(&[Band::B433]).default_frequency_khz(), 443_000);
    }

    #[test]
    fn display_frequency() {
        assert_eq!(display_khz(2_472_000), "2.472 GHz");
        assert_eq!(display_khz(915_000), "915.000 MHz");
    }
}
