//! Adaptive-video snapshot file.
//!
//! Three whitespace-separated lines, so a crashed process can resume the
//! adaptive targets it had applied:
//!
//! ```text
//! <keyframe_ms> <bitrate_bps>
//! <dr_boost>
//! <boost iface 0> <boost iface 1> ... <boost iface 7>
//! ```
//!
//! Boost values of 255 mean unset.

use std::fs;
use std::io;
use std::path::Path;

use skylink_common::MAX_RADIO_INTERFACES;
use thiserror::Error;

const UNSET: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdaptiveSnapshot {
    pub keyframe_ms: i32,
    pub bitrate_bps: u32,
    pub dr_boost: Option<u8>,
    pub interface_boost: [Option<u8>; MAX_RADIO_INTERFACES],
}

fn boost_out(b: Option<u8>) -> u8 {
    b.unwrap_or(UNSET)
}

fn boost_in(v: u8) -> Option<u8> {
    (v != UNSET).then_some(v)
}

fn field<T: std::str::FromStr>(
    line: usize,
    token: Option<&str>,
    name: &str,
) -> Result<T, SnapshotError> {
    let token = token.ok_or_else(|| SnapshotError::Parse {
        line,
        reason: format!("missing {name}"),
    })?;
    token.parse().map_err(|_| SnapshotError::Parse {
        line,
        reason: format!("bad {name} {token:?}"),
    })
}

impl AdaptiveSnapshot {
    pub fn render(&self) -> String {
        let boosts: Vec<String> = self
            .interface_boost
            .iter()
            .map(|b| boost_out(*b).to_string())
            .collect();
        format!(
            "{} {}\n{}\n{}\n",
            self.keyframe_ms,
            self.bitrate_bps,
            boost_out(self.dr_boost),
            boosts.join(" ")
        )
    }

    pub fn parse(text: &str) -> Result<Self, SnapshotError> {
        let mut lines = text.lines();

        let mut first = lines.next().unwrap_or_default().split_whitespace();
        let keyframe_ms = field(1, first.next(), "keyframe interval")?;
        let bitrate_bps = field(1, first.next(), "bitrate")?;

        let mut second = lines.next().unwrap_or_default().split_whitespace();
        let dr_boost = boost_in(field(2, second.next(), "datarate boost")?);

        let mut interface_boost = [None; MAX_RADIO_INTERFACES];
        let mut third = lines.next().unwrap_or_default().split_whitespace();
        for (i, slot) in interface_boost.iter_mut().enumerate() {
            *slot = boost_in(field(3, third.next(), &format!("interface {i} boost"))?);
        }

        Ok(Self {
            keyframe_ms,
            bitrate_bps,
            dr_boost,
            interface_boost,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), SnapshotError> {
        fs::write(path, self.render())?;
        Ok(())
    }

    /// Read and delete the snapshot. `Ok(None)` when no file exists.
    pub fn take(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(path)?;
        Self::parse(&text).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_layout() {
        let mut snap = AdaptiveSnapshot {
            keyframe_ms: 500,
            bitrate_bps: 4_000_000,
            dr_boost: Some(1),
            ..Default::default()
        };
        snap.interface_boost[0] = Some(1);
        assert_eq!(
            snap.render(),
            "500 4000000\n1\n1 255 255 255 255 255 255 255\n"
        );
        assert_eq!(AdaptiveSnapshot::parse(&snap.render()).unwrap(), snap);
    }

    #[test]
    fn short_boost_line_rejected() {
        let err = AdaptiveSnapshot::parse("500 4000000\n1\n1 2 3\n").unwrap_err();
        assert!(matches!(err, SnapshotError::Parse { line: 3, .. }));
    }

    #[test]
    fn take_deletes_file() {
        let path = std::env::temp_dir().join(format!("skylink-snap-take-{}", std::process::id()));
        let snap = AdaptiveSnapshot {
            keyframe_ms: -1,
            bitrate_bps: 2_000_000,
            ..Default::default()
        };
        snap.write(&path).unwrap();
        assert_eq!(AdaptiveSnapshot::take(&path).unwrap(), Some(snap));
        assert!(!path.exists());
        assert_eq!(AdaptiveSnapshot::take(&path).unwrap(), None);
    }
}
