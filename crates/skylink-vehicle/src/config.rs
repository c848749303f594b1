//! Daemon configuration.
//!
//! The TOML file mirrors the runtime structs but every field is optional;
//! [`VehicleConfigInput::resolve`] fills defaults and rejects values the
//! link cannot run with.
//!
//! ```toml
//! [negotiation]
//! session_ceiling_ms = 120000
//! message_timeout_ms = 12000
//!
//! [adaptive]
//! snapshot_path = "/tmp/skylink_adaptive.state"
//!
//! [radio]
//! tx_queue_capacity = 256
//!
//! [daemon]
//! model_path = "/etc/skylink/model.toml"
//! tick_ms = 20
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::adaptive::AdaptiveConfig;
use crate::link_manager::RadioConfig;
use crate::negotiation::NegotiationConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub model_path: PathBuf,
    pub tick: Duration,
    /// Overrides the vehicle id stored in the model when set.
    pub vehicle_id: Option<u32>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("/etc/skylink/model.toml"),
            tick: Duration::from_millis(20),
            vehicle_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleConfig {
    pub negotiation: NegotiationConfig,
    pub adaptive: AdaptiveConfig,
    pub radio: RadioConfig,
    pub daemon: DaemonConfig,
}

// ─── TOML input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NegotiationConfigInput {
    pub session_ceiling_ms: Option<u64>,
    pub idle_after_ceiling_ms: Option<u64>,
    pub message_timeout_ms: Option<u64>,
    pub keepalive_count: Option<u8>,
    pub keepalive_spacing_ms: Option<u64>,
    pub reply_spacing_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfigInput {
    /// Empty string disables persistence.
    pub snapshot_path: Option<String>,
    pub focus_off_delay_ms: Option<u64>,
    pub log_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadioConfigInput {
    pub tx_queue_capacity: Option<usize>,
    pub sik_config_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfigInput {
    pub model_path: Option<String>,
    pub tick_ms: Option<u64>,
    pub vehicle_id: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VehicleConfigInput {
    pub negotiation: NegotiationConfigInput,
    pub adaptive: AdaptiveConfigInput,
    pub radio: RadioConfigInput,
    pub daemon: DaemonConfigInput,
}

fn millis(field: &str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Invalid(format!("{field} must be greater than zero"))),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

impl VehicleConfigInput {
    pub fn resolve(self) -> Result<VehicleConfig, ConfigError> {
        let neg_defaults = NegotiationConfig::default();
        let negotiation = NegotiationConfig {
            session_ceiling: millis(
                "negotiation.session_ceiling_ms",
                self.negotiation.session_ceiling_ms,
                neg_defaults.session_ceiling,
            )?,
            idle_after_ceiling: millis(
                "negotiation.idle_after_ceiling_ms",
                self.negotiation.idle_after_ceiling_ms,
                neg_defaults.idle_after_ceiling,
            )?,
            message_timeout: millis(
                "negotiation.message_timeout_ms",
                self.negotiation.message_timeout_ms,
                neg_defaults.message_timeout,
            )?,
            keepalive_count: self
                .negotiation
                .keepalive_count
                .unwrap_or(neg_defaults.keepalive_count),
            keepalive_spacing: self
                .negotiation
                .keepalive_spacing_ms
                .map(Duration::from_millis)
                .unwrap_or(neg_defaults.keepalive_spacing),
            reply_spacing: self
                .negotiation
                .reply_spacing_ms
                .map(Duration::from_millis)
                .unwrap_or(neg_defaults.reply_spacing),
        };

        let ad_defaults = AdaptiveConfig::default();
        let snapshot_path = match self.adaptive.snapshot_path {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path.trim())),
            None => ad_defaults.snapshot_path,
        };
        let adaptive = AdaptiveConfig {
            snapshot_path,
            focus_off_delay: millis(
                "adaptive.focus_off_delay_ms",
                self.adaptive.focus_off_delay_ms,
                ad_defaults.focus_off_delay,
            )?,
            log_interval: millis(
                "adaptive.log_interval_ms",
                self.adaptive.log_interval_ms,
                ad_defaults.log_interval,
            )?,
        };

        let radio_defaults = RadioConfig::default();
        let radio = RadioConfig {
            tx_queue_capacity: match self.radio.tx_queue_capacity {
                Some(0) => {
                    return Err(ConfigError::Invalid(
                        "radio.tx_queue_capacity must be greater than zero".into(),
                    ))
                }
                Some(n) => n,
                None => radio_defaults.tx_queue_capacity,
            },
            sik_config_attempts: match self.radio.sik_config_attempts {
                Some(0) => {
                    return Err(ConfigError::Invalid(
                        "radio.sik_config_attempts must be at least 1".into(),
                    ))
                }
                Some(n) => n,
                None => radio_defaults.sik_config_attempts,
            },
        };

        let daemon_defaults = DaemonConfig::default();
        let daemon = DaemonConfig {
            model_path: self
                .daemon
                .model_path
                .map(|p| PathBuf::from(p.trim()))
                .unwrap_or(daemon_defaults.model_path),
            tick: millis("daemon.tick_ms", self.daemon.tick_ms, daemon_defaults.tick)?,
            vehicle_id: self.daemon.vehicle_id,
        };

        Ok(VehicleConfig {
            negotiation,
            adaptive,
            radio,
            daemon,
        })
    }
}

impl VehicleConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(VehicleConfig::default());
        }
        let parsed: VehicleConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_defaults() {
        let cfg = VehicleConfig::from_toml_str("   \n").unwrap();
        assert_eq!(cfg, VehicleConfig::default());
        assert_eq!(cfg.negotiation.message_timeout, Duration::from_secs(12));
        assert_eq!(cfg.negotiation.session_ceiling, Duration::from_secs(120));
        assert_eq!(cfg.radio.tx_queue_capacity, 256);
    }

    #[test]
    fn parse_sections() {
        let toml = r#"
            [negotiation]
            session_ceiling_ms = 60000
            keepalive_count = 5

            [adaptive]
            snapshot_path = ""
            focus_off_delay_ms = 1500

            [radio]
            sik_config_attempts = 4

            [daemon]
            model_path = "/var/lib/skylink/model.toml"
            vehicle_id = 77
        "#;
        let cfg = VehicleConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.negotiation.session_ceiling, Duration::from_secs(60));
        assert_eq!(cfg.negotiation.keepalive_count, 5);
        assert_eq!(cfg.negotiation.idle_after_ceiling, Duration::from_secs(10));
        assert!(cfg.adaptive.snapshot_path.is_none());
        assert_eq!(cfg.adaptive.focus_off_delay, Duration::from_millis(1500));
        assert_eq!(cfg.radio.sik_config_attempts, 4);
        assert_eq!(cfg.daemon.model_path, PathBuf::from("/var/lib/skylink/model.toml"));
        assert_eq!(cfg.daemon.vehicle_id, Some(77));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = VehicleConfig::from_toml_str("[negotiation]\nmessage_timeout_ms = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("message_timeout_ms"));
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(VehicleConfig::from_toml_str("[radio]\ntx_queue_capacity = 0\n").is_err());
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(matches!(
            VehicleConfig::from_toml_str("[radio\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
