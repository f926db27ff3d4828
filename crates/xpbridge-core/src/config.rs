//! Configuration system for the bridge.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $XPBRIDGE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/xpbridge/config.toml
//!   3. ~/.config/xpbridge/config.toml

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{MULTICAST_GROUP, MULTICAST_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub discovery: DiscoveryConfig,
    pub subscriptions: SubscriptionConfig,
    pub sink: SinkConfig,
    pub aircraft: AircraftConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Multicast group the simulator beacons on.
    pub multicast_group: Ipv4Addr,
    /// Multicast port the simulator beacons on.
    pub port: u16,
    /// How long to wait for a beacon per attempt.
    pub timeout_secs: u64,
    /// Attempts before giving up. Only non-beacon datagrams cause a retry.
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Rate requested for bulk telemetry datarefs, in Hz.
    pub update_freq_hz: u32,
    /// Datarefs subscribed at startup.
    pub datarefs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// TCP address of the downstream consumer.
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AircraftConfig {
    /// How often the identifier prefix is checked for changes.
    pub poll_interval_secs: u64,
    /// Poll interval while reconstructing a string dataref.
    pub string_poll_interval_ms: u64,
    /// Upper bound on a single string read.
    pub string_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Telemetry datarefs the position publisher reads.
pub const DEFAULT_DATAREFS: &[&str] = &[
    "sim/flightmodel/position/elevation",
    "sim/flightmodel/position/y_agl",
    "sim/flightmodel/position/latitude",
    "sim/flightmodel/position/longitude",
    "sim/flightmodel/position/theta",
    "sim/flightmodel/position/phi",
    "sim/flightmodel/position/psi",
    "sim/flightmodel/position/groundspeed",
    "sim/flightmodel/position/vh_ind_fpm",
    "sim/flightmodel/weight/m_fuel_total",
    "sim/physics/gravity_normal",
    "sim/cockpit/radios/transponder_code",
    "sim/flightmodel/failures/onground_any",
    "sim/operation/override/override_planepath",
    "sim/time/paused",
    "sim/operation/prefs/replay_mode",
    "sim/graphics/view/framerate_period",
    "sim/time/time_accel",
    "sim/cockpit/autopilot/autopilot_mode",
    "sim/flightmodel/engine/ENGN_running",
    "sim/cockpit2/controls/parking_brake_ratio",
    "sim/weather/wind_speed_kt",
    "sim/weather/wind_direction_degt",
];

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: MULTICAST_GROUP.parse().unwrap_or(Ipv4Addr::new(239, 255, 1, 1)),
            port: MULTICAST_PORT,
            timeout_secs: 5,
            attempts: 3,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            update_freq_hz: 10,
            datarefs: DEFAULT_DATAREFS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6746".to_string(),
        }
    }
}

impl Default for AircraftConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            string_poll_interval_ms: 100,
            string_timeout_ms: 3000,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SubscriptionConfig {
    /// Interval between position publishes. Never zero.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(1) / self.update_freq_hz.max(1)
    }
}

impl AircraftConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn string_poll_interval(&self) -> Duration {
        Duration::from_millis(self.string_poll_interval_ms)
    }

    pub fn string_timeout(&self) -> Duration {
        Duration::from_millis(self.string_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("xpbridge")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            BridgeConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("XPBRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BridgeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply XPBRIDGE_* overrides. `lookup` resolves a variable name.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("XPBRIDGE_SINK__ADDRESS") {
            self.sink.address = v;
        }
        if let Some(p) = lookup("XPBRIDGE_SUBSCRIPTIONS__UPDATE_FREQ_HZ").and_then(|v| v.parse().ok()) {
            self.subscriptions.update_freq_hz = p;
        }
        if let Some(p) = lookup("XPBRIDGE_DISCOVERY__TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.discovery.timeout_secs = p;
        }
        if let Some(p) = lookup("XPBRIDGE_DISCOVERY__ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.discovery.attempts = p;
        }
    }
}
