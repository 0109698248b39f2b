//! Scenario file support for the send controller CLI

use rtp_transport::{BitrateConstraints, RtpKeepAliveConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Initial bitrate constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateConfig {
    /// Minimum bitrate
    #[serde(default)]
    pub min_bps: u32,
    /// Start bitrate, must be positive
    #[serde(default = "default_start_bps")]
    pub start_bps: u32,
    /// Maximum bitrate, unbounded if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bps: Option<u32>,
}

fn default_start_bps() -> u32 {
    rtp_transport::DEFAULT_START_BITRATE_BPS
}

impl Default for BitrateConfig {
    fn default() -> Self {
        BitrateConfig {
            min_bps: 0,
            start_bps: default_start_bps(),
            max_bps: None,
        }
    }
}

impl From<BitrateConfig> for BitrateConstraints {
    fn from(config: BitrateConfig) -> Self {
        BitrateConstraints::new(config.min_bps, config.start_bps, config.max_bps)
    }
}

/// Pacer tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Multiplier applied to the target bitrate
    #[serde(default = "default_pacing_factor")]
    pub pacing_factor: f32,
    /// Longest a packet may wait in the queue
    #[serde(default = "default_queue_time_limit")]
    pub queue_time_limit_ms: i64,
}

fn default_pacing_factor() -> f32 {
    rtp_congestion::pacer::DEFAULT_PACING_FACTOR
}

fn default_queue_time_limit() -> i64 {
    rtp_congestion::pacer::DEFAULT_QUEUE_TIME_LIMIT_MS
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            pacing_factor: default_pacing_factor(),
            queue_time_limit_ms: default_queue_time_limit(),
        }
    }
}

/// Keepalive settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    #[serde(default = "default_disabled")]
    pub timeout_interval_ms: i64,
    #[serde(default = "default_disabled_payload")]
    pub payload_type: i32,
}

fn default_disabled() -> i64 {
    -1
}

fn default_disabled_payload() -> i32 {
    -1
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        KeepAliveConfig {
            timeout_interval_ms: default_disabled(),
            payload_type: default_disabled_payload(),
        }
    }
}

impl From<KeepAliveConfig> for RtpKeepAliveConfig {
    fn from(config: KeepAliveConfig) -> Self {
        RtpKeepAliveConfig {
            timeout_interval_ms: config.timeout_interval_ms,
            payload_type: config.payload_type,
        }
    }
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioEvent {
    /// New constraints from signaling
    Sdp {
        #[serde(default)]
        min_bps: u32,
        start_bps: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_bps: Option<u32>,
    },
    /// New client preferences; absent fields keep the signaled value
    Client {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_bps: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_bps: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_bps: Option<u32>,
    },
    /// Route report for a transport
    Route {
        transport: String,
        #[serde(default = "default_connected")]
        connected: bool,
        #[serde(default)]
        local_network_id: u16,
        #[serde(default)]
        remote_network_id: u16,
        #[serde(default)]
        packet_overhead: u16,
    },
    /// Network availability
    Availability { available: bool },
    /// A packet left the socket
    SentPacket {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        packet_id: Option<i64>,
        send_time_ms: i64,
    },
    /// Receiver estimated maximum bitrate
    Remb { bitrate_bps: u32 },
    /// Let the process thread run
    Wait { ms: u64 },
}

fn default_connected() -> bool {
    true
}

/// Send controller scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bitrate: BitrateConfig,
    #[serde(default)]
    pub pacer: PacerConfig,
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
    /// Events replayed in order
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

impl Config {
    /// Load and validate a scenario from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a scenario
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the transport cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bitrate.start_bps == 0 {
            return Err(ConfigError::Invalid(
                "bitrate.start_bps must be positive".to_string(),
            ));
        }
        if let Some(max) = self.bitrate.max_bps {
            if max < self.bitrate.min_bps {
                return Err(ConfigError::Invalid(format!(
                    "bitrate.max_bps ({}) is below bitrate.min_bps ({})",
                    max, self.bitrate.min_bps
                )));
            }
        }
        if !self.pacer.pacing_factor.is_finite() || self.pacer.pacing_factor <= 0.0 {
            return Err(ConfigError::Invalid(
                "pacer.pacing_factor must be positive".to_string(),
            ));
        }
        for (index, event) in self.events.iter().enumerate() {
            let zero_start = matches!(
                event,
                ScenarioEvent::Sdp { start_bps: 0, .. }
                    | ScenarioEvent::Client {
                        start_bps: Some(0),
                        ..
                    }
            );
            if zero_start {
                return Err(ConfigError::Invalid(format!(
                    "events[{}]: start_bps must be positive",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Example scenario: connect, switch networks, then cap the bitrate
    pub fn example() -> Self {
        Config {
            bitrate: BitrateConfig {
                min_bps: 30_000,
                start_bps: 300_000,
                max_bps: Some(2_000_000),
            },
            pacer: PacerConfig::default(),
            keepalive: KeepAliveConfig::default(),
            events: vec![
                ScenarioEvent::Availability { available: true },
                ScenarioEvent::Route {
                    transport: "video".to_string(),
                    connected: true,
                    local_network_id: 1,
                    remote_network_id: 1,
                    packet_overhead: 48,
                },
                ScenarioEvent::Remb {
                    bitrate_bps: 1_200_000,
                },
                ScenarioEvent::Wait { ms: 100 },
                ScenarioEvent::Route {
                    transport: "video".to_string(),
                    connected: true,
                    local_network_id: 2,
                    remote_network_id: 1,
                    packet_overhead: 48,
                },
                ScenarioEvent::Wait { ms: 100 },
                ScenarioEvent::Client {
                    min_bps: None,
                    start_bps: None,
                    max_bps: Some(800_000),
                },
                ScenarioEvent::SentPacket {
                    packet_id: Some(1),
                    send_time_ms: 250,
                },
                ScenarioEvent::Wait { ms: 100 },
            ],
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
