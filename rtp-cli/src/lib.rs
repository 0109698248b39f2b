//! RTP Send CLI Library
//!
//! Scenario configuration and stats formatting for the send-side command
//! line tools.

pub mod config;
pub mod stats;

pub use config::{BitrateConfig, Config, ConfigError, KeepAliveConfig, PacerConfig, ScenarioEvent};
pub use stats::{display_summary, format_bandwidth, format_ms, CoordinatorSummary};
