//! Statistics display and formatting

use rtp_congestion::{CongestionController, Pacer};
use rtp_transport::{BitrateConstraints, TransportSendCoordinator};

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format a millisecond value in human-readable form
pub fn format_ms(ms: i64) -> String {
    if ms.abs() >= 1_000 {
        format!("{:.2}s", ms as f64 / 1_000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// Snapshot of what a coordinator reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSummary {
    pub constraints: BitrateConstraints,
    pub available_bandwidth_bps: Option<u32>,
    pub queuing_delay_ms: i64,
    pub first_packet_time_ms: Option<i64>,
}

impl CoordinatorSummary {
    /// Take a snapshot
    pub fn capture<P, C>(coordinator: &TransportSendCoordinator<P, C>) -> Self
    where
        P: Pacer + 'static,
        C: CongestionController + 'static,
    {
        CoordinatorSummary {
            constraints: coordinator.bitrate_constraints(),
            available_bandwidth_bps: coordinator.available_bandwidth(),
            queuing_delay_ms: coordinator.pacer_queuing_delay_ms(),
            first_packet_time_ms: coordinator.first_packet_time_ms(),
        }
    }

    /// Summary as display rows
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let constraints = &self.constraints;
        vec![
            (
                "Min bitrate",
                format_bandwidth(constraints.min_bitrate_bps as u64),
            ),
            (
                "Start bitrate",
                format_bandwidth(constraints.start_bitrate_bps as u64),
            ),
            (
                "Max bitrate",
                constraints
                    .max_bitrate_bps
                    .map(|bps| format_bandwidth(bps as u64))
                    .unwrap_or_else(|| "unbounded".to_string()),
            ),
            (
                "Available",
                self.available_bandwidth_bps
                    .map(|bps| format_bandwidth(bps as u64))
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
            ("Queue delay", format_ms(self.queuing_delay_ms)),
            (
                "First packet",
                self.first_packet_time_ms
                    .map(format_ms)
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
        ]
    }
}

/// Display a coordinator summary
pub fn display_summary(summary: &CoordinatorSummary) {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│ SEND CONTROLLER SUMMARY                     │");
    println!("├─────────────────────────────────────────────┤");
    for (label, value) in summary.rows() {
        println!("│ {:<14} {:<28} │", label, value);
    }
    println!("└─────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bandwidth() {
        assert_eq!(format_bandwidth(500), "500 bps");
        assert_eq!(format_bandwidth(10_000), "10.00 Kbps");
        assert_eq!(format_bandwidth(10_000_000), "10.00 Mbps");
        assert_eq!(format_bandwidth(3_000_000_000), "3.00 Gbps");
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "0ms");
        assert_eq!(format_ms(250), "250ms");
        assert_eq!(format_ms(2_500), "2.50s");
    }

    #[test]
    fn test_summary_rows() {
        let summary = CoordinatorSummary {
            constraints: BitrateConstraints::new(30_000, 300_000, None),
            available_bandwidth_bps: None,
            queuing_delay_ms: 40,
            first_packet_time_ms: Some(1_500),
        };
        let rows = summary.rows();

        assert_eq!(rows[0], ("Min bitrate", "30.00 Kbps".to_string()));
        assert_eq!(rows[2], ("Max bitrate", "unbounded".to_string()));
        assert_eq!(rows[3], ("Available", "N/A".to_string()));
        assert_eq!(rows[4], ("Queue delay", "40ms".to_string()));
        assert_eq!(rows[5], ("First packet", "1.50s".to_string()));
    }
}
