//! Observer traits registered with, or exposed by, the congestion controller

use crate::network::{PacketFeedback, TargetTransferRate, TransportFeedback};

/// Gets told about packets added for, and feedback received on, the
/// transport-wide sequence
pub trait PacketFeedbackObserver: Send + Sync {
    /// A packet was registered for feedback
    fn on_packet_added(&self, ssrc: u32, sequence_number: u16);

    /// Feedback arrived for a batch of packets
    fn on_packet_feedback_vector(&self, feedback: &[PacketFeedback]);
}

/// Gets told when the target rate or the network state changes
pub trait NetworkChangedObserver: Send + Sync {
    /// New target rate, zero while the network is down
    fn on_network_changed(&self, update: TargetTransferRate);
}

/// Entry point for transport-wide feedback
pub trait TransportFeedbackObserver: Send + Sync {
    /// Register an outgoing packet so feedback can be matched to it
    fn add_packet(&self, ssrc: u32, sequence_number: u16, length: usize);

    /// Handle an already parsed feedback message
    fn on_transport_feedback(&self, feedback: &TransportFeedback);
}

/// Entry point for RTCP based bandwidth reports
pub trait RtcpBandwidthObserver: Send + Sync {
    /// Receiver estimated maximum bitrate
    fn on_received_estimated_bitrate(&self, bitrate_bps: u32);

    /// Receiver report summary
    fn on_received_rtcp_receiver_report(&self, fraction_lost: u8, rtt_ms: i64, now_ms: i64);
}

/// Gets round-trip time updates from call statistics
pub trait CallStatsObserver: Send + Sync {
    fn on_rtt_update(&self, avg_rtt_ms: i64, max_rtt_ms: i64);
}
