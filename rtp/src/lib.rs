//! RTP Send - send-side transport control
//!
//! High-level Rust API over the send-side pacing, congestion control and
//! transport coordination crates.

pub use rtp_congestion as congestion;
pub use rtp_io as io;
pub use rtp_transport as transport;

// Re-export commonly used types
pub use congestion::{NetworkRoute, SentPacket};
pub use io::{Clock, EventLog, SystemClock};
pub use transport::{
    BitrateConstraints, BitrateConstraintsMask, RtpKeepAliveConfig, TransportError,
    TransportSendCoordinator,
};
