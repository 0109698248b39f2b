//! Network level types shared by the pacer, the controller and the transport

/// Binary network availability signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// Network is usable
    Up,
    /// Network is unavailable, nothing should be sent
    Down,
}

impl NetworkState {
    /// Whether the network is up
    pub fn is_up(&self) -> bool {
        matches!(self, NetworkState::Up)
    }
}

impl From<bool> for NetworkState {
    fn from(available: bool) -> Self {
        if available {
            NetworkState::Up
        } else {
            NetworkState::Down
        }
    }
}

/// Network route of a transport as reported by the network layer
///
/// Two routes are equal when they describe the same path: the connection
/// flag and both network ids match. `last_sent_packet_id` and
/// `packet_overhead` change while the path stays the same and are not part
/// of the comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkRoute {
    /// Whether the transport is connected
    pub connected: bool,
    /// Id of the local network interface
    pub local_network_id: u16,
    /// Id of the remote network interface
    pub remote_network_id: u16,
    /// Last packet id sent on the previous route
    pub last_sent_packet_id: Option<i64>,
    /// Per-packet transport overhead in bytes
    pub packet_overhead: u16,
}

impl NetworkRoute {
    /// A connected route between the given networks
    pub fn connected(local_network_id: u16, remote_network_id: u16) -> Self {
        NetworkRoute {
            connected: true,
            local_network_id,
            remote_network_id,
            ..Default::default()
        }
    }

    /// A disconnected route
    pub fn disconnected() -> Self {
        NetworkRoute::default()
    }

    /// Set the per-packet overhead
    pub fn with_packet_overhead(mut self, packet_overhead: u16) -> Self {
        self.packet_overhead = packet_overhead;
        self
    }

    /// Set the last packet id sent before the switch
    pub fn with_last_sent_packet_id(mut self, packet_id: i64) -> Self {
        self.last_sent_packet_id = Some(packet_id);
        self
    }
}

impl PartialEq for NetworkRoute {
    fn eq(&self, other: &Self) -> bool {
        self.connected == other.connected
            && self.local_network_id == other.local_network_id
            && self.remote_network_id == other.remote_network_id
    }
}

impl Eq for NetworkRoute {}

/// Notification that a packet left the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    /// Transport-wide sequence number, if the packet carries one
    pub packet_id: Option<i64>,
    /// Send time in milliseconds
    pub send_time_ms: i64,
}

impl SentPacket {
    /// Create a sent packet notification
    pub fn new(packet_id: Option<i64>, send_time_ms: i64) -> Self {
        SentPacket {
            packet_id,
            send_time_ms,
        }
    }
}

/// Per-packet status in a transport feedback message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStatus {
    /// Transport-wide sequence number
    pub sequence_number: u16,
    /// Arrival time at the receiver, `None` if reported lost
    pub arrival_time_ms: Option<i64>,
}

/// Already parsed transport feedback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportFeedback {
    /// Status of every packet the message covers
    pub packets: Vec<PacketStatus>,
}

/// Feedback for a single sent packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFeedback {
    /// Media source the packet belongs to
    pub ssrc: u32,
    /// Transport-wide sequence number
    pub sequence_number: u16,
    /// Payload size in bytes
    pub payload_size: usize,
    /// When the packet was sent, if known
    pub send_time_ms: Option<i64>,
    /// When the packet arrived, `None` if lost
    pub arrival_time_ms: Option<i64>,
}

/// Target rate reported to network observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetTransferRate {
    /// Rate the encoders may use
    pub target_bitrate_bps: u32,
    /// Fraction of packets lost, in 1/256 units
    pub fraction_loss: u8,
    /// Round-trip time
    pub rtt_ms: i64,
    /// Interval between bandwidth probes
    pub probing_interval_ms: i64,
}
