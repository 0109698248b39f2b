//! Event log sink
//!
//! Structured record of the decisions the send side takes. The transport only
//! writes to it; what happens to the events is up to the sink.

use parking_lot::Mutex;

/// Event recorded by the send side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcEvent {
    /// Network availability signal forwarded to the controller
    NetworkAvailability { available: bool },
    /// Bandwidth estimation was reset because the network route changed
    RouteChange {
        connected: bool,
        local_network_id: u16,
        remote_network_id: u16,
        packet_overhead: u16,
    },
    /// New estimation bounds were applied
    BweBoundsUpdate {
        min_bps: u32,
        start_bps: u32,
        max_bps: Option<u32>,
    },
    /// Target bitrate reported to network observers
    TargetBitrate { bitrate_bps: u32, network_up: bool },
    /// Pacer send limits changed
    PacerLimits {
        min_send_bitrate_bps: u32,
        max_padding_bitrate_bps: u32,
    },
    /// Periodic ALR probing toggled
    AlrProbing { enabled: bool },
}

/// Event log sink
pub trait EventLog: Send + Sync {
    /// Record an event
    fn log(&self, event: RtcEvent);
}

/// Event log that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventLog;

impl EventLog for NullEventLog {
    fn log(&self, _event: RtcEvent) {}
}

/// Event log that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log(&self, event: RtcEvent) {
        tracing::debug!(target: "rtc_event_log", ?event, "event");
    }
}

/// Event log that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<RtcEvent>>,
}

impl MemoryEventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far
    pub fn events(&self) -> Vec<RtcEvent> {
        self.events.lock().clone()
    }

    /// Number of events recorded so far
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no event was recorded yet
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventLog for MemoryEventLog {
    fn log(&self, event: RtcEvent) {
        self.events.lock().push(event);
    }
}
