//! Send-side congestion controller
//!
//! Keeps the estimation bounds the transport pushes, clamps receiver
//! reported estimates into them, and on every process interval forwards the
//! resulting target to the pacer and to the network observers. Transport
//! feedback is matched against the packets registered for it and handed to
//! the packet feedback observers.

use crate::network::{
    NetworkRoute, NetworkState, PacketFeedback, SentPacket, TargetTransferRate, TransportFeedback,
};
use crate::observer::{
    CallStatsObserver, NetworkChangedObserver, PacketFeedbackObserver, RtcpBandwidthObserver,
    TransportFeedbackObserver,
};
use crate::pacer::Pacer;
use parking_lot::Mutex;
use rtp_io::{Clock, EventLog, Module, RtcEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Process interval of the in-tree controller
pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_millis(25);

/// Probing interval reported while periodic ALR probing is on
const ALR_PROBING_INTERVAL_MS: i64 = 5_000;

/// Packets kept waiting for feedback
const MAX_FEEDBACK_HISTORY: usize = 8_192;

/// Congestion controller contract used by the transport
pub trait CongestionController: Module + TransportFeedbackObserver + CallStatsObserver {
    /// Network availability
    fn signal_network_state(&self, state: NetworkState);

    /// Estimation bounds. A start rate resets the estimate to it.
    fn set_bwe_bitrates(
        &self,
        min_bitrate_bps: u32,
        start_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    );

    /// Sum of the rates the allocator may hand out
    fn set_max_total_allocated_bitrate(&self, total_bitrate_bps: u32);

    /// Full reset of the estimator after the transport switched paths
    fn on_network_route_changed(
        &self,
        route: &NetworkRoute,
        start_bitrate_bps: u32,
        min_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    );

    /// Sink for RTCP bandwidth reports
    fn bandwidth_observer(&self) -> Arc<dyn RtcpBandwidthObserver>;

    /// Current target, `None` while nothing can be sent
    fn available_bandwidth(&self) -> Option<u32>;

    fn register_packet_feedback_observer(&self, observer: Arc<dyn PacketFeedbackObserver>);

    fn deregister_packet_feedback_observer(&self, observer: &Arc<dyn PacketFeedbackObserver>);

    fn register_network_observer(&self, observer: Arc<dyn NetworkChangedObserver>);

    /// A packet left the socket
    fn on_sent_packet(&self, sent_packet: &SentPacket);

    /// Toggle periodic probing while application limited
    fn enable_periodic_alr_probing(&self, enable: bool);
}

#[derive(Debug, Clone, Copy)]
struct PendingPacket {
    ssrc: u32,
    payload_size: usize,
    send_time_ms: Option<i64>,
}

#[derive(Debug)]
struct ControllerState {
    network_state: NetworkState,
    min_bitrate_bps: u32,
    start_bitrate_bps: u32,
    max_bitrate_bps: Option<u32>,
    max_total_allocated_bps: Option<u32>,
    remb_bps: Option<u32>,
    fraction_loss: u8,
    rtt_ms: i64,
    transport_overhead_bytes: u16,
    periodic_alr_probing: bool,
    last_reported: Option<TargetTransferRate>,
    last_process_ms: i64,
    pending: HashMap<u16, PendingPacket>,
    pending_order: VecDeque<u16>,
}

impl ControllerState {
    fn upper_bound_bps(&self) -> Option<u32> {
        match (self.max_bitrate_bps, self.max_total_allocated_bps) {
            (Some(max), Some(total)) => Some(max.min(total)),
            (max, total) => max.or(total),
        }
    }

    fn target_bitrate_bps(&self) -> u32 {
        let estimate = self.remb_bps.unwrap_or(self.start_bitrate_bps);
        let bounded = estimate.max(self.min_bitrate_bps);
        match self.upper_bound_bps() {
            Some(upper) => bounded.min(upper),
            None => bounded,
        }
    }

    fn current_target(&self) -> TargetTransferRate {
        let target_bitrate_bps = if self.network_state.is_up() {
            self.target_bitrate_bps()
        } else {
            0
        };
        TargetTransferRate {
            target_bitrate_bps,
            fraction_loss: self.fraction_loss,
            rtt_ms: self.rtt_ms,
            probing_interval_ms: if self.periodic_alr_probing {
                ALR_PROBING_INTERVAL_MS
            } else {
                0
            },
        }
    }

    fn clear_feedback_history(&mut self) {
        self.pending.clear();
        self.pending_order.clear();
    }
}

/// Receives RTCP bandwidth reports on behalf of the controller
struct RtcpReportHandler {
    state: Arc<Mutex<ControllerState>>,
}

impl RtcpBandwidthObserver for RtcpReportHandler {
    fn on_received_estimated_bitrate(&self, bitrate_bps: u32) {
        self.state.lock().remb_bps = Some(bitrate_bps);
    }

    fn on_received_rtcp_receiver_report(&self, fraction_lost: u8, rtt_ms: i64, _now_ms: i64) {
        let mut state = self.state.lock();
        state.fraction_loss = fraction_lost;
        state.rtt_ms = rtt_ms;
    }
}

/// In-tree congestion controller
pub struct SendSideCongestionController {
    clock: Arc<dyn Clock>,
    event_log: Arc<dyn EventLog>,
    pacer: Arc<dyn Pacer>,
    process_interval_ms: i64,
    state: Arc<Mutex<ControllerState>>,
    report_handler: Arc<RtcpReportHandler>,
    feedback_observers: Mutex<Vec<Arc<dyn PacketFeedbackObserver>>>,
    network_observers: Mutex<Vec<Arc<dyn NetworkChangedObserver>>>,
}

impl SendSideCongestionController {
    /// Create a controller driving `pacer`
    pub fn new(
        clock: Arc<dyn Clock>,
        event_log: Arc<dyn EventLog>,
        pacer: Arc<dyn Pacer>,
        process_interval: Duration,
    ) -> Self {
        let now_ms = clock.time_in_milliseconds();
        let state = Arc::new(Mutex::new(ControllerState {
            network_state: NetworkState::Up,
            min_bitrate_bps: 0,
            start_bitrate_bps: 0,
            max_bitrate_bps: None,
            max_total_allocated_bps: None,
            remb_bps: None,
            fraction_loss: 0,
            rtt_ms: 0,
            transport_overhead_bytes: 0,
            periodic_alr_probing: false,
            last_reported: None,
            last_process_ms: now_ms,
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
        }));

        SendSideCongestionController {
            clock,
            event_log,
            pacer,
            process_interval_ms: process_interval.as_millis() as i64,
            report_handler: Arc::new(RtcpReportHandler {
                state: Arc::clone(&state),
            }),
            state,
            feedback_observers: Mutex::new(Vec::new()),
            network_observers: Mutex::new(Vec::new()),
        }
    }

    /// Current network state
    pub fn network_state(&self) -> NetworkState {
        self.state.lock().network_state
    }

    /// Current `(min, start, max)` bounds
    pub fn bwe_bitrates(&self) -> (u32, u32, Option<u32>) {
        let state = self.state.lock();
        (
            state.min_bitrate_bps,
            state.start_bitrate_bps,
            state.max_bitrate_bps,
        )
    }

    /// Whether periodic ALR probing is on
    pub fn periodic_alr_probing(&self) -> bool {
        self.state.lock().periodic_alr_probing
    }

    /// Per-packet overhead of the current route
    pub fn transport_overhead_bytes(&self) -> u16 {
        self.state.lock().transport_overhead_bytes
    }

    /// Packets still waiting for feedback
    pub fn pending_feedback_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn reset_bounds(
        state: &mut ControllerState,
        min_bitrate_bps: u32,
        start_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    ) {
        state.min_bitrate_bps = min_bitrate_bps;
        state.max_bitrate_bps = max_bitrate_bps;
        if start_bitrate_bps > 0 {
            state.start_bitrate_bps = start_bitrate_bps;
            state.remb_bps = None;
        }
    }
}

impl CongestionController for SendSideCongestionController {
    fn signal_network_state(&self, network_state: NetworkState) {
        tracing::info!(state = ?network_state, "Network state signaled");
        self.state.lock().network_state = network_state;
        self.event_log.log(RtcEvent::NetworkAvailability {
            available: network_state.is_up(),
        });
    }

    fn set_bwe_bitrates(
        &self,
        min_bitrate_bps: u32,
        start_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    ) {
        {
            let mut state = self.state.lock();
            Self::reset_bounds(&mut state, min_bitrate_bps, start_bitrate_bps, max_bitrate_bps);
        }
        self.event_log.log(RtcEvent::BweBoundsUpdate {
            min_bps: min_bitrate_bps,
            start_bps: start_bitrate_bps,
            max_bps: max_bitrate_bps,
        });
    }

    fn set_max_total_allocated_bitrate(&self, total_bitrate_bps: u32) {
        self.state.lock().max_total_allocated_bps =
            (total_bitrate_bps > 0).then_some(total_bitrate_bps);
    }

    fn on_network_route_changed(
        &self,
        route: &NetworkRoute,
        start_bitrate_bps: u32,
        min_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    ) {
        {
            let mut state = self.state.lock();
            Self::reset_bounds(&mut state, min_bitrate_bps, start_bitrate_bps, max_bitrate_bps);
            state.transport_overhead_bytes = route.packet_overhead;
            state.clear_feedback_history();
        }
        self.event_log.log(RtcEvent::RouteChange {
            connected: route.connected,
            local_network_id: route.local_network_id,
            remote_network_id: route.remote_network_id,
            packet_overhead: route.packet_overhead,
        });
    }

    fn bandwidth_observer(&self) -> Arc<dyn RtcpBandwidthObserver> {
        self.report_handler.clone()
    }

    fn available_bandwidth(&self) -> Option<u32> {
        let target = self.state.lock().current_target().target_bitrate_bps;
        (target > 0).then_some(target)
    }

    fn register_packet_feedback_observer(&self, observer: Arc<dyn PacketFeedbackObserver>) {
        self.feedback_observers.lock().push(observer);
    }

    fn deregister_packet_feedback_observer(&self, observer: &Arc<dyn PacketFeedbackObserver>) {
        let target = Arc::as_ptr(observer) as *const ();
        self.feedback_observers
            .lock()
            .retain(|o| Arc::as_ptr(o) as *const () != target);
    }

    fn register_network_observer(&self, observer: Arc<dyn NetworkChangedObserver>) {
        self.network_observers.lock().push(observer);
    }

    fn on_sent_packet(&self, sent_packet: &SentPacket) {
        let Some(packet_id) = sent_packet.packet_id else {
            return;
        };
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.get_mut(&(packet_id as u16)) {
            pending.send_time_ms = Some(sent_packet.send_time_ms);
        }
    }

    fn enable_periodic_alr_probing(&self, enable: bool) {
        self.state.lock().periodic_alr_probing = enable;
        self.event_log.log(RtcEvent::AlrProbing { enabled: enable });
    }
}

impl TransportFeedbackObserver for SendSideCongestionController {
    fn add_packet(&self, ssrc: u32, sequence_number: u16, length: usize) {
        {
            let mut state = self.state.lock();
            let packet = PendingPacket {
                ssrc,
                payload_size: length,
                send_time_ms: None,
            };
            if state.pending.insert(sequence_number, packet).is_none() {
                state.pending_order.push_back(sequence_number);
            }
            while state.pending_order.len() > MAX_FEEDBACK_HISTORY {
                if let Some(oldest) = state.pending_order.pop_front() {
                    state.pending.remove(&oldest);
                }
            }
        }

        let observers = self.feedback_observers.lock().clone();
        for observer in observers {
            observer.on_packet_added(ssrc, sequence_number);
        }
    }

    fn on_transport_feedback(&self, feedback: &TransportFeedback) {
        let matched: Vec<PacketFeedback> = {
            let mut state = self.state.lock();
            let matched: Vec<_> = feedback
                .packets
                .iter()
                .filter_map(|status| {
                    state
                        .pending
                        .remove(&status.sequence_number)
                        .map(|pending| PacketFeedback {
                            ssrc: pending.ssrc,
                            sequence_number: status.sequence_number,
                            payload_size: pending.payload_size,
                            send_time_ms: pending.send_time_ms,
                            arrival_time_ms: status.arrival_time_ms,
                        })
                })
                .collect();
            let ControllerState {
                pending,
                pending_order,
                ..
            } = &mut *state;
            pending_order.retain(|seq| pending.contains_key(seq));
            matched
        };

        if matched.is_empty() {
            tracing::debug!("Transport feedback matched no pending packet");
            return;
        }

        let observers = self.feedback_observers.lock().clone();
        for observer in observers {
            observer.on_packet_feedback_vector(&matched);
        }
    }
}

impl CallStatsObserver for SendSideCongestionController {
    fn on_rtt_update(&self, avg_rtt_ms: i64, _max_rtt_ms: i64) {
        self.state.lock().rtt_ms = avg_rtt_ms;
    }
}

impl Module for SendSideCongestionController {
    fn time_until_next_process(&self) -> i64 {
        let now_ms = self.clock.time_in_milliseconds();
        let last = self.state.lock().last_process_ms;
        (self.process_interval_ms - (now_ms - last)).max(0)
    }

    fn process(&self) {
        let now_ms = self.clock.time_in_milliseconds();
        let (update, network_up) = {
            let mut state = self.state.lock();
            state.last_process_ms = now_ms;
            let target = state.current_target();
            if state.last_reported == Some(target) {
                return;
            }
            state.last_reported = Some(target);
            (target, state.network_state.is_up())
        };

        if network_up {
            self.pacer.set_estimated_bitrate(update.target_bitrate_bps);
            self.pacer.resume();
        } else {
            self.pacer.pause();
        }

        self.event_log.log(RtcEvent::TargetBitrate {
            bitrate_bps: update.target_bitrate_bps,
            network_up,
        });

        let observers = self.network_observers.lock().clone();
        for observer in observers {
            observer.on_network_changed(update);
        }
    }
}
