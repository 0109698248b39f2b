//! Send-side transport coordinator
//!
//! Owns the pacer, the congestion controller and the packet router of a
//! transport, applies bitrate policy and route changes to them, and keeps
//! both modules attached to a process thread for its whole lifetime.

use crate::bitrate::{
    BitrateConfigurator, BitrateConstraints, BitrateConstraintsMask, ConstraintsUpdate,
};
use crate::lifecycle::ModuleLifecycle;
use crate::route::{NetworkRouteTracker, RouteDecision};
use parking_lot::Mutex;
use rtp_congestion::{
    CallStatsObserver, CongestionController, CongestionControllerFactory, NetworkChangedObserver,
    NetworkRoute, NetworkState, PacedSender, Pacer, PacketFeedbackObserver, PacketRouter,
    RtcpBandwidthObserver, RtpPacketSender, SendSideCongestionController,
    SendSideControllerFactory, SentPacket, TransportFeedbackObserver,
};
use rtp_io::{Clock, EventLog, ModuleProcessThread, ProcessError, ProcessThread};
use std::sync::Arc;
use thiserror::Error;

/// Name of the process thread created by the default constructors
pub const PROCESS_THREAD_NAME: &str = "SendControllerThread";

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Process thread error: {0}")]
    Process(#[from] ProcessError),
}

/// Keepalive settings, stored and handed back untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpKeepAliveConfig {
    /// Idle time before a keepalive is sent, `-1` disables keepalives
    pub timeout_interval_ms: i64,
    /// Payload type of keepalive packets, `-1` if unset
    pub payload_type: i32,
}

impl Default for RtpKeepAliveConfig {
    fn default() -> Self {
        RtpKeepAliveConfig {
            timeout_interval_ms: -1,
            payload_type: -1,
        }
    }
}

/// Policy state touched by API calls; never by the process thread
struct PolicyState {
    configurator: BitrateConfigurator,
    routes: NetworkRouteTracker,
}

/// Send-side transport coordinator
///
/// All methods take `&self` and may be called from any thread. The policy
/// lock is only held while deciding, never while calling into the pacer or
/// the controller.
pub struct TransportSendCoordinator<P = PacedSender, C = SendSideCongestionController> {
    packet_router: Arc<PacketRouter>,
    pacer: Arc<P>,
    controller: Arc<C>,
    policy: Mutex<PolicyState>,
    keepalive: Mutex<RtpKeepAliveConfig>,
    lifecycle: ModuleLifecycle,
}

impl TransportSendCoordinator<PacedSender, SendSideCongestionController> {
    /// Build the default stack: paced sender, send-side controller and a
    /// dedicated process thread
    pub fn new(
        clock: Arc<dyn Clock>,
        event_log: Arc<dyn EventLog>,
        bitrate_config: BitrateConstraints,
    ) -> Result<Self, TransportError> {
        Self::with_factory(
            clock,
            event_log,
            bitrate_config,
            &SendSideControllerFactory::new(),
        )
    }
}

impl<C> TransportSendCoordinator<PacedSender, C>
where
    C: CongestionController + 'static,
{
    /// Build a paced sender and a dedicated process thread, and get the
    /// controller from `factory`
    pub fn with_factory<F>(
        clock: Arc<dyn Clock>,
        event_log: Arc<dyn EventLog>,
        bitrate_config: BitrateConstraints,
        factory: &F,
    ) -> Result<Self, TransportError>
    where
        F: CongestionControllerFactory<Controller = C>,
    {
        let packet_router = Arc::new(PacketRouter::new());
        let pacer = Arc::new(PacedSender::new(
            Arc::clone(&clock),
            Arc::clone(&packet_router),
            Arc::clone(&event_log),
        ));
        let controller = factory.create(Arc::clone(&clock), event_log, pacer.clone());
        let process_thread = Arc::new(ModuleProcessThread::new(PROCESS_THREAD_NAME, clock));

        tracing::debug!(
            process_interval_ms = factory.process_interval().as_millis() as u64,
            "Congestion controller created"
        );
        Self::with_parts(bitrate_config, packet_router, pacer, controller, process_thread)
    }
}

impl<P, C> TransportSendCoordinator<P, C>
where
    P: Pacer + 'static,
    C: CongestionController + 'static,
{
    /// Assemble a coordinator from existing parts
    ///
    /// The controller starts with the network down and `bitrate_config` as
    /// its bounds. Then the pacer and the controller are registered with
    /// `process_thread` and the thread is started.
    pub fn with_parts(
        bitrate_config: BitrateConstraints,
        packet_router: Arc<PacketRouter>,
        pacer: Arc<P>,
        controller: Arc<C>,
        process_thread: Arc<dyn ProcessThread>,
    ) -> Result<Self, TransportError> {
        controller.signal_network_state(NetworkState::Down);
        controller.set_bwe_bitrates(
            bitrate_config.min_bitrate_bps,
            bitrate_config.start_bitrate_bps,
            bitrate_config.max_bitrate_bps,
        );

        let lifecycle = ModuleLifecycle::start(process_thread, pacer.clone(), controller.clone())?;

        Ok(TransportSendCoordinator {
            packet_router,
            pacer,
            controller,
            policy: Mutex::new(PolicyState {
                configurator: BitrateConfigurator::new(bitrate_config),
                routes: NetworkRouteTracker::new(),
            }),
            keepalive: Mutex::new(RtpKeepAliveConfig::default()),
            lifecycle,
        })
    }

    /// Router the pacer sends through
    pub fn packet_router(&self) -> &Arc<PacketRouter> {
        &self.packet_router
    }

    /// Pacer owned by this transport
    pub fn pacer(&self) -> &Arc<P> {
        &self.pacer
    }

    /// Congestion controller owned by this transport
    pub fn congestion_controller(&self) -> &Arc<C> {
        &self.controller
    }

    /// Where outgoing packets are queued for pacing
    pub fn packet_sender(&self) -> Arc<dyn RtpPacketSender> {
        self.pacer.clone()
    }

    /// Sink for transport-wide feedback
    pub fn transport_feedback_observer(&self) -> Arc<dyn TransportFeedbackObserver> {
        self.controller.clone()
    }

    /// Sink for round trip time updates
    pub fn call_stats_observer(&self) -> Arc<dyn CallStatsObserver> {
        self.controller.clone()
    }

    /// Sink for RTCP receiver reports and REMB
    pub fn bandwidth_observer(&self) -> Arc<dyn RtcpBandwidthObserver> {
        self.controller.bandwidth_observer()
    }

    /// Stored keepalive settings
    pub fn keep_alive_config(&self) -> RtpKeepAliveConfig {
        *self.keepalive.lock()
    }

    /// Replace the stored keepalive settings
    pub fn set_keep_alive_config(&self, config: RtpKeepAliveConfig) {
        *self.keepalive.lock() = config;
    }

    /// Effective bitrate constraints
    pub fn bitrate_constraints(&self) -> BitrateConstraints {
        self.policy.lock().configurator.current()
    }

    /// Limits from the bitrate allocator, fanned out as is
    pub fn set_allocated_send_bitrate_limits(
        &self,
        min_send_bitrate_bps: u32,
        max_padding_bitrate_bps: u32,
        max_total_bitrate_bps: u32,
    ) {
        self.pacer
            .set_send_bitrate_limits(min_send_bitrate_bps, max_padding_bitrate_bps);
        self.controller
            .set_max_total_allocated_bitrate(max_total_bitrate_bps);
    }

    /// Multiplier the pacer applies to the estimate
    pub fn set_pacing_factor(&self, pacing_factor: f32) {
        self.pacer.set_pacing_factor(pacing_factor);
    }

    /// Longest time a packet should wait in the pacer queue
    pub fn set_queue_time_limit(&self, limit_ms: i64) {
        self.pacer.set_queue_time_limit(limit_ms);
    }

    /// Get per-packet feedback from the controller
    pub fn register_packet_feedback_observer(&self, observer: Arc<dyn PacketFeedbackObserver>) {
        self.controller.register_packet_feedback_observer(observer);
    }

    /// Stop feedback to an observer added earlier
    pub fn deregister_packet_feedback_observer(&self, observer: &Arc<dyn PacketFeedbackObserver>) {
        self.controller.deregister_packet_feedback_observer(observer);
    }

    /// Get target rate updates from the controller
    pub fn register_network_observer(&self, observer: Arc<dyn NetworkChangedObserver>) {
        self.controller.register_network_observer(observer);
    }

    /// Route report from the network layer
    ///
    /// Bandwidth estimation is reset to the effective constraints only when
    /// an already connected transport moves to a different path.
    pub fn on_network_route_changed(&self, transport_name: &str, route: &NetworkRoute) {
        let reset = {
            let mut policy = self.policy.lock();
            match policy.routes.on_route_report(transport_name, *route) {
                RouteDecision::Changed => Some(policy.configurator.current()),
                RouteDecision::FirstConnection => {
                    tracing::debug!(transport = transport_name, "First connection, no BWE reset");
                    None
                }
                RouteDecision::Ignore => None,
            }
        };
        let Some(bitrate_config) = reset else {
            return;
        };

        tracing::info!(
            transport = transport_name,
            local_network_id = route.local_network_id,
            remote_network_id = route.remote_network_id,
            min_bps = bitrate_config.min_bitrate_bps,
            start_bps = bitrate_config.start_bitrate_bps,
            max_bps = ?bitrate_config.max_bitrate_bps,
            "Network route changed, resetting bitrates"
        );
        assert!(
            bitrate_config.start_bitrate_bps > 0,
            "BWE reset on transport {} without a start bitrate",
            transport_name
        );
        self.controller.on_network_route_changed(
            route,
            bitrate_config.start_bitrate_bps,
            bitrate_config.min_bitrate_bps,
            bitrate_config.max_bitrate_bps,
        );
    }

    /// Network went up or down; forwarded on every call
    pub fn on_network_availability(&self, network_available: bool) {
        self.controller
            .signal_network_state(NetworkState::from(network_available));
    }

    /// Latest bandwidth estimate, `None` before there is one
    pub fn available_bandwidth(&self) -> Option<u32> {
        self.controller.available_bandwidth()
    }

    /// Age of the oldest packet in the pacer queue
    pub fn pacer_queuing_delay_ms(&self) -> i64 {
        self.pacer.queue_in_ms()
    }

    /// When the pacer sent its first packet
    pub fn first_packet_time_ms(&self) -> Option<i64> {
        self.pacer.first_sent_packet_time_ms()
    }

    /// Toggle probing while the sender is application limited
    pub fn enable_periodic_alr_probing(&self, enable: bool) {
        self.controller.enable_periodic_alr_probing(enable);
    }

    /// Packet left the socket
    pub fn on_sent_packet(&self, sent_packet: &SentPacket) {
        self.controller.on_sent_packet(sent_packet);
    }

    /// New baseline from signaling
    pub fn set_sdp_bitrate_parameters(&self, constraints: BitrateConstraints) {
        let update = self
            .policy
            .lock()
            .configurator
            .update_with_sdp_parameters(constraints);
        self.apply_constraints(update, "set_sdp_bitrate_parameters");
    }

    /// New preferences from the application
    pub fn set_client_bitrate_preferences(&self, preferences: BitrateConstraintsMask) {
        let update = self
            .policy
            .lock()
            .configurator
            .update_with_client_preferences(preferences);
        self.apply_constraints(update, "set_client_bitrate_preferences");
    }

    fn apply_constraints(&self, update: ConstraintsUpdate, source: &'static str) {
        match update {
            ConstraintsUpdate::Changed(updated) => self.controller.set_bwe_bitrates(
                updated.min_bitrate_bps,
                updated.start_bitrate_bps,
                updated.max_bitrate_bps,
            ),
            ConstraintsUpdate::NoChange => {
                tracing::debug!(source, "Bitrate constraints: nothing to update");
            }
        }
    }

    /// Detach the pacer and the controller from the process thread
    ///
    /// Also runs on drop. After this the modules are no longer processed.
    pub fn shutdown(&mut self) {
        self.lifecycle.shutdown();
    }

    /// Whether the modules are still attached
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_active()
    }
}

impl<P, C> Drop for TransportSendCoordinator<P, C> {
    fn drop(&mut self) {
        // Detach before the owned modules go away.
        self.lifecycle.shutdown();
    }
}
