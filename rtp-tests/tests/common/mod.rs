//! Recording test doubles shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use rtp_congestion::{
    CallStatsObserver, CongestionController, NetworkChangedObserver, NetworkRoute, NetworkState,
    PacedPacket, Pacer, PacketFeedbackObserver, PacketRouter, RtcpBandwidthObserver,
    RtpPacketSender, SentPacket, TransportFeedback, TransportFeedbackObserver,
};
use rtp_io::{Module, ModuleHandle, ProcessError, ProcessThread};
use rtp_transport::{BitrateConstraints, TransportSendCoordinator};
use std::panic::Location;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Address of the value behind an `Arc`, for identity checks
pub fn addr_of<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacerCall {
    SendBitrateLimits {
        min_send_bitrate_bps: u32,
        max_padding_bitrate_bps: u32,
    },
    PacingFactor(f32),
    QueueTimeLimit(i64),
    EstimatedBitrate(u32),
    Pause,
    Resume,
    InsertPacket(PacedPacket),
}

/// Pacer that records every call
#[derive(Default)]
pub struct MockPacer {
    calls: Mutex<Vec<PacerCall>>,
    queue_in_ms: AtomicI64,
    first_sent_ms: Mutex<Option<i64>>,
    processed: AtomicUsize,
}

impl MockPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PacerCall> {
        self.calls.lock().clone()
    }

    pub fn set_queue_in_ms(&self, ms: i64) {
        self.queue_in_ms.store(ms, Ordering::SeqCst);
    }

    pub fn set_first_sent_ms(&self, ms: Option<i64>) {
        *self.first_sent_ms.lock() = ms;
    }

    pub fn process_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    fn record(&self, call: PacerCall) {
        self.calls.lock().push(call);
    }
}

impl Module for MockPacer {
    fn time_until_next_process(&self) -> i64 {
        5
    }

    fn process(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

impl RtpPacketSender for MockPacer {
    fn insert_packet(&self, packet: PacedPacket) {
        self.record(PacerCall::InsertPacket(packet));
    }
}

impl Pacer for MockPacer {
    fn set_send_bitrate_limits(&self, min_send_bitrate_bps: u32, max_padding_bitrate_bps: u32) {
        self.record(PacerCall::SendBitrateLimits {
            min_send_bitrate_bps,
            max_padding_bitrate_bps,
        });
    }

    fn set_pacing_factor(&self, pacing_factor: f32) {
        self.record(PacerCall::PacingFactor(pacing_factor));
    }

    fn set_queue_time_limit(&self, limit_ms: i64) {
        self.record(PacerCall::QueueTimeLimit(limit_ms));
    }

    fn set_estimated_bitrate(&self, bitrate_bps: u32) {
        self.record(PacerCall::EstimatedBitrate(bitrate_bps));
    }

    fn pause(&self) {
        self.record(PacerCall::Pause);
    }

    fn resume(&self) {
        self.record(PacerCall::Resume);
    }

    fn queue_in_ms(&self) -> i64 {
        self.queue_in_ms.load(Ordering::SeqCst)
    }

    fn first_sent_packet_time_ms(&self) -> Option<i64> {
        *self.first_sent_ms.lock()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    SignalNetworkState(NetworkState),
    SetBweBitrates {
        min_bitrate_bps: u32,
        start_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    },
    MaxTotalAllocatedBitrate(u32),
    NetworkRouteChanged {
        route: NetworkRoute,
        start_bitrate_bps: u32,
        min_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    },
    RegisterPacketFeedbackObserver(usize),
    DeregisterPacketFeedbackObserver(usize),
    RegisterNetworkObserver(usize),
    SentPacket(SentPacket),
    PeriodicAlrProbing(bool),
    AddPacket {
        ssrc: u32,
        sequence_number: u16,
        length: usize,
    },
    TransportFeedback(usize),
    RttUpdate {
        avg_rtt_ms: i64,
        max_rtt_ms: i64,
    },
}

/// Bandwidth observer handed out by [`MockController`]
#[derive(Default)]
pub struct RecordingBandwidthObserver {
    pub estimates: Mutex<Vec<u32>>,
    pub reports: Mutex<Vec<(u8, i64, i64)>>,
}

impl RtcpBandwidthObserver for RecordingBandwidthObserver {
    fn on_received_estimated_bitrate(&self, bitrate_bps: u32) {
        self.estimates.lock().push(bitrate_bps);
    }

    fn on_received_rtcp_receiver_report(&self, fraction_lost: u8, rtt_ms: i64, now_ms: i64) {
        self.reports.lock().push((fraction_lost, rtt_ms, now_ms));
    }
}

/// Congestion controller that records every call
#[derive(Default)]
pub struct MockController {
    calls: Mutex<Vec<ControllerCall>>,
    available: Mutex<Option<u32>>,
    pub bandwidth: Arc<RecordingBandwidthObserver>,
    processed: AtomicUsize,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().clone()
    }

    /// Calls made after construction of the coordinator
    pub fn calls_after_setup(&self) -> Vec<ControllerCall> {
        self.calls.lock().iter().skip(2).cloned().collect()
    }

    pub fn route_changes(&self) -> Vec<ControllerCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, ControllerCall::NetworkRouteChanged { .. }))
            .cloned()
            .collect()
    }

    pub fn bwe_updates(&self) -> Vec<ControllerCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, ControllerCall::SetBweBitrates { .. }))
            .cloned()
            .collect()
    }

    pub fn set_available_bandwidth(&self, bitrate_bps: Option<u32>) {
        *self.available.lock() = bitrate_bps;
    }

    pub fn process_count(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    fn record(&self, call: ControllerCall) {
        self.calls.lock().push(call);
    }
}

impl Module for MockController {
    fn time_until_next_process(&self) -> i64 {
        5
    }

    fn process(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }
}

impl TransportFeedbackObserver for MockController {
    fn add_packet(&self, ssrc: u32, sequence_number: u16, length: usize) {
        self.record(ControllerCall::AddPacket {
            ssrc,
            sequence_number,
            length,
        });
    }

    fn on_transport_feedback(&self, feedback: &TransportFeedback) {
        self.record(ControllerCall::TransportFeedback(feedback.packets.len()));
    }
}

impl CallStatsObserver for MockController {
    fn on_rtt_update(&self, avg_rtt_ms: i64, max_rtt_ms: i64) {
        self.record(ControllerCall::RttUpdate {
            avg_rtt_ms,
            max_rtt_ms,
        });
    }
}

impl CongestionController for MockController {
    fn signal_network_state(&self, state: NetworkState) {
        self.record(ControllerCall::SignalNetworkState(state));
    }

    fn set_bwe_bitrates(
        &self,
        min_bitrate_bps: u32,
        start_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    ) {
        self.record(ControllerCall::SetBweBitrates {
            min_bitrate_bps,
            start_bitrate_bps,
            max_bitrate_bps,
        });
    }

    fn set_max_total_allocated_bitrate(&self, total_bitrate_bps: u32) {
        self.record(ControllerCall::MaxTotalAllocatedBitrate(total_bitrate_bps));
    }

    fn on_network_route_changed(
        &self,
        route: &NetworkRoute,
        start_bitrate_bps: u32,
        min_bitrate_bps: u32,
        max_bitrate_bps: Option<u32>,
    ) {
        self.record(ControllerCall::NetworkRouteChanged {
            route: *route,
            start_bitrate_bps,
            min_bitrate_bps,
            max_bitrate_bps,
        });
    }

    fn bandwidth_observer(&self) -> Arc<dyn RtcpBandwidthObserver> {
        self.bandwidth.clone()
    }

    fn available_bandwidth(&self) -> Option<u32> {
        *self.available.lock()
    }

    fn register_packet_feedback_observer(&self, observer: Arc<dyn PacketFeedbackObserver>) {
        self.record(ControllerCall::RegisterPacketFeedbackObserver(addr_of(
            &observer,
        )));
    }

    fn deregister_packet_feedback_observer(&self, observer: &Arc<dyn PacketFeedbackObserver>) {
        self.record(ControllerCall::DeregisterPacketFeedbackObserver(addr_of(
            observer,
        )));
    }

    fn register_network_observer(&self, observer: Arc<dyn NetworkChangedObserver>) {
        self.record(ControllerCall::RegisterNetworkObserver(addr_of(&observer)));
    }

    fn on_sent_packet(&self, sent_packet: &SentPacket) {
        self.record(ControllerCall::SentPacket(*sent_packet));
    }

    fn enable_periodic_alr_probing(&self, enable: bool) {
        self.record(ControllerCall::PeriodicAlrProbing(enable));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCall {
    Register { id: u64, module: usize },
    Deregister(u64),
    Start,
    Stop,
}

/// Process thread that only records what it is asked to do
#[derive(Default)]
pub struct RecordingThread {
    calls: Mutex<Vec<ThreadCall>>,
    next_id: AtomicU64,
    fail_start: bool,
}

impl RecordingThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        RecordingThread {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ThreadCall> {
        self.calls.lock().clone()
    }
}

impl ProcessThread for RecordingThread {
    fn start(&self) -> Result<(), ProcessError> {
        self.calls.lock().push(ThreadCall::Start);
        if self.fail_start {
            return Err(ProcessError::AlreadyRunning);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), ProcessError> {
        self.calls.lock().push(ThreadCall::Stop);
        Ok(())
    }

    fn register_module(
        &self,
        module: Arc<dyn Module>,
        location: &'static Location<'static>,
    ) -> ModuleHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push(ThreadCall::Register {
            id,
            module: addr_of(&module),
        });
        ModuleHandle::new(id, location)
    }

    fn deregister_module(&self, handle: ModuleHandle) {
        self.calls.lock().push(ThreadCall::Deregister(handle.id()));
    }

    fn wake_up(&self, _handle: &ModuleHandle) {}
}

/// Coordinator wired to recording doubles
pub struct Harness {
    pub coordinator: TransportSendCoordinator<MockPacer, MockController>,
    pub pacer: Arc<MockPacer>,
    pub controller: Arc<MockController>,
    pub thread: Arc<RecordingThread>,
    pub packet_router: Arc<PacketRouter>,
}

pub fn harness(config: BitrateConstraints) -> Harness {
    let pacer = Arc::new(MockPacer::new());
    let controller = Arc::new(MockController::new());
    let thread = Arc::new(RecordingThread::new());
    let packet_router = Arc::new(PacketRouter::new());

    let coordinator = TransportSendCoordinator::with_parts(
        config,
        packet_router.clone(),
        pacer.clone(),
        controller.clone(),
        thread.clone(),
    )
    .expect("recording thread starts");

    Harness {
        coordinator,
        pacer,
        controller,
        thread,
        packet_router,
    }
}
