//! Packet pacer
//!
//! Spreads outgoing packets over time. The pacer does not decide how fast to
//! send: the congestion controller pushes the estimate, the transport pushes
//! the allocation limits, and the pacer drains its queue at
//! `max(estimate, min_send) * pacing_factor`.

use crate::packet_router::PacketRouter;
use parking_lot::Mutex;
use rtp_io::{Clock, EventLog, Module, ModuleWaker, RtcEvent};
use std::collections::VecDeque;
use std::sync::Arc;

/// Default multiplier applied to the estimate
pub const DEFAULT_PACING_FACTOR: f32 = 2.5;

/// Default upper bound on how long a packet may wait in the queue
pub const DEFAULT_QUEUE_TIME_LIMIT_MS: i64 = 2_000;

/// Minimum interval between two process calls
const MIN_PROCESS_INTERVAL_MS: i64 = 5;

/// Longest elapsed time credited in a single process call
const MAX_ELAPSED_MS: i64 = 30;

/// Process interval while paused
const PAUSED_PROCESS_INTERVAL_MS: i64 = 500;

/// Packet handed to the pacer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacedPacket {
    /// Media source
    pub ssrc: u32,
    /// RTP sequence number
    pub sequence_number: u16,
    /// Capture time of the media in the packet
    pub capture_time_ms: i64,
    /// Packet size in bytes
    pub size_bytes: usize,
    /// Whether the packet is a retransmission
    pub retransmission: bool,
}

/// Queues packets for paced sending
pub trait RtpPacketSender: Send + Sync {
    fn insert_packet(&self, packet: PacedPacket);
}

/// Pacer contract driven by the transport and the congestion controller
pub trait Pacer: Module + RtpPacketSender {
    /// Minimum rate to send at and maximum padding rate, from the allocator
    fn set_send_bitrate_limits(&self, min_send_bitrate_bps: u32, max_padding_bitrate_bps: u32);

    /// Multiplier applied to the estimate when draining the queue
    fn set_pacing_factor(&self, pacing_factor: f32);

    /// Longest time a packet should wait in the queue
    fn set_queue_time_limit(&self, limit_ms: i64);

    /// Current bandwidth estimate, from the congestion controller
    fn set_estimated_bitrate(&self, bitrate_bps: u32);

    /// Stop sending
    fn pause(&self);

    /// Resume sending
    fn resume(&self);

    /// Age of the oldest queued packet
    fn queue_in_ms(&self) -> i64;

    /// When the first packet was sent, `None` before that
    fn first_sent_packet_time_ms(&self) -> Option<i64>;
}

#[derive(Debug, Clone, Copy)]
struct QueuedPacket {
    packet: PacedPacket,
    enqueue_time_ms: i64,
}

#[derive(Debug)]
struct PacerState {
    estimated_bitrate_bps: u32,
    min_send_bitrate_bps: u32,
    max_padding_bitrate_bps: u32,
    pacing_factor: f32,
    queue_time_limit_ms: i64,
    paused: bool,
    queue: VecDeque<QueuedPacket>,
    queue_bytes: usize,
    media_budget_bytes: i64,
    padding_budget_bytes: i64,
    first_sent_packet_ms: Option<i64>,
    last_process_ms: i64,
}

impl PacerState {
    fn pacing_bitrate_bps(&self) -> u64 {
        let base = self.estimated_bitrate_bps.max(self.min_send_bitrate_bps);
        (base as f64 * self.pacing_factor as f64) as u64
    }

    /// Pacing rate, raised so the queue drains within the time limit
    fn media_bitrate_bps(&self, now_ms: i64) -> u64 {
        let mut rate = self.pacing_bitrate_bps();
        if let Some(oldest) = self.queue.front() {
            let queued_ms = now_ms.saturating_sub(oldest.enqueue_time_ms);
            let time_left_ms = self.queue_time_limit_ms.saturating_sub(queued_ms).max(1);
            let needed = (self.queue_bytes as u64 * 8_000) / time_left_ms as u64;
            rate = rate.max(needed);
        }
        rate
    }
}

/// Budget based pacer sending through a [`PacketRouter`]
///
/// While attached to a process thread the pacer wakes it when sending
/// resumes and when a packet lands in an empty queue, so neither waits for
/// a callback scheduled while the pacer was paused or idle.
pub struct PacedSender {
    clock: Arc<dyn Clock>,
    event_log: Arc<dyn EventLog>,
    router: Arc<PacketRouter>,
    state: Mutex<PacerState>,
    process_thread: Mutex<Option<ModuleWaker>>,
}

impl PacedSender {
    /// Create a pacer sending through `router`
    pub fn new(
        clock: Arc<dyn Clock>,
        router: Arc<PacketRouter>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        let now_ms = clock.time_in_milliseconds();
        PacedSender {
            clock,
            event_log,
            router,
            state: Mutex::new(PacerState {
                estimated_bitrate_bps: 0,
                min_send_bitrate_bps: 0,
                max_padding_bitrate_bps: 0,
                pacing_factor: DEFAULT_PACING_FACTOR,
                queue_time_limit_ms: DEFAULT_QUEUE_TIME_LIMIT_MS,
                paused: false,
                queue: VecDeque::new(),
                queue_bytes: 0,
                media_budget_bytes: 0,
                padding_budget_bytes: 0,
                first_sent_packet_ms: None,
                last_process_ms: now_ms,
            }),
            process_thread: Mutex::new(None),
        }
    }

    /// Ask the process thread, if any, to process the pacer now
    fn wake_process_thread(&self) {
        let waker = self.process_thread.lock().clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Number of queued packets
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Bytes currently queued
    pub fn queue_size_bytes(&self) -> usize {
        self.state.lock().queue_bytes
    }

    /// Whether the pacer is paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Rate the queue is drained at when not behind
    pub fn pacing_bitrate_bps(&self) -> u64 {
        self.state.lock().pacing_bitrate_bps()
    }

    /// Send queued media while budget is left
    ///
    /// The state lock is released around router calls so a send module may
    /// queue new packets from inside `time_to_send_packet`.
    fn send_media(&self, now_ms: i64) -> bool {
        let mut sent_any = false;
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.media_budget_bytes <= 0 {
                    break;
                }
                let Some(queued) = state.queue.pop_front() else {
                    break;
                };
                state.queue_bytes -= queued.packet.size_bytes;
                queued
            };

            let packet = next.packet;
            let sent = self.router.time_to_send_packet(
                packet.ssrc,
                packet.sequence_number,
                packet.capture_time_ms,
                packet.retransmission,
            );

            let mut state = self.state.lock();
            if sent {
                state.media_budget_bytes -= packet.size_bytes as i64;
                state.padding_budget_bytes -= packet.size_bytes as i64;
                state.first_sent_packet_ms.get_or_insert(now_ms);
                sent_any = true;
            } else {
                tracing::trace!(
                    ssrc = packet.ssrc,
                    sequence_number = packet.sequence_number,
                    "Paced packet dropped by its send module"
                );
            }
        }
        sent_any
    }

    fn send_padding(&self) {
        let bytes = {
            let state = self.state.lock();
            // Padding only after media started flowing.
            if !state.queue.is_empty() || state.first_sent_packet_ms.is_none() {
                return;
            }
            state.padding_budget_bytes.min(state.media_budget_bytes)
        };
        if bytes <= 0 {
            return;
        }

        let sent = self.router.time_to_send_padding(bytes as usize) as i64;
        let mut state = self.state.lock();
        state.padding_budget_bytes -= sent;
        state.media_budget_bytes -= sent;
    }
}

impl RtpPacketSender for PacedSender {
    fn insert_packet(&self, packet: PacedPacket) {
        let now_ms = self.clock.time_in_milliseconds();
        let was_idle = {
            let mut state = self.state.lock();
            let was_idle = state.queue.is_empty() && !state.paused;
            state.queue_bytes += packet.size_bytes;
            state.queue.push_back(QueuedPacket {
                packet,
                enqueue_time_ms: now_ms,
            });
            was_idle
        };
        if was_idle {
            self.wake_process_thread();
        }
    }
}

impl Pacer for PacedSender {
    fn set_send_bitrate_limits(&self, min_send_bitrate_bps: u32, max_padding_bitrate_bps: u32) {
        {
            let mut state = self.state.lock();
            state.min_send_bitrate_bps = min_send_bitrate_bps;
            state.max_padding_bitrate_bps = max_padding_bitrate_bps;
        }
        self.event_log.log(RtcEvent::PacerLimits {
            min_send_bitrate_bps,
            max_padding_bitrate_bps,
        });
    }

    fn set_pacing_factor(&self, pacing_factor: f32) {
        self.state.lock().pacing_factor = pacing_factor;
    }

    fn set_queue_time_limit(&self, limit_ms: i64) {
        self.state.lock().queue_time_limit_ms = limit_ms;
    }

    fn set_estimated_bitrate(&self, bitrate_bps: u32) {
        self.state.lock().estimated_bitrate_bps = bitrate_bps;
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if !state.paused {
            tracing::info!("Pacer paused");
        }
        state.paused = true;
    }

    fn resume(&self) {
        let was_paused = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.paused, false)
        };
        if was_paused {
            tracing::info!("Pacer resumed");
            self.wake_process_thread();
        }
    }

    fn queue_in_ms(&self) -> i64 {
        let now_ms = self.clock.time_in_milliseconds();
        let state = self.state.lock();
        state
            .queue
            .front()
            .map_or(0, |oldest| now_ms.saturating_sub(oldest.enqueue_time_ms))
    }

    fn first_sent_packet_time_ms(&self) -> Option<i64> {
        self.state.lock().first_sent_packet_ms
    }
}

impl Module for PacedSender {
    fn time_until_next_process(&self) -> i64 {
        let now_ms = self.clock.time_in_milliseconds();
        let state = self.state.lock();
        let elapsed_ms = now_ms - state.last_process_ms;
        let interval = if state.paused {
            PAUSED_PROCESS_INTERVAL_MS
        } else {
            MIN_PROCESS_INTERVAL_MS
        };
        (interval - elapsed_ms).max(0)
    }

    fn process_thread_attached(&self, waker: Option<ModuleWaker>) {
        *self.process_thread.lock() = waker;
    }

    fn process(&self) {
        let now_ms = self.clock.time_in_milliseconds();
        {
            let mut state = self.state.lock();
            let elapsed_ms = (now_ms - state.last_process_ms).clamp(0, MAX_ELAPSED_MS);
            state.last_process_ms = now_ms;
            if state.paused {
                return;
            }

            let media_rate = state.media_bitrate_bps(now_ms) as i64;
            let max_media_budget = media_rate * MAX_ELAPSED_MS / 8_000;
            state.media_budget_bytes =
                (state.media_budget_bytes.max(0) + media_rate * elapsed_ms / 8_000)
                    .min(max_media_budget);

            let padding_rate = state.max_padding_bitrate_bps as i64;
            let max_padding_budget = padding_rate * MAX_ELAPSED_MS / 8_000;
            state.padding_budget_bytes =
                (state.padding_budget_bytes.max(0) + padding_rate * elapsed_ms / 8_000)
                    .min(max_padding_budget);
        }

        if !self.send_media(now_ms) {
            self.send_padding();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_router::RtpSendModule;
    use rtp_io::{NullEventLog, SimulatedClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SinkModule {
        sent: Mutex<Vec<u16>>,
        padded: Mutex<usize>,
    }

    impl RtpSendModule for SinkModule {
        fn ssrc(&self) -> u32 {
            1
        }

        fn time_to_send_packet(&self, sequence_number: u16, _: i64, _: bool) -> bool {
            self.sent.lock().push(sequence_number);
            true
        }

        fn time_to_send_padding(&self, bytes: usize) -> usize {
            *self.padded.lock() += bytes;
            bytes
        }
    }

    fn setup() -> (Arc<SimulatedClock>, Arc<SinkModule>, PacedSender) {
        let clock = Arc::new(SimulatedClock::new(0));
        let sink = Arc::new(SinkModule {
            sent: Mutex::new(Vec::new()),
            padded: Mutex::new(0),
        });
        let router = Arc::new(PacketRouter::new());
        router.add_send_module(sink.clone());
        let pacer = PacedSender::new(clock.clone(), router, Arc::new(NullEventLog));
        (clock, sink, pacer)
    }

    fn packet(sequence_number: u16) -> PacedPacket {
        PacedPacket {
            ssrc: 1,
            sequence_number,
            capture_time_ms: 0,
            size_bytes: 1_000,
            retransmission: false,
        }
    }

    #[test]
    fn test_drains_queue_in_order() {
        let (clock, sink, pacer) = setup();
        pacer.set_estimated_bitrate(1_000_000);

        for seq in 0..3 {
            pacer.insert_packet(packet(seq));
        }
        assert_eq!(pacer.queue_len(), 3);
        assert_eq!(pacer.first_sent_packet_time_ms(), None);

        for _ in 0..20 {
            clock.advance_ms(5);
            pacer.process();
        }

        assert_eq!(*sink.sent.lock(), vec![0, 1, 2]);
        assert_eq!(pacer.queue_len(), 0);
        assert_eq!(pacer.first_sent_packet_time_ms(), Some(5));
    }

    #[test]
    fn test_pacing_rate_uses_min_send_and_factor() {
        let (_clock, _sink, pacer) = setup();
        pacer.set_estimated_bitrate(100_000);
        assert_eq!(pacer.pacing_bitrate_bps(), 250_000);

        pacer.set_send_bitrate_limits(200_000, 0);
        pacer.set_pacing_factor(1.0);
        assert_eq!(pacer.pacing_bitrate_bps(), 200_000);
    }

    #[test]
    fn test_paused_pacer_sends_nothing() {
        let (clock, sink, pacer) = setup();
        pacer.set_estimated_bitrate(1_000_000);
        pacer.pause();
        pacer.insert_packet(packet(1));

        clock.advance_ms(10);
        pacer.process();
        assert!(sink.sent.lock().is_empty());
        assert!(pacer.time_until_next_process() > MIN_PROCESS_INTERVAL_MS);

        pacer.resume();
        clock.advance_ms(10);
        pacer.process();
        assert_eq!(*sink.sent.lock(), vec![1]);
    }

    #[test]
    fn test_queue_in_ms_tracks_oldest_packet() {
        let (clock, _sink, pacer) = setup();
        assert_eq!(pacer.queue_in_ms(), 0);

        pacer.insert_packet(packet(1));
        clock.advance_ms(40);
        pacer.insert_packet(packet(2));
        assert_eq!(pacer.queue_in_ms(), 40);
    }

    #[test]
    fn test_queue_time_limit_raises_rate() {
        let (clock, sink, pacer) = setup();
        // No estimate at all: only the queue time limit can drain the queue.
        pacer.set_queue_time_limit(100);
        for seq in 0..5 {
            pacer.insert_packet(packet(seq));
        }

        for _ in 0..30 {
            clock.advance_ms(5);
            pacer.process();
        }
        assert_eq!(sink.sent.lock().len(), 5);
    }

    fn attach_counting_waker(pacer: &PacedSender) -> Arc<AtomicUsize> {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        pacer.process_thread_attached(Some(ModuleWaker::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        wakes
    }

    #[test]
    fn test_resume_wakes_process_thread() {
        let (_clock, _sink, pacer) = setup();
        let wakes = attach_counting_waker(&pacer);

        pacer.resume();
        assert_eq!(wakes.load(Ordering::SeqCst), 0);

        pacer.pause();
        pacer.resume();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        pacer.process_thread_attached(None);
        pacer.pause();
        pacer.resume();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_insert_into_idle_queue_wakes_process_thread() {
        let (_clock, _sink, pacer) = setup();
        let wakes = attach_counting_waker(&pacer);

        pacer.insert_packet(packet(1));
        pacer.insert_packet(packet(2));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        let (_clock, _sink, paused) = setup();
        let wakes = attach_counting_waker(&paused);
        paused.pause();
        paused.insert_packet(packet(1));
        assert_eq!(wakes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extreme_queue_time_limit_does_not_panic() {
        let (clock, sink, pacer) = setup();
        pacer.set_estimated_bitrate(100_000);
        pacer.insert_packet(packet(1));

        pacer.set_queue_time_limit(i64::MIN);
        clock.advance_ms(5);
        pacer.process();
        assert_eq!(*sink.sent.lock(), vec![1]);

        pacer.insert_packet(packet(2));
        pacer.set_queue_time_limit(i64::MAX);
        clock.advance_ms(5);
        pacer.process();
        assert_eq!(pacer.queue_in_ms(), 0);
    }

    #[test]
    fn test_padding_after_media_when_idle() {
        let (clock, sink, pacer) = setup();
        pacer.set_estimated_bitrate(1_000_000);
        pacer.set_send_bitrate_limits(0, 800_000);

        clock.advance_ms(5);
        pacer.process();
        assert_eq!(*sink.padded.lock(), 0);

        pacer.insert_packet(packet(1));
        clock.advance_ms(5);
        pacer.process();
        clock.advance_ms(10);
        pacer.process();
        assert!(*sink.padded.lock() > 0);
    }
}
