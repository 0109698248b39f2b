//! RTP Send I/O and Platform Abstraction
//!
//! This crate provides the platform pieces the send-side transport is built
//! on: a monotonic clock abstraction, the cooperative process thread that
//! drives periodic modules, and the event log sink.

pub mod event_log;
pub mod process;
pub mod time;

pub use event_log::{EventLog, MemoryEventLog, NullEventLog, RtcEvent, TracingEventLog};
pub use process::{
    Module, ModuleHandle, ModuleProcessThread, ModuleWaker, ProcessError, ProcessThread,
};
pub use time::{Clock, SimulatedClock, SystemClock};
