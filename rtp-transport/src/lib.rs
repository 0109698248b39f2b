//! RTP Send Transport Coordination
//!
//! This crate owns the send side of a media transport: it merges bitrate
//! policy from signaling and from the application, detects network route
//! changes per transport, and keeps the pacer and the congestion controller
//! attached to a process thread for as long as the transport lives.

pub mod bitrate;
pub mod controller;
pub mod lifecycle;
pub mod route;

pub use bitrate::{
    BitrateConstraints, BitrateConstraintsMask, BitrateConfigurator, ConstraintsUpdate,
    DEFAULT_START_BITRATE_BPS,
};
pub use controller::{
    RtpKeepAliveConfig, TransportError, TransportSendCoordinator, PROCESS_THREAD_NAME,
};
pub use lifecycle::ModuleLifecycle;
pub use route::{NetworkRouteTracker, RouteDecision};
