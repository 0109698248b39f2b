//! Send-side pacing and congestion control collaborators
//!
//! This crate holds the contracts the transport coordinator drives (the
//! [`Pacer`] and [`CongestionController`] traits and the observer traits)
//! together with the in-tree implementations: a budget based
//! [`PacedSender`], the bounds keeping [`SendSideCongestionController`] and
//! the [`PacketRouter`] both hand packets through.

pub mod controller;
pub mod factory;
pub mod network;
pub mod observer;
pub mod pacer;
pub mod packet_router;

pub use controller::{CongestionController, SendSideCongestionController};
pub use factory::{CongestionControllerFactory, SendSideControllerFactory};
pub use network::{
    NetworkRoute, NetworkState, PacketFeedback, PacketStatus, SentPacket, TargetTransferRate,
    TransportFeedback,
};
pub use observer::{
    CallStatsObserver, NetworkChangedObserver, PacketFeedbackObserver, RtcpBandwidthObserver,
    TransportFeedbackObserver,
};
pub use pacer::{PacedPacket, PacedSender, Pacer, RtpPacketSender};
pub use packet_router::{PacketRouter, RtpSendModule};
