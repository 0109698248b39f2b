//! Congestion controller factory
//!
//! Lets the transport build its controller without naming the concrete type
//! and tells it how often the controller wants to be processed.

use crate::controller::{
    CongestionController, SendSideCongestionController, DEFAULT_PROCESS_INTERVAL,
};
use crate::pacer::Pacer;
use rtp_io::{Clock, EventLog};
use std::sync::Arc;
use std::time::Duration;

/// Builds congestion controllers
pub trait CongestionControllerFactory {
    type Controller: CongestionController + 'static;

    /// Create a controller that drives `pacer`
    fn create(
        &self,
        clock: Arc<dyn Clock>,
        event_log: Arc<dyn EventLog>,
        pacer: Arc<dyn Pacer>,
    ) -> Arc<Self::Controller>;

    /// How often created controllers want `process` to run
    fn process_interval(&self) -> Duration;
}

/// Factory for [`SendSideCongestionController`]
#[derive(Debug, Clone, Copy)]
pub struct SendSideControllerFactory {
    process_interval: Duration,
}

impl SendSideControllerFactory {
    /// Factory with the default process interval
    pub fn new() -> Self {
        SendSideControllerFactory {
            process_interval: DEFAULT_PROCESS_INTERVAL,
        }
    }

    /// Factory with a custom process interval
    pub fn with_process_interval(process_interval: Duration) -> Self {
        SendSideControllerFactory { process_interval }
    }
}

impl Default for SendSideControllerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionControllerFactory for SendSideControllerFactory {
    type Controller = SendSideCongestionController;

    fn create(
        &self,
        clock: Arc<dyn Clock>,
        event_log: Arc<dyn EventLog>,
        pacer: Arc<dyn Pacer>,
    ) -> Arc<SendSideCongestionController> {
        Arc::new(SendSideCongestionController::new(
            clock,
            event_log,
            pacer,
            self.process_interval,
        ))
    }

    fn process_interval(&self) -> Duration {
        self.process_interval
    }
}
