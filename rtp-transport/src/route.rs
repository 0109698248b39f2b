//! Network route change detection
//!
//! Bandwidth estimation is reset only when the path of an already connected
//! transport changes. The first connection and repeated reports of the same
//! path leave the estimator alone.

use rtp_congestion::NetworkRoute;
use std::collections::HashMap;

/// What a route report means for bandwidth estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Disconnected, or the same path as before
    Ignore,
    /// First connected route seen for the transport
    FirstConnection,
    /// The transport moved to a different path
    Changed,
}

/// Last known route per transport name
///
/// Entries are replaced but never removed; a disconnect does not evict the
/// stored route.
#[derive(Debug, Default)]
pub struct NetworkRouteTracker {
    routes: HashMap<String, NetworkRoute>,
}

impl NetworkRouteTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a route report and record it
    pub fn on_route_report(&mut self, transport_name: &str, route: NetworkRoute) -> RouteDecision {
        if !route.connected {
            tracing::info!(transport = transport_name, "Transport is disconnected");
            return RouteDecision::Ignore;
        }

        if let Some(stored) = self.routes.get_mut(transport_name) {
            if *stored == route {
                return RouteDecision::Ignore;
            }
            *stored = route;
            return RouteDecision::Changed;
        }

        self.routes.insert(transport_name.to_owned(), route);
        RouteDecision::FirstConnection
    }

    /// Route last recorded for a transport
    pub fn route(&self, transport_name: &str) -> Option<NetworkRoute> {
        self.routes.get(transport_name).copied()
    }

    /// Number of transports seen
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no transport was seen yet
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
