//! Packet router
//!
//! Maps media sources to the modules that own their packets so the pacer can
//! hand send decisions back to them.

use parking_lot::RwLock;
use std::sync::Arc;

/// Module that owns outgoing packets of one media source
pub trait RtpSendModule: Send + Sync {
    /// Media source handled by this module
    fn ssrc(&self) -> u32;

    /// Send a queued packet now. Returns false if the packet is gone.
    fn time_to_send_packet(
        &self,
        sequence_number: u16,
        capture_time_ms: i64,
        retransmission: bool,
    ) -> bool;

    /// Send up to `bytes` of padding, returns the bytes actually sent
    fn time_to_send_padding(&self, bytes: usize) -> usize;

    /// Whether this module can generate padding
    fn supports_padding(&self) -> bool {
        true
    }
}

/// Routes pacer decisions to send modules
#[derive(Default)]
pub struct PacketRouter {
    modules: RwLock<Vec<Arc<dyn RtpSendModule>>>,
}

impl PacketRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a send module, replacing any module with the same ssrc
    pub fn add_send_module(&self, module: Arc<dyn RtpSendModule>) {
        let mut modules = self.modules.write();
        let ssrc = module.ssrc();
        modules.retain(|m| m.ssrc() != ssrc);
        modules.push(module);
    }

    /// Remove the module handling `ssrc`
    pub fn remove_send_module(&self, ssrc: u32) -> bool {
        let mut modules = self.modules.write();
        let before = modules.len();
        modules.retain(|m| m.ssrc() != ssrc);
        modules.len() != before
    }

    /// Number of registered modules
    pub fn module_count(&self) -> usize {
        self.modules.read().len()
    }

    /// Hand a paced packet to its owner
    pub fn time_to_send_packet(
        &self,
        ssrc: u32,
        sequence_number: u16,
        capture_time_ms: i64,
        retransmission: bool,
    ) -> bool {
        let module = self
            .modules
            .read()
            .iter()
            .find(|m| m.ssrc() == ssrc)
            .cloned();

        match module {
            Some(module) => {
                module.time_to_send_packet(sequence_number, capture_time_ms, retransmission)
            }
            None => {
                tracing::debug!(ssrc, sequence_number, "No send module for paced packet");
                false
            }
        }
    }

    /// Spread a padding request over the modules that can pad
    pub fn time_to_send_padding(&self, bytes: usize) -> usize {
        let modules: Vec<_> = self
            .modules
            .read()
            .iter()
            .filter(|m| m.supports_padding())
            .cloned()
            .collect();

        let mut sent = 0;
        for module in modules {
            if sent >= bytes {
                break;
            }
            sent += module.time_to_send_padding(bytes - sent);
        }
        sent
    }
}
