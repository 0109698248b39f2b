//! Attachment of the pacer and the congestion controller to a process thread

use rtp_io::{Module, ModuleHandle, ProcessError, ProcessThread};
use std::panic::Location;
use std::sync::Arc;

struct Registrations {
    pacer: ModuleHandle,
    controller: ModuleHandle,
}

/// Keeps the pacer and the congestion controller registered with a process
/// thread until [`shutdown`](ModuleLifecycle::shutdown) or drop
///
/// The pacer is registered before the controller. Teardown stops the thread
/// first and then deregisters in reverse order, exactly once.
pub struct ModuleLifecycle {
    process_thread: Arc<dyn ProcessThread>,
    registrations: Option<Registrations>,
}

impl ModuleLifecycle {
    /// Register both modules and start the thread
    ///
    /// If the thread fails to start both modules are deregistered again.
    #[track_caller]
    pub fn start(
        process_thread: Arc<dyn ProcessThread>,
        pacer: Arc<dyn Module>,
        controller: Arc<dyn Module>,
    ) -> Result<Self, ProcessError> {
        let location = Location::caller();
        let pacer = process_thread.register_module(pacer, location);
        let controller = process_thread.register_module(controller, location);

        if let Err(e) = process_thread.start() {
            tracing::warn!("Failed to start process thread: {}", e);
            process_thread.deregister_module(controller);
            process_thread.deregister_module(pacer);
            return Err(e);
        }

        Ok(ModuleLifecycle {
            process_thread,
            registrations: Some(Registrations { pacer, controller }),
        })
    }

    /// Whether the modules are still registered
    pub fn is_active(&self) -> bool {
        self.registrations.is_some()
    }

    /// Scheduler the modules are registered with
    pub fn process_thread(&self) -> &Arc<dyn ProcessThread> {
        &self.process_thread
    }

    /// Stop the thread and deregister both modules; later calls do nothing
    pub fn shutdown(&mut self) {
        let Some(registrations) = self.registrations.take() else {
            return;
        };

        if let Err(e) = self.process_thread.stop() {
            tracing::warn!("Error stopping process thread: {}", e);
        }
        self.process_thread.deregister_module(registrations.controller);
        self.process_thread.deregister_module(registrations.pacer);
        tracing::debug!("Pacer and congestion controller detached");
    }
}

impl Drop for ModuleLifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
