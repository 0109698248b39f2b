//! Cooperative process thread
//!
//! A single worker thread that periodically calls into registered modules.
//! Each module tells the thread how long it may sleep before the module
//! needs processing again. The thread only keeps weak references to the
//! modules; whoever registers a module keeps it alive and must deregister it
//! with the [`ModuleHandle`] it got back.

use crate::time::Clock;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Longest the worker sleeps when no module asks for an earlier callback
const MAX_WAIT_MS: i64 = 60_000;

/// Marks an entry that must be processed on the next pass
const PROCESS_IMMEDIATELY: i64 = -1;

/// Process thread errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn process thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Process thread is already running")]
    AlreadyRunning,

    #[error("Process thread worker panicked")]
    WorkerPanicked,
}

/// Periodically processed module
///
/// Implementations are called from the process thread while API calls may
/// arrive on other threads, so all methods take `&self`.
pub trait Module: Send + Sync {
    /// Milliseconds until the module wants `process` to be called again
    fn time_until_next_process(&self) -> i64;

    /// Do the periodic work
    fn process(&self);

    /// Called when the module gets attached to a running process thread,
    /// with a waker for asking the thread to process it early, and with
    /// `None` when it gets detached again.
    fn process_thread_attached(&self, _waker: Option<ModuleWaker>) {}
}

/// Asks a process thread to process one module as soon as possible
///
/// Handed to a module through [`Module::process_thread_attached`]. Waking a
/// module whose thread is gone does nothing.
#[derive(Clone)]
pub struct ModuleWaker {
    wake: Arc<dyn Fn() + Send + Sync>,
}

impl ModuleWaker {
    /// Create a waker from the function that schedules the module
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        ModuleWaker {
            wake: Arc::new(wake),
        }
    }

    /// Schedule the module for immediate processing
    pub fn wake(&self) {
        (self.wake)()
    }
}

impl fmt::Debug for ModuleWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleWaker").finish_non_exhaustive()
    }
}

/// Registration of a module with a process thread
///
/// Returned by [`ProcessThread::register_module`] and consumed by
/// [`ProcessThread::deregister_module`], so it is not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct ModuleHandle {
    id: u64,
    location: &'static Location<'static>,
}

impl ModuleHandle {
    /// Create a handle; used by process thread implementations
    pub fn new(id: u64, location: &'static Location<'static>) -> Self {
        ModuleHandle { id, location }
    }

    /// Registration identifier, unique per process thread
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Where the module was registered from
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Scheduler contract used by the transport
///
/// Modules may call back into the thread (wake up, register or deregister)
/// from inside their own `process`.
pub trait ProcessThread: Send + Sync {
    /// Start the worker
    fn start(&self) -> Result<(), ProcessError>;

    /// Stop the worker and wait for it to exit. Stopping a stopped thread is
    /// a no-op.
    fn stop(&self) -> Result<(), ProcessError>;

    /// Register a module. The thread keeps a weak reference only.
    fn register_module(
        &self,
        module: Arc<dyn Module>,
        location: &'static Location<'static>,
    ) -> ModuleHandle;

    /// Remove a module. Once this returns the module is never called again.
    fn deregister_module(&self, handle: ModuleHandle);

    /// Ask for the module to be processed as soon as possible
    fn wake_up(&self, handle: &ModuleHandle);
}

enum Signal {
    WakeUp,
    Stop,
}

struct ModuleEntry {
    id: u64,
    module: Weak<dyn Module>,
    location: &'static Location<'static>,
    next_callback_ms: Option<i64>,
    wake_requested: bool,
}

/// Module picked up by one pass of the worker
struct Scheduled {
    id: u64,
    module: Arc<dyn Module>,
    next_callback_ms: Option<i64>,
}

struct Shared {
    name: String,
    clock: Arc<dyn Clock>,
    modules: Mutex<Vec<ModuleEntry>>,
    /// Held by the worker around each `process` call. Reentrant so a module
    /// can deregister itself from inside `process`.
    processing: ReentrantMutex<()>,
    signal_tx: Sender<Signal>,
    signal_rx: Receiver<Signal>,
}

impl Shared {
    /// Process every module that is due and return how long to sleep
    ///
    /// The module list is only locked to take a snapshot and to store the
    /// next callback times, never while a module runs.
    fn process_due_modules(&self) -> i64 {
        let now = self.clock.time_in_milliseconds();
        let mut next_checkpoint = now + MAX_WAIT_MS;

        let scheduled = self.snapshot();
        let mut updates = Vec::with_capacity(scheduled.len());
        for entry in scheduled {
            let module = entry.module;
            let mut next = match entry.next_callback_ms {
                Some(next) => next,
                None => now + module.time_until_next_process().max(0),
            };

            if next <= now {
                let _processing = self.processing.lock();
                if !self.is_registered(entry.id) {
                    continue;
                }
                module.process();
                let after = self.clock.time_in_milliseconds();
                next = after + module.time_until_next_process().max(0);
            }
            updates.push((entry.id, next));
        }

        let mut modules = self.modules.lock();
        for (id, next) in updates {
            let Some(entry) = modules.iter_mut().find(|entry| entry.id == id) else {
                continue;
            };
            // A wake up that arrived while the module ran wins.
            let next = if entry.wake_requested {
                PROCESS_IMMEDIATELY
            } else {
                next
            };
            entry.next_callback_ms = Some(next);
            next_checkpoint = next_checkpoint.min(next);
        }
        drop(modules);

        (next_checkpoint - self.clock.time_in_milliseconds()).max(0)
    }

    /// Prune dropped modules and take the live ones out for one pass
    fn snapshot(&self) -> Vec<Scheduled> {
        let mut modules = self.modules.lock();
        modules.retain(|entry| {
            let alive = entry.module.strong_count() > 0;
            if !alive {
                tracing::warn!(
                    thread = %self.name,
                    location = %entry.location,
                    "Module dropped while still registered"
                );
            }
            alive
        });

        modules
            .iter_mut()
            .filter_map(|entry| {
                let module = entry.module.upgrade()?;
                entry.wake_requested = false;
                Some(Scheduled {
                    id: entry.id,
                    module,
                    next_callback_ms: entry.next_callback_ms,
                })
            })
            .collect()
    }

    fn is_registered(&self, id: u64) -> bool {
        self.modules.lock().iter().any(|entry| entry.id == id)
    }

    fn wake(&self, id: u64) {
        let mut modules = self.modules.lock();
        if let Some(entry) = modules.iter_mut().find(|entry| entry.id == id) {
            entry.next_callback_ms = Some(PROCESS_IMMEDIATELY);
            entry.wake_requested = true;
        }
        drop(modules);
        let _ = self.signal_tx.send(Signal::WakeUp);
    }

    fn run(&self) {
        tracing::debug!(thread = %self.name, "Process thread running");
        loop {
            let wait_ms = self.process_due_modules();
            match self
                .signal_rx
                .recv_timeout(Duration::from_millis(wait_ms as u64))
            {
                Ok(Signal::WakeUp) | Err(RecvTimeoutError::Timeout) => continue,
                Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(thread = %self.name, "Process thread exiting");
    }

    fn live_modules(&self) -> Vec<(u64, Arc<dyn Module>)> {
        self.modules
            .lock()
            .iter()
            .filter_map(|entry| Some((entry.id, entry.module.upgrade()?)))
            .collect()
    }

    fn waker(self: &Arc<Self>, id: u64) -> ModuleWaker {
        let shared = Arc::downgrade(self);
        ModuleWaker::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.wake(id);
            }
        })
    }
}

/// Process thread backed by a dedicated OS thread
pub struct ModuleProcessThread {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ModuleProcessThread {
    /// Create a stopped process thread
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let (signal_tx, signal_rx) = channel::unbounded();
        ModuleProcessThread {
            shared: Arc::new(Shared {
                name: name.into(),
                clock,
                modules: Mutex::new(Vec::new()),
                processing: ReentrantMutex::new(()),
                signal_tx,
                signal_rx,
            }),
            worker: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the worker is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Number of registered modules
    pub fn module_count(&self) -> usize {
        self.shared.modules.lock().len()
    }
}

impl ProcessThread for ModuleProcessThread {
    fn start(&self) -> Result<(), ProcessError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(ProcessError::AlreadyRunning);
        }

        // Drop signals left over from a previous run.
        while self.shared.signal_rx.try_recv().is_ok() {}

        for (id, module) in self.shared.live_modules() {
            module.process_thread_attached(Some(self.shared.waker(id)));
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || shared.run())?;
        *worker = Some(handle);

        tracing::info!(thread = %self.shared.name, "Process thread started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ProcessError> {
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };

        let _ = self.shared.signal_tx.send(Signal::Stop);
        let joined = handle.join();

        for (_, module) in self.shared.live_modules() {
            module.process_thread_attached(None);
        }

        tracing::info!(thread = %self.shared.name, "Process thread stopped");
        joined.map_err(|_| ProcessError::WorkerPanicked)
    }

    fn register_module(
        &self,
        module: Arc<dyn Module>,
        location: &'static Location<'static>,
    ) -> ModuleHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if self.is_running() {
            module.process_thread_attached(Some(self.shared.waker(id)));
        }

        self.shared.modules.lock().push(ModuleEntry {
            id,
            module: Arc::downgrade(&module),
            location,
            next_callback_ms: None,
            wake_requested: false,
        });
        let _ = self.shared.signal_tx.send(Signal::WakeUp);

        tracing::debug!(thread = %self.shared.name, id, %location, "Module registered");
        ModuleHandle::new(id, location)
    }

    fn deregister_module(&self, handle: ModuleHandle) {
        let removed = {
            let mut modules = self.shared.modules.lock();
            modules
                .iter()
                .position(|entry| entry.id == handle.id)
                .map(|index| modules.remove(index))
        };

        // Wait out a `process` call that is already running.
        drop(self.shared.processing.lock());

        match removed.and_then(|entry| entry.module.upgrade()) {
            Some(module) => module.process_thread_attached(None),
            None => tracing::warn!(
                thread = %self.shared.name,
                id = handle.id,
                location = %handle.location,
                "Deregistered a module that was no longer alive"
            ),
        }

        tracing::debug!(thread = %self.shared.name, id = handle.id, "Module deregistered");
    }

    fn wake_up(&self, handle: &ModuleHandle) {
        self.shared.wake(handle.id);
    }
}

impl Drop for ModuleProcessThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(thread = %self.shared.name, "Error stopping process thread: {}", e);
        }
    }
}
