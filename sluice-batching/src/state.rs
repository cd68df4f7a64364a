use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

/// Interval at which [`Lifecycle::await_termination`] checks the state.
const AWAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle state of an accumulator, transmitter or dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum State {
    /// Accepting items.
    Running = 0,
    /// Stopped, processing the remaining items.
    Draining = 1,
    /// The background thread exited.
    Terminated = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Terminated,
        }
    }

    /// Returns the lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }
}

/// Flags and counters shared between a handle and its background thread.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    name: String,
    /// Held shared while an item is enqueued and exclusively while the stop flag is set.
    admission: RwLock<()>,
    stopped: AtomicBool,
    state: AtomicU8,
    alive: AtomicBool,
    flushes: AtomicU64,
    escalated: AtomicBool,
}

impl Lifecycle {
    pub fn new(name: String) -> Self {
        Self {
            name,
            admission: RwLock::new(()),
            stopped: AtomicBool::new(false),
            state: AtomicU8::new(State::Running as u8),
            alive: AtomicBool::new(true),
            flushes: AtomicU64::new(0),
            escalated: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `enqueue` unless the stop flag is set.
    ///
    /// Returns `None` without calling `enqueue` after [`stop`](Self::stop).
    pub fn admit<R>(&self, enqueue: impl FnOnce() -> R) -> Option<R> {
        let _admission = self.admission.read();
        if self.is_stopped() {
            return None;
        }
        Some(enqueue())
    }

    /// Sets the stop flag. Returns `true` if this call set it.
    ///
    /// Waits for running [`admit`](Self::admit) calls, so once the flag is observed, every
    /// admitted item is already in its queue. A producer blocked on a full intake delays this
    /// by at most its block timeout.
    pub fn stop(&self) -> bool {
        let _admission = self.admission.write();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.state
            .compare_exchange(
                State::Running as u8,
                State::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok();

        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn mark_escalated(&self) {
        self.escalated.store(true, Ordering::Release);
    }

    pub fn escalated(&self) -> bool {
        self.escalated.load(Ordering::Acquire)
    }

    /// Blocks until the background thread reached [`State::Terminated`].
    pub fn await_termination(&self) {
        while self.state() != State::Terminated {
            thread::sleep(AWAIT_INTERVAL);
        }
    }
}

/// Marks the lifecycle as terminated when the background thread exits, including by panic.
pub(crate) struct TerminationGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl<'a> TerminationGuard<'a> {
    pub fn new(lifecycle: &'a Lifecycle) -> Self {
        Self { lifecycle }
    }
}

impl Drop for TerminationGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            sluice_log::error!(
                name = self.lifecycle.name(),
                "background thread panicked, queued items will not be processed"
            );
        }

        self.lifecycle.alive.store(false, Ordering::Release);
        self.lifecycle
            .state
            .store(State::Terminated as u8, Ordering::Release);
        sluice_log::debug!(name = self.lifecycle.name(), "background thread terminated");
    }
}
