use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::pool::{PoolError, WorkerPool};

/// Type alias for a thread safe closure that is used for panic handling across the code.
pub(crate) type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// The hard ceiling for the number of threads in a single pool.
pub const MAX_POOL_THREADS: usize = 32767;

/// Default duration an idle worker thread waits for new tasks before it exits.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Governs what happens to a task when the queue is full and all threads are busy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Runs the task on the submitting thread.
    ///
    /// This slows down the submitter and therefore provides natural backpressure.
    #[default]
    CallerRuns,
    /// Drops the task silently.
    ///
    /// Dropped tasks are counted in [`PoolSnapshot::rejected`](crate::PoolSnapshot::rejected).
    Discard,
    /// Parks the submitting thread until a worker takes the task.
    Block,
}

impl RejectionPolicy {
    /// Returns the name of the policy as used in configuration files and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallerRuns => "caller_runs",
            Self::Discard => "discard",
            Self::Block => "block",
        }
    }
}

/// [`WorkerPoolBuilder`] configures and builds a [`WorkerPool`].
///
/// Out-of-range sizes are clamped rather than rejected: the maximum thread count is clamped to
/// `[1, MAX_POOL_THREADS]` and the core thread count to `[1, max_threads]`.
pub struct WorkerPoolBuilder {
    pub(crate) name: String,
    pub(crate) core_threads: usize,
    pub(crate) max_threads: usize,
    pub(crate) keep_alive: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) rejection_policy: RejectionPolicy,
    pub(crate) daemon: bool,
    pub(crate) stack_size: Option<usize>,
    pub(crate) task_panic_handler: Option<Arc<PanicHandler>>,
}

impl WorkerPoolBuilder {
    /// Initializes a new [`WorkerPoolBuilder`] with default settings.
    ///
    /// Threads of the pool are named `<name>-thread-<n>`, with `n` starting at `1`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            core_threads: 1,
            max_threads: 1,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: 0,
            rejection_policy: RejectionPolicy::default(),
            daemon: false,
            stack_size: None,
            task_panic_handler: None,
        }
    }

    /// Sets the number of threads started eagerly by submissions before tasks are queued.
    pub fn core_threads(mut self, core_threads: usize) -> Self {
        self.core_threads = core_threads;
        self
    }

    /// Sets the maximum number of threads of the pool.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets how long an idle thread waits for a new task before it exits.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the capacity of the task queue.
    ///
    /// A capacity of `0` selects a rendezvous queue, where a task is only accepted if a worker
    /// is waiting to take it.
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the policy for tasks that neither fit the queue nor a new thread.
    pub fn rejection_policy(mut self, rejection_policy: RejectionPolicy) -> Self {
        self.rejection_policy = rejection_policy;
        self
    }

    /// Marks the pool's threads as daemon threads.
    ///
    /// Dropping a non-daemon pool waits for all of its threads to finish their queued work.
    /// Dropping a daemon pool shuts it down without waiting.
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Sets the stack size of the pool's threads.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Sets a custom panic handler for tasks executed by the [`WorkerPool`].
    ///
    /// Without a handler, panics are logged as errors. In both cases the worker thread survives.
    pub fn task_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.task_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Returns the effective `(core_threads, max_threads)` after clamping.
    pub fn effective_sizes(&self) -> (usize, usize) {
        let max_threads = self.max_threads.clamp(1, MAX_POOL_THREADS);
        let core_threads = self.core_threads.clamp(1, max_threads);
        (core_threads, max_threads)
    }

    /// Constructs a [`WorkerPool`] based on the configured settings.
    ///
    /// No thread is started until the first task is submitted.
    pub fn build(self) -> Result<WorkerPool, PoolError> {
        if self.name.is_empty() {
            return Err(PoolError::InvalidConfig("pool name must not be empty"));
        }

        if self.keep_alive.is_zero() {
            return Err(PoolError::InvalidConfig("keep alive must be positive"));
        }

        Ok(WorkerPool::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_are_clamped() {
        let builder = WorkerPoolBuilder::new("s").core_threads(0).max_threads(0);
        assert_eq!(builder.effective_sizes(), (1, 1));

        let builder = WorkerPoolBuilder::new("s")
            .core_threads(10)
            .max_threads(usize::MAX);
        assert_eq!(builder.effective_sizes(), (10, MAX_POOL_THREADS));

        let builder = WorkerPoolBuilder::new("s").core_threads(8).max_threads(4);
        assert_eq!(builder.effective_sizes(), (4, 4));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            WorkerPoolBuilder::new("").build(),
            Err(PoolError::InvalidConfig(_))
        ));

        assert!(matches!(
            WorkerPoolBuilder::new("s").keep_alive(Duration::ZERO).build(),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_policy_serde_names() {
        for policy in [
            RejectionPolicy::CallerRuns,
            RejectionPolicy::Discard,
            RejectionPolicy::Block,
        ] {
            let json = serde_json::to_string(&policy).unwrap();
            assert_eq!(json, format!("\"{}\"", policy.as_str()));
        }
    }
}
