use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{RecvTimeoutError, SendTimeoutError, TrySendError};
use parking_lot::{Mutex, RwLock};
use sluice_statsd::metric;

use crate::builder::{PanicHandler, RejectionPolicy, WorkerPoolBuilder};
use crate::metrics::{PoolCounters, PoolGauges};

/// A unit of work executed by a [`WorkerPool`].
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Interval at which blocked submitters and waiters re-check the pool state.
const RECHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Any error that may occur when building or submitting to a [`WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was shut down and does not accept new tasks.
    #[error("worker pool is shut down")]
    ShutDown,
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
}

/// A point-in-time view of a [`WorkerPool`] used for logging and metrics.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolSnapshot {
    /// The name of the pool.
    pub name: String,
    /// The number of live threads.
    pub pool_size: usize,
    /// The largest number of threads that were ever alive at the same time.
    pub largest_pool_size: usize,
    /// The number of threads currently running a task.
    pub active: usize,
    /// The number of tasks waiting in the queue.
    pub queued: usize,
    /// The number of tasks accepted for execution, including tasks run by the caller.
    pub submitted: u64,
    /// The number of tasks that finished on a worker thread, including panicked tasks.
    pub completed: u64,
    /// The number of tasks dropped by the [`Discard`](RejectionPolicy::Discard) policy.
    pub rejected: u64,
}

impl fmt::Display for PoolSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool {}: size={} largest={} active={} queued={} submitted={} completed={} rejected={}",
            self.name,
            self.pool_size,
            self.largest_pool_size,
            self.active,
            self.queued,
            self.submitted,
            self.completed,
            self.rejected,
        )
    }
}

/// State shared between a [`WorkerPool`] and its threads.
struct Shared {
    name: String,
    core_threads: usize,
    max_threads: usize,
    keep_alive: Duration,
    rejection_policy: RejectionPolicy,
    stack_size: Option<usize>,
    panic_handler: Option<Arc<PanicHandler>>,

    /// The sending half of the queue, taken on shutdown to disconnect idle workers.
    tx: RwLock<Option<flume::Sender<Task>>>,
    rx: flume::Receiver<Task>,

    threads: AtomicUsize,
    largest: AtomicUsize,
    active: AtomicUsize,
    next_index: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    /// Reserves a thread slot if fewer than `limit` threads are alive.
    fn reserve_thread(&self, limit: usize) -> bool {
        let mut current = self.threads.load(Ordering::Acquire);

        loop {
            if current >= limit {
                return false;
            }

            match self.threads.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.largest.fetch_max(current + 1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn run_task(&self, task: Task) {
        self.active.fetch_add(1, Ordering::Relaxed);
        let result = std::panic::catch_unwind(AssertUnwindSafe(task));
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);

        if let Err(payload) = result {
            match self.panic_handler.as_ref() {
                Some(panic_handler) => panic_handler(payload),
                None => sluice_log::error!(
                    pool = self.name.as_str(),
                    "task panicked: {}",
                    sluice_log::panic_message(payload.as_ref())
                ),
            }
        }
    }

    /// Releases the slot of an idle thread.
    ///
    /// Returns `false` if the thread re-acquired a slot because work arrived in the meantime and
    /// must keep running.
    fn retire(&self) -> bool {
        self.threads.fetch_sub(1, Ordering::AcqRel);

        if self.rx.is_empty() {
            return true;
        }

        !self.reserve_thread(self.max_threads)
    }
}

/// The body of a worker thread.
fn worker_loop(shared: Arc<Shared>, first_task: Option<Task>) {
    sluice_log::trace!(pool = shared.name.as_str(), "worker started");

    if let Some(task) = first_task {
        shared.run_task(task);
    }

    let retired = loop {
        match shared.rx.recv_timeout(shared.keep_alive) {
            Ok(task) => shared.run_task(task),
            Err(RecvTimeoutError::Timeout) => {
                if shared.retire() {
                    break true;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break false,
        }
    };

    if !retired {
        shared.threads.fetch_sub(1, Ordering::AcqRel);
    }

    sluice_log::trace!(pool = shared.name.as_str(), "worker stopped");
}

/// A pool of named threads executing closures.
///
/// See the [crate documentation](crate) for the sizing and rejection rules. The pool is shut down
/// when dropped. Dropping a non-daemon pool additionally waits for its threads to finish all
/// queued tasks.
pub struct WorkerPool {
    shared: Arc<Shared>,
    daemon: bool,
}

impl WorkerPool {
    /// Constructs a new [`WorkerPool`] using the configuration specified by [`WorkerPoolBuilder`].
    ///
    /// Prefer [`WorkerPoolBuilder::build`], which validates the configuration first.
    pub fn new(builder: WorkerPoolBuilder) -> Self {
        let (core_threads, max_threads) = builder.effective_sizes();
        let (tx, rx) = flume::bounded(builder.queue_capacity);

        sluice_log::debug!(
            pool = builder.name.as_str(),
            core_threads,
            max_threads,
            queue_capacity = builder.queue_capacity,
            rejection_policy = builder.rejection_policy.as_str(),
            "creating worker pool"
        );

        let shared = Shared {
            name: builder.name,
            core_threads,
            max_threads,
            keep_alive: builder.keep_alive,
            rejection_policy: builder.rejection_policy,
            stack_size: builder.stack_size,
            panic_handler: builder.task_panic_handler,
            tx: RwLock::new(Some(tx)),
            rx,
            threads: AtomicUsize::new(0),
            largest: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            next_index: AtomicUsize::new(1),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        };

        Self {
            shared: Arc::new(shared),
            daemon: builder.daemon,
        }
    }

    /// Returns the name of this pool.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the maximum number of threads of this pool.
    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Schedules a closure for execution within the pool.
    ///
    /// Depending on the [`RejectionPolicy`], this may run the closure on the calling thread, drop
    /// it, or block until a worker takes it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShutDown`] after [`shutdown`](Self::shutdown), and
    /// [`PoolError::Spawn`] if a required worker thread could not be started.
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(task))
    }

    fn submit(&self, task: Task) -> Result<(), PoolError> {
        let shared = &self.shared;
        if shared.is_shutdown() {
            return Err(PoolError::ShutDown);
        }

        shared.submitted.fetch_add(1, Ordering::Relaxed);

        // Below the core size, every submission starts a new thread.
        let task = match self.spawn_worker(Some(task), shared.core_threads)? {
            Some(task) => task,
            None => return Ok(()),
        };

        let task = match self.try_enqueue(task) {
            Ok(()) => {
                // All threads may have retired while the task was being queued.
                if shared.threads.load(Ordering::Acquire) == 0 {
                    self.spawn_worker(None, shared.max_threads)?;
                }
                return Ok(());
            }
            Err(TrySendError::Full(task)) => task,
            Err(TrySendError::Disconnected(_)) => return Err(PoolError::ShutDown),
        };

        match self.spawn_worker(Some(task), shared.max_threads)? {
            Some(task) => self.reject(task),
            None => Ok(()),
        }
    }

    fn try_enqueue(&self, task: Task) -> Result<(), TrySendError<Task>> {
        match self.shared.tx.read().as_ref() {
            Some(tx) => tx.try_send(task),
            None => Err(TrySendError::Disconnected(task)),
        }
    }

    /// Starts a worker thread if fewer than `limit` threads are alive.
    ///
    /// Returns the task back if no thread could be reserved.
    fn spawn_worker(&self, task: Option<Task>, limit: usize) -> Result<Option<Task>, PoolError> {
        let shared = &self.shared;
        if !shared.reserve_thread(limit) {
            return Ok(task);
        }

        let index = shared.next_index.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-thread-{index}", shared.name));
        if let Some(stack_size) = shared.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker_shared = Arc::clone(shared);
        match builder.spawn(move || worker_loop(worker_shared, task)) {
            Ok(handle) => {
                let mut handles = shared.handles.lock();
                handles.retain(|handle| !handle.is_finished());
                handles.push(handle);
                Ok(None)
            }
            Err(error) => {
                shared.threads.fetch_sub(1, Ordering::AcqRel);
                sluice_log::error!(
                    error = &error as &dyn std::error::Error,
                    pool = shared.name.as_str(),
                    "failed to spawn worker thread"
                );
                Err(PoolError::Spawn(error))
            }
        }
    }

    fn reject(&self, task: Task) -> Result<(), PoolError> {
        let shared = &self.shared;
        let policy = shared.rejection_policy;
        metric!(
            counter(PoolCounters::TasksRejected) += 1,
            pool = shared.name.as_str(),
            policy = policy.as_str()
        );

        match policy {
            RejectionPolicy::CallerRuns => {
                task();
                Ok(())
            }
            RejectionPolicy::Discard => {
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                sluice_log::trace!(pool = shared.name.as_str(), "discarded task");
                Ok(())
            }
            RejectionPolicy::Block => self.block_on_queue(task),
        }
    }

    /// Parks the calling thread until the queue accepts the task.
    fn block_on_queue(&self, mut task: Task) -> Result<(), PoolError> {
        let shared = &self.shared;

        loop {
            let Some(tx) = shared.tx.read().clone() else {
                sluice_log::warn!(
                    pool = shared.name.as_str(),
                    "pool shut down while a submitter was blocked"
                );
                return Err(PoolError::ShutDown);
            };

            match tx.send_timeout(task, RECHECK_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => task = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    sluice_log::warn!(
                        pool = shared.name.as_str(),
                        "queue disconnected while a submitter was blocked"
                    );
                    return Err(PoolError::ShutDown);
                }
            }

            // Threads may have retired while we were waiting. Hand the task to a new thread in
            // that case instead of waiting for a worker that never comes.
            task = match self.spawn_worker(Some(task), shared.max_threads)? {
                Some(task) => task,
                None => return Ok(()),
            };
        }
    }

    /// Stops accepting tasks.
    ///
    /// Queued tasks still run. Idle threads exit once the queue is empty. Returns `true` if this
    /// call initiated the shutdown.
    pub fn shutdown(&self) -> bool {
        let shared = &self.shared;
        if shared.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }

        shared.tx.write().take();
        sluice_log::debug!("{}", self.snapshot());
        sluice_log::debug!(pool = shared.name.as_str(), "worker pool shut down");
        true
    }

    /// Stops accepting tasks and drops all queued tasks.
    ///
    /// Running tasks finish. Returns the number of dropped tasks.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown();

        let dropped = self.shared.rx.drain().count();
        if dropped > 0 {
            sluice_log::warn!(
                pool = self.shared.name.as_str(),
                dropped,
                "dropped queued tasks on forced shutdown"
            );
        }

        dropped
    }

    /// Returns `true` if the pool was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Returns `true` if the pool was shut down and all of its threads exited.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.threads.load(Ordering::Acquire) == 0
    }

    /// Waits until all threads exited after a shutdown, or until the timeout elapses.
    ///
    /// Returns `true` if the pool terminated in time. Without a prior call to
    /// [`shutdown`](Self::shutdown), this waits for the full timeout and returns `false`, unless
    /// the pool has no threads.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        while !self.is_terminated() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(RECHECK_INTERVAL.min(deadline - now));
        }

        self.join_finished();
        true
    }

    fn join_finished(&self) {
        let current = thread::current().id();
        let handles: Vec<_> = std::mem::take(&mut *self.shared.handles.lock());

        for handle in handles {
            if handle.thread().id() != current {
                handle.join().ok();
            }
        }
    }

    /// Returns a point-in-time view of the pool.
    pub fn snapshot(&self) -> PoolSnapshot {
        let shared = &self.shared;

        PoolSnapshot {
            name: shared.name.clone(),
            pool_size: shared.threads.load(Ordering::Relaxed),
            largest_pool_size: shared.largest.load(Ordering::Relaxed),
            active: shared.active.load(Ordering::Relaxed),
            queued: shared.rx.len(),
            submitted: shared.submitted.load(Ordering::Relaxed),
            completed: shared.completed.load(Ordering::Relaxed),
            rejected: shared.rejected.load(Ordering::Relaxed),
        }
    }

    /// Emits gauges for the pool size, queue size and active tasks.
    pub fn report_metrics(&self) {
        let snapshot = self.snapshot();
        let pool = snapshot.name.as_str();

        metric!(gauge(PoolGauges::PoolSize) = snapshot.pool_size as u64, pool = pool);
        metric!(gauge(PoolGauges::QueueSize) = snapshot.queued as u64, pool = pool);
        metric!(gauge(PoolGauges::ActiveTasks) = snapshot.active as u64, pool = pool);
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("snapshot", &self.snapshot())
            .field("daemon", &self.daemon)
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();

        if !self.daemon {
            self.join_finished();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn build(builder: WorkerPoolBuilder) -> WorkerPool {
        builder.build().unwrap()
    }

    #[test]
    fn test_executes_all_tasks() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .core_threads(2)
                .max_threads(4)
                .queue_capacity(64),
        );
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 50);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.submitted, 50);
        assert_eq!(snapshot.completed, 50);
        assert_eq!(snapshot.pool_size, 0);
    }

    #[test]
    fn test_thread_names() {
        sluice_test::setup();
        let pool = build(WorkerPoolBuilder::new("named").max_threads(1));
        let (tx, rx) = flume::bounded(1);

        pool.execute(move || {
            tx.send(thread::current().name().map(str::to_owned)).ok();
        })
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("named-thread-1"));
    }

    #[test]
    fn test_grows_to_max_threads_with_rendezvous_queue() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .core_threads(1)
                .max_threads(3)
                .queue_capacity(0),
        );
        let barrier = Arc::new(Barrier::new(4));

        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                barrier.wait();
            })
            .unwrap();
        }

        // All three tasks run at the same time, otherwise the barrier never releases.
        barrier.wait();
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.largest_pool_size, 3);
    }

    #[test]
    fn test_caller_runs_when_saturated() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .max_threads(1)
                .queue_capacity(0)
                .rejection_policy(RejectionPolicy::CallerRuns),
        );
        let barrier = Arc::new(Barrier::new(2));

        {
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                barrier.wait();
            })
            .unwrap();
        }

        let caller = thread::current().id();
        let (tx, rx) = flume::bounded(1);
        pool.execute(move || {
            tx.send(thread::current().id()).ok();
        })
        .unwrap();

        // The second task ran synchronously on this thread.
        assert_eq!(rx.try_recv().unwrap(), caller);
        barrier.wait();
    }

    #[test]
    fn test_discard_when_saturated() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .max_threads(1)
                .queue_capacity(1)
                .rejection_policy(RejectionPolicy::Discard),
        );
        let barrier = Arc::new(Barrier::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                barrier.wait();
            })
            .unwrap();
        }

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        barrier.wait();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));

        // One task fit into the queue, the other two were dropped.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pool.snapshot().rejected, 2);
    }

    #[test]
    fn test_metrics() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("metered")
                .max_threads(1)
                .queue_capacity(0)
                .rejection_policy(RejectionPolicy::Discard),
        );
        let barrier = Arc::new(Barrier::new(2));
        let (started_tx, started_rx) = flume::bounded(1);

        {
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                started_tx.send(()).ok();
                barrier.wait();
            })
            .unwrap();
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let captures = sluice_statsd::with_capturing_test_client(|| {
            pool.execute(|| {}).unwrap();
        });
        assert_eq!(
            captures,
            ["pool.rejected:1|c|#pool:metered,policy:discard"]
        );

        let captures = sluice_statsd::with_capturing_test_client(|| pool.report_metrics());
        assert_eq!(
            captures,
            [
                "pool.size:1|g|#pool:metered",
                "pool.queue_size:0|g|#pool:metered",
                "pool.active:1|g|#pool:metered",
            ]
        );

        barrier.wait();
    }

    #[test]
    fn test_block_waits_for_capacity() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .max_threads(1)
                .queue_capacity(1)
                .rejection_policy(RejectionPolicy::Block),
        );
        let counter = Arc::new(AtomicUsize::new(0));

        let start = Instant::now();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        // The fourth submission had to wait for at least one task to finish.
        assert!(start.elapsed() >= Duration::from_millis(20));

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(pool.snapshot().rejected, 0);
    }

    #[test]
    fn test_idle_threads_time_out() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .core_threads(2)
                .max_threads(2)
                .keep_alive(Duration::from_millis(20)),
        );

        pool.execute(|| {}).unwrap();
        pool.execute(|| {}).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.snapshot().pool_size > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(pool.snapshot().pool_size, 0);
        assert!(!pool.is_terminated());

        // The pool starts new threads after all previous ones retired.
        let (tx, rx) = flume::bounded(1);
        pool.execute(move || {
            tx.send(()).ok();
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_rejects_after_shutdown() {
        sluice_test::setup();
        let pool = build(WorkerPoolBuilder::new("s"));

        assert!(pool.shutdown());
        assert!(!pool.shutdown());
        assert!(matches!(pool.execute(|| {}), Err(PoolError::ShutDown)));
        assert!(pool.await_termination(Duration::from_secs(1)));
    }

    #[test]
    fn test_shutdown_now_drops_queued_tasks() {
        sluice_test::setup();
        let pool = build(
            WorkerPoolBuilder::new("s")
                .max_threads(1)
                .queue_capacity(8),
        );
        let (started_tx, started_rx) = flume::bounded(1);
        let (release_tx, release_rx) = flume::bounded::<()>(1);

        pool.execute(move || {
            started_tx.send(()).ok();
            release_rx.recv().ok();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..5 {
            pool.execute(|| {}).unwrap();
        }

        assert_eq!(pool.shutdown_now(), 5);
        release_tx.send(()).unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.snapshot().completed, 1);
    }

    #[test]
    fn test_task_panic_keeps_worker_alive() {
        sluice_test::setup();
        let panics = Arc::new(AtomicUsize::new(0));
        let pool = build(WorkerPoolBuilder::new("s").max_threads(1).queue_capacity(4).task_panic_handler({
            let panics = Arc::clone(&panics);
            move |_| {
                panics.fetch_add(1, Ordering::SeqCst);
            }
        }));

        pool.execute(|| panic!("task failed")).unwrap();
        let (tx, rx) = flume::bounded(1);
        pool.execute(move || {
            tx.send(()).ok();
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(panics.load(Ordering::SeqCst), 1);
        assert_eq!(pool.snapshot().largest_pool_size, 1);
    }

    #[test]
    fn test_drop_waits_for_queued_tasks() {
        sluice_test::setup();
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let pool = build(
                WorkerPoolBuilder::new("s")
                    .max_threads(1)
                    .queue_capacity(16),
            );

            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    thread::sleep(Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = PoolSnapshot {
            name: "flush".to_owned(),
            pool_size: 2,
            largest_pool_size: 3,
            active: 1,
            queued: 4,
            submitted: 10,
            completed: 5,
            rejected: 0,
        };

        assert_eq!(
            snapshot.to_string(),
            "pool flush: size=2 largest=3 active=1 queued=4 submitted=10 completed=5 rejected=0"
        );
    }
}
