use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sluice_statsd::metric;
use sluice_threading::{RejectionPolicy, WorkerPool, WorkerPoolBuilder};

use crate::config::{BatchError, DispatcherConfig};
use crate::delay::{DelayQueue, Polled};
use crate::intake::Rejection;
use crate::processor::ItemProcessor;
use crate::state::{Lifecycle, State, TerminationGuard};
use crate::statsd::{BatchCounters, BatchGauges};

struct Shared<T> {
    lifecycle: Lifecycle,
    queue: DelayQueue<T>,
}

/// Releases every item after its own delay and hands it to an [`ItemProcessor`].
///
/// A background thread waits for the earliest release and processes released items one at a
/// time, in release order. Items released at the same instant keep their insertion order. With a
/// `pool_size` above one, released items are processed on a worker pool created on the first
/// release instead.
///
/// On [`stop`](Self::stop), all items released so far are still processed. Items that are not
/// released yet are dropped.
pub struct DelayedBatchDispatcher<T> {
    shared: Arc<Shared<T>>,
    delay: Duration,
    capacity: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> DelayedBatchDispatcher<T> {
    /// Validates the configuration and starts the dispatcher thread named `name`.
    pub fn new<P>(
        name: impl Into<String>,
        config: DispatcherConfig,
        processor: P,
    ) -> Result<Self, BatchError>
    where
        P: ItemProcessor<T>,
    {
        config.validate()?;

        let name = name.into();
        let shared = Arc::new(Shared {
            lifecycle: Lifecycle::new(name.clone()),
            queue: DelayQueue::new(),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            processor: Arc::new(processor),
            pool_size: config.pool_size,
            poll_timeout: config.poll_timeout(),
            grace: config.shutdown_grace(),
            pool: None,
            pool_failed: false,
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(BatchError::Spawn)?;

        sluice_log::debug!(
            name = name.as_str(),
            delay_ms = config.delay_ms,
            pool_size = config.pool_size,
            "started dispatcher"
        );

        Ok(Self {
            shared,
            delay: config.delay(),
            capacity: config.capacity,
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl<T> DelayedBatchDispatcher<T> {
    /// Schedules an item for release after the configured delay.
    ///
    /// Returns `false` if the dispatcher was stopped or more than `capacity` items are pending.
    pub fn put(&self, item: T) -> bool {
        self.put_delayed(item, self.delay)
    }

    /// Schedules an item for release after `delay`.
    ///
    /// Returns `false` under the same conditions as [`put`](Self::put), and if `delay` is too
    /// large to compute a release time.
    pub fn put_delayed(&self, item: T, delay: Duration) -> bool {
        let lifecycle = &self.shared.lifecycle;
        let queue = &self.shared.queue;

        let result = match Instant::now().checked_add(delay) {
            Some(release_at) => lifecycle
                .admit(|| {
                    if queue.len() > self.capacity {
                        return Err(Rejection::Full);
                    }
                    queue.push(item, release_at);
                    Ok(())
                })
                .unwrap_or(Err(Rejection::Stopped)),
            None => Err(Rejection::InvalidDelay),
        };

        let Err(rejection) = result else {
            return true;
        };

        metric!(
            counter(BatchCounters::ItemsRejected) += 1,
            name = lifecycle.name(),
            reason = rejection.as_str()
        );
        false
    }

    /// Schedules items with the configured delay and stops at the first rejected item.
    ///
    /// Returns `true` if all items were accepted.
    pub fn put_all<I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().all(|item| self.put(item))
    }

    /// Stops accepting items and wakes the dispatcher thread.
    ///
    /// Returns `true` if this call stopped the dispatcher.
    pub fn stop(&self) -> bool {
        let stopped = self.shared.lifecycle.stop();
        if stopped {
            sluice_log::debug!(name = self.name(), "stopping dispatcher");
            self.shared.queue.close();
        }
        stopped
    }

    /// Stops the dispatcher and blocks until its thread exited.
    pub fn stop_and_await(&self) {
        self.stop();
        self.shared.lifecycle.await_termination();

        if let Some(handle) = self.handle.lock().take() {
            handle.join().ok();
        }
    }

    /// Returns the name of the dispatcher and its thread.
    pub fn name(&self) -> &str {
        self.shared.lifecycle.name()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.lifecycle.state()
    }

    /// Returns `true` while the dispatcher thread runs.
    pub fn is_alive(&self) -> bool {
        self.shared.lifecycle.is_alive()
    }

    /// Returns the number of items waiting for their release.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }
}

impl<T> fmt::Debug for DelayedBatchDispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedBatchDispatcher")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<T> Drop for DelayedBatchDispatcher<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<T> {
    shared: Arc<Shared<T>>,
    processor: Arc<dyn ItemProcessor<T>>,
    pool_size: usize,
    poll_timeout: Duration,
    grace: Duration,
    pool: Option<WorkerPool>,
    pool_failed: bool,
}

impl<T: Send + 'static> Worker<T> {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let lifecycle = &shared.lifecycle;
        let _guard = TerminationGuard::new(lifecycle);

        loop {
            match shared.queue.poll(self.poll_timeout) {
                Polled::Released(item) => self.dispatch(item),
                Polled::Timeout => {
                    let pending = shared.queue.len();
                    metric!(
                        gauge(BatchGauges::DelayQueueSize) = pending as u64,
                        name = lifecycle.name()
                    );
                    sluice_log::debug!(
                        name = lifecycle.name(),
                        pending,
                        "dispatcher idle, no item released"
                    );
                }
                Polled::Closed => break,
            }
        }

        for item in shared.queue.take_released(Instant::now()) {
            self.dispatch(item);
        }

        let dropped = shared.queue.clear();
        if let Some(next) = dropped.first() {
            metric!(
                counter(BatchCounters::ItemsDropped) += dropped.len() as i64,
                name = lifecycle.name()
            );
            sluice_log::warn!(
                name = lifecycle.name(),
                dropped = dropped.len(),
                next_release_ms = next.remaining().as_millis() as u64,
                "dropped unreleased items of stopped dispatcher"
            );
        }

        if let Some(pool) = self.pool.take() {
            pool.shutdown();
            if !pool.await_termination(self.grace) {
                sluice_log::warn!(
                    pool = pool.name(),
                    "dispatch pool did not finish within grace period"
                );
            }
        }
    }

    fn dispatch(&mut self, item: T) {
        let shared = Arc::clone(&self.shared);
        let name = shared.lifecycle.name();
        metric!(counter(BatchCounters::ItemsDispatched) += 1, name = name);

        let processor = Arc::clone(&self.processor);
        let Some(pool) = self.pool() else {
            processor.process(item);
            return;
        };

        if let Err(error) = pool.execute(move || processor.process(item)) {
            sluice_log::error!(
                error = &error as &dyn std::error::Error,
                name,
                "failed to submit item to dispatch pool"
            );
        }
    }

    /// Returns the dispatch pool, creating it on first use.
    fn pool(&mut self) -> Option<&WorkerPool> {
        if self.pool_size <= 1 || self.pool_failed {
            return None;
        }

        if self.pool.is_none() {
            let name = self.shared.lifecycle.name();
            let result = WorkerPoolBuilder::new(format!("{name}-dispatch"))
                .core_threads(self.pool_size)
                .max_threads(self.pool_size)
                .queue_capacity(0)
                .rejection_policy(RejectionPolicy::CallerRuns)
                .build();

            match result {
                Ok(pool) => self.pool = Some(pool),
                Err(error) => {
                    sluice_log::error!(
                        error = &error as &dyn std::error::Error,
                        name,
                        "failed to create dispatch pool, processing inline"
                    );
                    self.pool_failed = true;
                }
            }
        }

        self.pool.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use sluice_test::ItemRecorder;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_dispatches_in_release_order() {
        sluice_test::setup();
        let recorder = ItemRecorder::new();
        let config = DispatcherConfig::default();
        let dispatcher =
            DelayedBatchDispatcher::new("order", config, recorder.processor()).unwrap();

        let start = Instant::now();
        for delay in [300, 100, 200] {
            assert!(dispatcher.put_delayed(delay, Duration::from_millis(delay)));
        }

        assert!(recorder.wait_for(3, WAIT));
        assert_eq!(recorder.items(), [100, 200, 300]);

        for record in recorder.records() {
            assert!(record.at.duration_since(start) >= Duration::from_millis(record.item));
        }
    }

    #[test]
    fn test_default_delay() {
        sluice_test::setup();
        let recorder = ItemRecorder::new();
        let config = DispatcherConfig {
            delay_ms: 30,
            ..Default::default()
        };
        let dispatcher =
            DelayedBatchDispatcher::new("delay", config, recorder.processor()).unwrap();

        let start = Instant::now();
        assert!(dispatcher.put("a"));
        assert!(recorder.wait_for(1, WAIT));
        assert!(recorder.records()[0].at.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_drops_unreleased_items() {
        sluice_test::setup();
        let recorder = ItemRecorder::new();
        let config = DispatcherConfig::default();
        let dispatcher =
            DelayedBatchDispatcher::new("stop", config, recorder.processor()).unwrap();

        assert!(dispatcher.put_delayed("now", Duration::ZERO));
        assert!(dispatcher.put_delayed("later", Duration::from_secs(60)));
        assert!(recorder.wait_for(1, WAIT));

        assert!(dispatcher.stop());
        assert!(!dispatcher.stop());
        dispatcher.stop_and_await();

        assert_eq!(recorder.items(), ["now"]);
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(dispatcher.state(), State::Terminated);
        assert!(!dispatcher.put("after"));
    }

    #[test]
    fn test_rejects_above_capacity() {
        sluice_test::setup();
        let recorder = ItemRecorder::new();
        let config = DispatcherConfig {
            delay_ms: 60_000,
            capacity: 2,
            ..Default::default()
        };
        let dispatcher =
            DelayedBatchDispatcher::new("capacity", config, recorder.processor()).unwrap();

        // Items are rejected once more than `capacity` items are pending.
        assert!(dispatcher.put(1));
        assert!(dispatcher.put_all([2, 3]));
        assert!(!dispatcher.put_all([4, 5]));
        assert_eq!(dispatcher.pending(), 3);
    }

    #[test]
    fn test_rejects_unrepresentable_delay() {
        sluice_test::setup();
        let recorder = ItemRecorder::new();
        let dispatcher =
            DelayedBatchDispatcher::new("overflow", DispatcherConfig::default(), recorder.processor())
                .unwrap();

        let captures = sluice_statsd::with_capturing_test_client(|| {
            assert!(!dispatcher.put_delayed(1, Duration::MAX));
        });
        assert_eq!(
            captures,
            ["batching.items.rejected:1|c|#name:overflow,reason:invalid_delay"]
        );
        assert_eq!(dispatcher.pending(), 0);

        // The dispatcher keeps accepting items with a valid delay.
        assert!(dispatcher.put_delayed(2, Duration::ZERO));
        assert!(recorder.wait_for(1, WAIT));
        dispatcher.stop_and_await();
        assert_eq!(recorder.items(), [2]);
    }

    #[test]
    fn test_dispatches_on_pool() {
        sluice_test::setup();
        let recorder = ItemRecorder::new();
        let config = DispatcherConfig {
            pool_size: 2,
            ..Default::default()
        };
        let dispatcher =
            DelayedBatchDispatcher::new("pooled", config, recorder.processor()).unwrap();

        for i in 0..4 {
            assert!(dispatcher.put_delayed(i, Duration::ZERO));
        }
        assert!(recorder.wait_for(4, WAIT));
        dispatcher.stop_and_await();

        let mut items = recorder.items();
        items.sort_unstable();
        assert_eq!(items, [0, 1, 2, 3]);

        // Saturated pools hand items back to the dispatcher thread.
        let threads: Vec<_> = recorder
            .records()
            .into_iter()
            .map(|record| record.thread.unwrap_or_default())
            .collect();
        assert!(threads.iter().all(|name| name.starts_with("pooled")));
        assert!(
            threads
                .iter()
                .any(|name| name.starts_with("pooled-dispatch-thread-"))
        );
    }

    #[test]
    fn test_idle_dispatcher_stays_alive() {
        sluice_test::setup();
        let recorder = ItemRecorder::<u32>::new();
        let config = DispatcherConfig {
            poll_timeout_ms: 10,
            ..Default::default()
        };
        let dispatcher =
            DelayedBatchDispatcher::new("idle", config, recorder.processor()).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(dispatcher.is_alive());
        assert_eq!(dispatcher.state(), State::Running);

        dispatcher.stop_and_await();
        assert!(!dispatcher.is_alive());
    }

    #[test]
    fn test_invalid_config() {
        let recorder = ItemRecorder::<u32>::new();
        let config = DispatcherConfig {
            pool_size: 0,
            ..Default::default()
        };

        let result = DelayedBatchDispatcher::new("invalid", config, recorder.processor());
        assert!(matches!(result, Err(BatchError::InvalidConfig(_))));
    }
}
