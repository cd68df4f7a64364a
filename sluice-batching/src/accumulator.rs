use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use sluice_statsd::metric;

use crate::config::{AccumulatorConfig, BatchError};
use crate::escalation::Escalation;
use crate::intake::{self, Intake, Rejection};
use crate::processor::BatchProcessor;
use crate::state::{Lifecycle, State, TerminationGuard};
use crate::statsd::{BatchCounters, BatchDistributions, BatchTimers};

/// State shared between the handle and the accumulator thread.
///
/// The receiving side of the intake lives here rather than on the thread, so the intake stays
/// connected even if the thread dies.
struct Shared<T> {
    lifecycle: Lifecycle,
    rx: Receiver<T>,
}

/// Collects items on a background thread and flushes them in batches.
///
/// A batch is flushed when it reaches `batch_size` items, or when it is not empty and `period` has
/// elapsed since the previous flush. Flushes run on the accumulator thread until the intake
/// backlog at flush time exceeds `escalation_factor × batch_size`. From then on, flushes are
/// submitted to a dedicated worker pool of up to `max_pool_size` threads, so the accumulator keeps
/// draining the intake while slow batches are processed. When all pool threads are busy, the
/// accumulator thread runs the flush itself.
///
/// Items within a batch keep their insertion order. Batches are flushed in order, but once
/// escalated they may complete in any order.
///
/// After [`stop`](Self::stop), [`put`](Self::put) rejects and the accumulator drains all queued
/// items. The flush that empties the accumulator has `is_final` set. Dropping the accumulator
/// stops it without waiting for the drain.
///
/// If the processor panics on the accumulator thread, the thread terminates. The intake keeps
/// accepting items, but nothing drains it anymore.
pub struct BatchAccumulator<T> {
    intake: Intake<T>,
    shared: Arc<Shared<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchAccumulator<T> {
    /// Validates the configuration and starts the accumulator thread named `name`.
    pub fn new<P>(
        name: impl Into<String>,
        config: AccumulatorConfig,
        processor: P,
    ) -> Result<Self, BatchError>
    where
        P: BatchProcessor<T>,
    {
        config.validate()?;

        let name = name.into();
        let (intake, rx) = intake::channel(&config.intake);
        let shared = Arc::new(Shared {
            lifecycle: Lifecycle::new(name.clone()),
            rx,
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            processor: Arc::new(processor),
            escalation: Escalation::new(&name, &config),
            batch_size: config.batch_size,
            period: config.period(),
            grace: config.shutdown_grace(),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(BatchError::Spawn)?;

        sluice_log::debug!(
            name = name.as_str(),
            batch_size = config.batch_size,
            period_ms = config.period_ms,
            "started accumulator"
        );

        Ok(Self {
            intake,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl<T> BatchAccumulator<T> {
    /// Enqueues an item for the next batch.
    ///
    /// Returns `false` if the accumulator was stopped or a bounded intake rejected the item.
    pub fn put(&self, item: T) -> bool {
        let lifecycle = &self.shared.lifecycle;
        let result = lifecycle
            .admit(|| self.intake.push(item))
            .unwrap_or(Err(Rejection::Stopped));

        match result {
            Ok(()) => true,
            Err(rejection) => {
                metric!(
                    counter(BatchCounters::ItemsRejected) += 1,
                    name = lifecycle.name(),
                    reason = rejection.as_str()
                );
                sluice_log::trace!(
                    name = lifecycle.name(),
                    reason = rejection.as_str(),
                    "rejected item"
                );
                false
            }
        }
    }

    /// Enqueues items in order and stops at the first rejected item.
    ///
    /// Returns `true` if all items were accepted.
    pub fn put_all<I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().all(|item| self.put(item))
    }

    /// Stops accepting items and drains the intake in the background.
    ///
    /// Returns `true` if this call stopped the accumulator.
    pub fn stop(&self) -> bool {
        let stopped = self.shared.lifecycle.stop();
        if stopped {
            sluice_log::debug!(name = self.name(), "stopping accumulator");
        }
        stopped
    }

    /// Stops the accumulator and blocks until all items were flushed.
    ///
    /// This also waits up to the shutdown grace period for flushes running on the escalation pool.
    pub fn stop_and_await(&self) {
        self.stop();
        self.shared.lifecycle.await_termination();

        if let Some(handle) = self.handle.lock().take() {
            handle.join().ok();
        }
    }

    /// Returns the name of the accumulator and its thread.
    pub fn name(&self) -> &str {
        self.shared.lifecycle.name()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.lifecycle.state()
    }

    /// Returns `true` while the accumulator thread runs.
    pub fn is_alive(&self) -> bool {
        self.shared.lifecycle.is_alive()
    }

    /// Returns the number of flushes so far.
    pub fn flushes(&self) -> u64 {
        self.shared.lifecycle.flushes()
    }

    /// Returns `true` if the accumulator created its escalation pool.
    pub fn escalated(&self) -> bool {
        self.shared.lifecycle.escalated()
    }

    /// Returns the number of items waiting in the intake.
    pub fn pending(&self) -> usize {
        self.shared.rx.len()
    }
}

impl<T> fmt::Debug for BatchAccumulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<T> Drop for BatchAccumulator<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The state owned by the accumulator thread.
struct Worker<T> {
    shared: Arc<Shared<T>>,
    processor: Arc<dyn BatchProcessor<T>>,
    escalation: Escalation,
    batch_size: usize,
    period: Duration,
    grace: Duration,
}

impl<T: Send + 'static> Worker<T> {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let lifecycle = &shared.lifecycle;
        let rx = &shared.rx;
        let _guard = TerminationGuard::new(lifecycle);

        let mut buffer = Vec::with_capacity(self.batch_size);
        let mut next_deadline = Instant::now() + self.period;

        loop {
            let stopped = lifecycle.is_stopped();

            // Once the stop flag is set, the intake no longer grows.
            if stopped && buffer.is_empty() && rx.is_empty() {
                self.escalation.shutdown(self.grace);
                break;
            }

            let room = self.batch_size - buffer.len();
            buffer.extend(rx.try_iter().take(room));

            let now = Instant::now();
            let full = buffer.len() >= self.batch_size;
            if full || !buffer.is_empty() && (stopped || now >= next_deadline) {
                let is_final = stopped && rx.is_empty();
                let batch = std::mem::replace(&mut buffer, Vec::with_capacity(self.batch_size));
                self.flush(batch, is_final);
                next_deadline = Instant::now() + self.period;
                continue;
            }

            if stopped {
                continue;
            }

            let mut timeout = self.period / 2;
            if !buffer.is_empty() {
                timeout = timeout.min(next_deadline.saturating_duration_since(now));
            }

            match rx.recv_timeout(timeout) {
                Ok(item) => buffer.push(item),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    if lifecycle.stop() {
                        sluice_log::warn!(
                            name = lifecycle.name(),
                            "intake disconnected, stopping accumulator"
                        );
                    }
                }
            }
        }
    }

    fn flush(&mut self, batch: Vec<T>, is_final: bool) {
        let lifecycle = &self.shared.lifecycle;
        let backlog = self.shared.rx.len();
        let size = batch.len();

        lifecycle.record_flush();
        metric!(
            distribution(BatchDistributions::BatchSize) = size as u64,
            name = lifecycle.name()
        );
        metric!(
            distribution(BatchDistributions::Backlog) = backlog as u64,
            name = lifecycle.name()
        );
        sluice_log::trace!(
            name = lifecycle.name(),
            size,
            backlog,
            is_final,
            "flushing batch"
        );

        match self.escalation.pool(backlog, lifecycle) {
            Some(pool) => {
                metric!(
                    counter(BatchCounters::Flushes) += 1,
                    name = lifecycle.name(),
                    escalated = "true"
                );

                let processor = Arc::clone(&self.processor);
                let shared = Arc::clone(&self.shared);
                let result = pool.execute(move || {
                    process(&*processor, shared.lifecycle.name(), batch, is_final)
                });

                if let Err(error) = result {
                    sluice_log::error!(
                        error = &error as &dyn std::error::Error,
                        name = lifecycle.name(),
                        size,
                        "failed to submit batch to escalation pool"
                    );
                }
            }
            None => {
                metric!(
                    counter(BatchCounters::Flushes) += 1,
                    name = lifecycle.name(),
                    escalated = "false"
                );
                process(&*self.processor, lifecycle.name(), batch, is_final);
            }
        }
    }
}

fn process<T: 'static>(
    processor: &dyn BatchProcessor<T>,
    name: &str,
    batch: Vec<T>,
    is_final: bool,
) {
    metric!(timer(BatchTimers::FlushDuration), name = name, {
        processor.process(batch, is_final)
    });
}
