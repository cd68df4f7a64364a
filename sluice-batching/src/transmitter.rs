use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use sluice_statsd::metric;

use crate::config::{BatchError, TransmitterConfig};
use crate::escalation::Escalation;
use crate::intake::{self, Intake, Rejection};
use crate::processor::Transmit;
use crate::state::{Lifecycle, State, TerminationGuard};
use crate::statsd::{BatchCounters, BatchDistributions, BatchTimers};

struct Shared<T> {
    lifecycle: Lifecycle,
    aborted: AtomicBool,
    rx: Receiver<T>,
}

impl<T> Shared<T> {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// A batch accumulator for stream-like destinations with an explicit end of stream.
///
/// Batches are flushed by size and by the time elapsed since the previous flush, and escalate to
/// a worker pool under backlog exactly like [`BatchAccumulator`](crate::BatchAccumulator). Every
/// [`Transmit::transmit`] call returns a [`Finalizer`](crate::Finalizer), which runs right after
/// it on the same thread.
///
/// There are two ways to shut a transmitter down:
///
///  - [`end`](Self::end) drains everything that was put. The last flush has `is_final` set, even
///    if it carries no items.
///  - [`stop`](Self::stop) halts after the current flush. Queued items are dropped.
pub struct Transmitter<T> {
    intake: Intake<T>,
    shared: Arc<Shared<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Transmitter<T> {
    /// Validates the configuration and starts the transmitter thread named `name`.
    pub fn new<X>(
        name: impl Into<String>,
        config: TransmitterConfig,
        transmit: X,
    ) -> Result<Self, BatchError>
    where
        X: Transmit<T>,
    {
        config.validate()?;

        let name = name.into();
        let (intake, rx) = intake::channel(&config.intake);
        let shared = Arc::new(Shared {
            lifecycle: Lifecycle::new(name.clone()),
            aborted: AtomicBool::new(false),
            rx,
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            transmit: Arc::new(transmit),
            escalation: Escalation::new(&name, &config),
            batch_size: config.batch_size,
            period: config.period(),
            grace: config.shutdown_grace(),
            last_flush: Instant::now(),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(BatchError::Spawn)?;

        sluice_log::debug!(name = name.as_str(), "started transmitter");

        Ok(Self {
            intake,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl<T> Transmitter<T> {
    /// Enqueues an item for the next batch.
    ///
    /// Returns `false` after [`end`](Self::end) or [`stop`](Self::stop), or if a bounded intake
    /// rejected the item.
    pub fn put(&self, item: T) -> bool {
        let lifecycle = &self.shared.lifecycle;
        let result = lifecycle
            .admit(|| self.intake.push(item))
            .unwrap_or(Err(Rejection::Stopped));

        if let Err(rejection) = result {
            metric!(
                counter(BatchCounters::ItemsRejected) += 1,
                name = lifecycle.name(),
                reason = rejection.as_str()
            );
            return false;
        }

        true
    }

    /// Enqueues items in order and stops at the first rejected item.
    pub fn put_all<I>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().all(|item| self.put(item))
    }

    /// Signals the end of the stream.
    ///
    /// The transmitter flushes all accepted items and then terminates. Returns `true` if this call
    /// ended the stream.
    pub fn end(&self) -> bool {
        let ended = self.shared.lifecycle.stop();
        if ended {
            sluice_log::debug!(name = self.name(), "ending transmitter");
        }
        ended
    }

    /// Ends the stream and blocks until the final flush completed.
    pub fn end_and_await(&self) {
        self.end();
        self.join();
    }

    /// Halts the transmitter without draining.
    ///
    /// A flush in progress completes. All other items are dropped. Returns `true` if this call
    /// halted the transmitter.
    pub fn stop(&self) -> bool {
        if self.shared.aborted.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.shared.lifecycle.stop();
        sluice_log::debug!(name = self.name(), "stopping transmitter");
        true
    }

    /// Halts the transmitter and blocks until its thread exited.
    pub fn stop_and_await(&self) {
        self.stop();
        self.join();
    }

    fn join(&self) {
        self.shared.lifecycle.await_termination();

        if let Some(handle) = self.handle.lock().take() {
            handle.join().ok();
        }
    }

    /// Returns the name of the transmitter and its thread.
    pub fn name(&self) -> &str {
        self.shared.lifecycle.name()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.lifecycle.state()
    }

    /// Returns `true` while the transmitter thread runs.
    pub fn is_alive(&self) -> bool {
        self.shared.lifecycle.is_alive()
    }

    /// Returns the number of flushes so far.
    pub fn flushes(&self) -> u64 {
        self.shared.lifecycle.flushes()
    }

    /// Returns `true` if the transmitter created its escalation pool.
    pub fn escalated(&self) -> bool {
        self.shared.lifecycle.escalated()
    }

    /// Returns the number of items waiting in the intake.
    pub fn pending(&self) -> usize {
        self.shared.rx.len()
    }
}

impl<T> fmt::Debug for Transmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitter")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<T> Drop for Transmitter<T> {
    fn drop(&mut self) {
        self.end();
    }
}

struct Worker<T> {
    shared: Arc<Shared<T>>,
    transmit: Arc<dyn Transmit<T>>,
    escalation: Escalation,
    batch_size: usize,
    period: Duration,
    grace: Duration,
    last_flush: Instant,
}

impl<T: Send + 'static> Worker<T> {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let lifecycle = &shared.lifecycle;
        let _guard = TerminationGuard::new(lifecycle);

        let mut buffer = Vec::with_capacity(self.batch_size);

        loop {
            if shared.is_aborted() {
                self.abort(buffer);
                break;
            }

            if lifecycle.is_stopped() {
                self.drain(buffer);
                break;
            }

            let room = self.batch_size - buffer.len();
            buffer.extend(shared.rx.try_iter().take(room));

            if buffer.len() >= self.batch_size
                || !buffer.is_empty() && self.cumulate() >= self.period
            {
                let batch = std::mem::replace(&mut buffer, Vec::with_capacity(self.batch_size));
                self.flush(batch, false);
                continue;
            }

            let mut timeout = self.period / 2;
            if !buffer.is_empty() {
                timeout = timeout.min(self.period.saturating_sub(self.cumulate()));
            }

            match shared.rx.recv_timeout(timeout) {
                Ok(item) => buffer.push(item),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    if lifecycle.stop() {
                        sluice_log::warn!(
                            name = lifecycle.name(),
                            "intake disconnected, ending transmitter"
                        );
                    }
                }
            }
        }

        self.escalation.shutdown(self.grace);
    }

    /// Returns the time elapsed since the last flush.
    fn cumulate(&self) -> Duration {
        self.last_flush.elapsed()
    }

    /// Flushes everything that was put, in two forced cycles followed by the final flush.
    ///
    /// The second cycle confirms that the intake is empty before the final batch is sealed.
    fn drain(&mut self, mut buffer: Vec<T>) {
        for _ in 0..2 {
            self.drain_forced(&mut buffer);
            if self.shared.is_aborted() {
                self.abort(buffer);
                return;
            }
            thread::yield_now();
        }

        self.flush(buffer, true);
    }

    /// Flushes full batches as long as more items are queued.
    fn drain_forced(&mut self, buffer: &mut Vec<T>) {
        loop {
            let room = self.batch_size - buffer.len();
            buffer.extend(self.shared.rx.try_iter().take(room));

            if buffer.len() < self.batch_size || self.shared.rx.is_empty() {
                return;
            }

            let batch = std::mem::replace(buffer, Vec::with_capacity(self.batch_size));
            self.flush(batch, false);
        }
    }

    fn abort(&mut self, buffer: Vec<T>) {
        let dropped = buffer.len() + self.shared.rx.drain().count();
        if dropped > 0 {
            let name = self.shared.lifecycle.name();
            metric!(
                counter(BatchCounters::ItemsDropped) += dropped as i64,
                name = name
            );
            sluice_log::warn!(name, dropped, "dropped items of stopped transmitter");
        }
    }

    fn flush(&mut self, batch: Vec<T>, is_final: bool) {
        let lifecycle = &self.shared.lifecycle;
        let backlog = self.shared.rx.len();

        self.last_flush = Instant::now();
        lifecycle.record_flush();
        metric!(
            distribution(BatchDistributions::BatchSize) = batch.len() as u64,
            name = lifecycle.name()
        );
        sluice_log::trace!(
            name = lifecycle.name(),
            size = batch.len(),
            backlog,
            is_final,
            "transmitting batch"
        );

        match self.escalation.pool(backlog, lifecycle) {
            Some(pool) => {
                metric!(
                    counter(BatchCounters::Flushes) += 1,
                    name = lifecycle.name(),
                    escalated = "true"
                );

                let size = batch.len();
                let transmitter = Arc::clone(&self.transmit);
                let shared = Arc::clone(&self.shared);
                let result = pool.execute(move || {
                    transmit(&*transmitter, shared.lifecycle.name(), batch, is_final)
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
                transmit(&*self.transmit, lifecycle.name(), batch, is_final);
            }
        }
    }
}

fn transmit<T: 'static>(
    transmitter: &dyn Transmit<T>,
    name: &str,
    batch: Vec<T>,
    is_final: bool,
) {
    metric!(timer(BatchTimers::FlushDuration), name = name, {
        let finalizer = transmitter.transmit(batch, is_final);
        finalizer();
    });
}

#[cfg(test)]
mod tests {
    use sluice_test::{BatchRecorder, ItemRecorder};

    use super::*;
    use crate::Finalizer;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(batch_size: usize, period_ms: u64) -> TransmitterConfig {
        TransmitterConfig {
            batch_size,
            period_ms,
            ..Default::default()
        }
    }

    /// Records batches and the thread each finalizer ran on.
    fn recording(
        batches: &BatchRecorder<u32>,
        finalized: &ItemRecorder<usize>,
    ) -> impl Fn(Vec<u32>, bool) -> Finalizer + Send + Sync + 'static {
        let batches = batches.clone();
        let finalized = finalized.clone();

        move |batch: Vec<u32>, is_final: bool| -> Finalizer {
            let size = batch.len();
            batches.record(batch, is_final);

            let finalized = finalized.clone();
            Box::new(move || finalized.record(size))
        }
    }

    #[test]
    fn test_finalizer_runs_after_transmit() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        let finalized = ItemRecorder::new();
        let transmitter =
            Transmitter::new("finalize", config(2, 60_000), recording(&batches, &finalized))
                .unwrap();

        assert!(transmitter.put_all([1, 2]));
        assert!(finalized.wait_for(1, WAIT));

        let batch = &batches.batches()[0];
        let record = &finalized.records()[0];
        assert_eq!(batch.items, [1, 2]);
        assert_eq!(record.item, 2);
        assert_eq!(record.thread, batch.thread);
    }

    #[test]
    fn test_escalated_finalizers_follow_transmit() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        // Each finalizer records the thread its transmit ran on.
        let finalized = ItemRecorder::<Option<String>>::new();

        let slow = {
            let batches = batches.clone();
            let finalized = finalized.clone();
            move |batch: Vec<u32>, is_final: bool| -> Finalizer {
                thread::sleep(Duration::from_millis(20));
                batches.record(batch, is_final);

                let transmitted_on = thread::current().name().map(str::to_owned);
                let finalized = finalized.clone();
                Box::new(move || finalized.record(transmitted_on))
            }
        };

        let config = TransmitterConfig {
            batch_size: 10,
            period_ms: 60_000,
            max_pool_size: 8,
            ..Default::default()
        };
        let transmitter = Transmitter::new("backlog", config, slow).unwrap();

        assert!(transmitter.put_all(0..200));
        transmitter.end_and_await();

        assert!(transmitter.escalated());

        let mut items = batches.items();
        items.sort_unstable();
        assert_eq!(items, (0..200).collect::<Vec<_>>());

        let records = finalized.records();
        assert_eq!(records.len(), batches.len());
        for record in &records {
            assert_eq!(record.thread, record.item);
        }
        assert!(records.iter().any(|record| {
            record
                .thread
                .as_deref()
                .is_some_and(|name| name.starts_with("backlog-flush-thread-"))
        }));
    }

    #[test]
    fn test_flush_on_elapsed_time() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        let finalized = ItemRecorder::new();
        let transmitter =
            Transmitter::new("elapsed", config(100, 50), recording(&batches, &finalized))
                .unwrap();

        assert!(transmitter.put(7));
        assert!(batches.wait_for(1, WAIT));
        assert_eq!(batches.items(), [7]);
        assert!(!batches.batches()[0].is_final);
    }

    #[test]
    fn test_end_drains_everything() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        let finalized = ItemRecorder::new();
        let transmitter =
            Transmitter::new("end", config(3, 60_000), recording(&batches, &finalized)).unwrap();

        assert!(transmitter.put_all(0..7));
        transmitter.end_and_await();

        let recorded = batches.batches();
        assert_eq!(batches.items(), (0..7).collect::<Vec<_>>());
        assert!(recorded.last().unwrap().is_final);
        assert_eq!(recorded.iter().filter(|batch| batch.is_final).count(), 1);
        assert_eq!(finalized.len(), recorded.len());
        assert_eq!(transmitter.state(), State::Terminated);
    }

    #[test]
    fn test_end_without_items_flushes_empty_final_batch() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        let finalized = ItemRecorder::new();
        let transmitter =
            Transmitter::new("idle", config(3, 60_000), recording(&batches, &finalized))
                .unwrap();

        transmitter.end_and_await();

        let recorded = batches.batches();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].items.is_empty());
        assert!(recorded[0].is_final);
    }

    #[test]
    fn test_end_is_idempotent() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        let finalized = ItemRecorder::new();
        let transmitter =
            Transmitter::new("twice", config(3, 60_000), recording(&batches, &finalized))
                .unwrap();

        assert!(transmitter.put(1));
        assert!(transmitter.end());
        assert!(!transmitter.end());
        transmitter.end_and_await();

        assert!(!transmitter.put(2));
        assert_eq!(batches.len(), 1);
        assert_eq!(transmitter.flushes(), 1);
    }

    #[test]
    fn test_stop_drops_queued_items() {
        sluice_test::setup();
        let batches = BatchRecorder::new();
        let (started_tx, started_rx) = flume::bounded(1);
        let (release_tx, release_rx) = flume::bounded::<()>(1);

        let blocking = {
            let batches = batches.clone();
            move |batch: Vec<u32>, is_final: bool| -> Finalizer {
                started_tx.send(()).ok();
                release_rx.recv().ok();
                batches.record(batch, is_final);
                Box::new(|| ())
            }
        };

        let transmitter = Transmitter::new("stop", config(1, 60_000), blocking).unwrap();
        assert!(transmitter.put(1));
        started_rx.recv_timeout(WAIT).unwrap();

        assert!(transmitter.put_all([2, 3, 4]));
        assert!(transmitter.stop());
        assert!(!transmitter.stop());
        release_tx.send(()).unwrap();
        transmitter.stop_and_await();

        let recorded = batches.batches();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].items, [1]);
        assert!(!recorded[0].is_final);
        assert_eq!(transmitter.pending(), 0);
    }
}
