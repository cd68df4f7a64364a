//! Helpers for testing pools, accumulators and dispatchers.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`sluice_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - Processors run on background threads. Use the recorders in this crate and their bounded
//!    `wait_for` methods instead of sleeping for a fixed time.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sluice_test::BatchRecorder;
//!
//! sluice_test::setup();
//!
//! let recorder = BatchRecorder::new();
//! let processor = recorder.processor();
//! std::thread::spawn(move || processor(vec![1, 2, 3], true));
//!
//! assert!(recorder.wait_for(1, Duration::from_secs(1)));
//! assert_eq!(recorder.items(), [1, 2, 3]);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the crates of this workspace and mutes
///    all other logs.
pub fn setup() {
    sluice_log::init_test!();
}

/// A batch captured by a [`BatchRecorder`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedBatch<T> {
    /// The items of the batch in flush order.
    pub items: Vec<T>,
    /// Whether the batch was flagged as the final batch.
    pub is_final: bool,
    /// Name of the thread the batch was processed on.
    pub thread: Option<String>,
}

#[derive(Debug)]
struct Recording<R> {
    records: Mutex<Vec<R>>,
    condvar: Condvar,
}

impl<R> Recording<R> {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            condvar: Condvar::new(),
        }
    }

    fn push(&self, record: R) {
        self.records.lock().push(record);
        self.condvar.notify_all();
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }

    fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut records = self.records.lock();

        while records.len() < count {
            if self.condvar.wait_until(&mut records, deadline).timed_out() {
                return records.len() >= count;
            }
        }

        true
    }
}

fn current_thread_name() -> Option<String> {
    std::thread::current().name().map(str::to_owned)
}

/// Records batches handed to a batch processor.
///
/// Cloning the recorder yields a handle to the same recording.
#[derive(Debug)]
pub struct BatchRecorder<T> {
    inner: Arc<Recording<RecordedBatch<T>>>,
}

impl<T> Clone for BatchRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for BatchRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BatchRecorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Recording::new()),
        }
    }

    /// Records a batch along with the name of the current thread.
    pub fn record(&self, items: Vec<T>, is_final: bool) {
        self.inner.push(RecordedBatch {
            items,
            is_final,
            thread: current_thread_name(),
        });
    }

    /// Returns a closure that records every batch it is called with.
    pub fn processor(&self) -> impl Fn(Vec<T>, bool) + Send + Sync + 'static
    where
        T: Send + 'static,
    {
        let recorder = self.clone();
        move |items, is_final| recorder.record(items, is_final)
    }

    /// Returns the number of recorded batches.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if no batch has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until at least `count` batches were recorded or the timeout elapses.
    ///
    /// Returns `true` if the expected number of batches arrived in time.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.inner.wait_for(count, timeout)
    }
}

impl<T: Clone> BatchRecorder<T> {
    /// Returns a copy of all recorded batches.
    pub fn batches(&self) -> Vec<RecordedBatch<T>> {
        self.inner.records.lock().clone()
    }

    /// Returns all recorded items, flattened in recording order.
    pub fn items(&self) -> Vec<T> {
        self.inner
            .records
            .lock()
            .iter()
            .flat_map(|batch| batch.items.iter().cloned())
            .collect()
    }
}

/// An item captured by an [`ItemRecorder`].
#[derive(Clone, Debug)]
pub struct RecordedItem<T> {
    /// The processed item.
    pub item: T,
    /// The instant the item reached the processor.
    pub at: Instant,
    /// Name of the thread the item was processed on.
    pub thread: Option<String>,
}

/// Records items handed to an item processor.
#[derive(Debug)]
pub struct ItemRecorder<T> {
    inner: Arc<Recording<RecordedItem<T>>>,
}

impl<T> Clone for ItemRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ItemRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ItemRecorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Recording::new()),
        }
    }

    /// Records an item with the current instant and thread name.
    pub fn record(&self, item: T) {
        self.inner.push(RecordedItem {
            item,
            at: Instant::now(),
            thread: current_thread_name(),
        });
    }

    /// Returns a closure that records every item it is called with.
    pub fn processor(&self) -> impl Fn(T) + Send + Sync + 'static
    where
        T: Send + 'static,
    {
        let recorder = self.clone();
        move |item| recorder.record(item)
    }

    /// Returns the number of recorded items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if no item has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until at least `count` items were recorded or the timeout elapses.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.inner.wait_for(count, timeout)
    }
}

impl<T: Clone> ItemRecorder<T> {
    /// Returns a copy of all recorded items with their metadata.
    pub fn records(&self) -> Vec<RecordedItem<T>> {
        self.inner.records.lock().clone()
    }

    /// Returns the recorded items in recording order.
    pub fn items(&self) -> Vec<T> {
        self.inner
            .records
            .lock()
            .iter()
            .map(|record| record.item.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_wait_for_times_out() {
        setup();
        let recorder = BatchRecorder::<u32>::new();

        let start = Instant::now();
        assert!(!recorder.wait_for(1, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_records_thread_name() {
        setup();
        let recorder = ItemRecorder::new();
        let processor = recorder.processor();

        thread::Builder::new()
            .name("recorder-test".to_owned())
            .spawn(move || processor("a"))
            .unwrap()
            .join()
            .unwrap();

        let records = recorder.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].thread.as_deref(), Some("recorder-test"));
    }
}
