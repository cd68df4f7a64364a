use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A payload that becomes eligible for processing at a fixed instant.
///
/// Items order by their release instant. Items released at the same instant order by their
/// sequence number, which the [`DelayQueue`] assigns in insertion order.
pub struct DelayedItem<T> {
    payload: T,
    release_at: Instant,
    seq: u64,
}

impl<T> DelayedItem<T> {
    /// Wraps `payload` to be released at `release_at`.
    pub fn new(payload: T, release_at: Instant, seq: u64) -> Self {
        Self {
            payload,
            release_at,
            seq,
        }
    }

    /// Returns the wrapped payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Unwraps the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Returns the instant at which the item becomes eligible.
    pub fn release_at(&self) -> Instant {
        self.release_at
    }

    /// Returns the insertion sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the time left until the release, zero if the item is released.
    pub fn remaining(&self) -> Duration {
        self.release_at.saturating_duration_since(Instant::now())
    }

    /// Returns `true` if the item is eligible at `now`.
    pub fn is_released(&self, now: Instant) -> bool {
        self.release_at <= now
    }

    fn key(&self) -> (Instant, u64) {
        (self.release_at, self.seq)
    }
}

impl<T> PartialEq for DelayedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for DelayedItem<T> {}

impl<T> PartialOrd for DelayedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl<T: fmt::Debug> fmt::Debug for DelayedItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedItem")
            .field("payload", &self.payload)
            .field("remaining", &self.remaining())
            .field("seq", &self.seq)
            .finish()
    }
}

/// Result of [`DelayQueue::poll`].
#[derive(Debug)]
pub enum Polled<T> {
    /// The earliest released item.
    Released(T),
    /// No item was released before the timeout.
    Timeout,
    /// The queue was closed.
    Closed,
}

#[derive(Debug)]
struct QueueState<T> {
    heap: BinaryHeap<Reverse<DelayedItem<T>>>,
    next_seq: u64,
    closed: bool,
}

/// A queue that hands out items in release order once they are released.
pub struct DelayQueue<T> {
    state: Mutex<QueueState<T>>,
    condvar: Condvar,
}

impl<T> DelayQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Adds `payload` to be released at `release_at`.
    pub fn push(&self, payload: T, release_at: Instant) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq = seq.wrapping_add(1);
        state.heap.push(Reverse(DelayedItem::new(payload, release_at, seq)));
        drop(state);

        // The new item may be released earlier than the previous head.
        self.condvar.notify_one();
    }

    /// Returns the number of queued items, released or not.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Returns `true` if no item is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `timeout` for the earliest item to be released and removes it.
    pub fn poll(&self, timeout: Duration) -> Polled<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Polled::Closed;
            }

            let now = Instant::now();
            let head = state.heap.peek().map(|Reverse(head)| head.release_at());
            let wake_at = match head {
                Some(release_at) if release_at <= now => {
                    if let Some(Reverse(item)) = state.heap.pop() {
                        return Polled::Released(item.into_payload());
                    }
                    continue;
                }
                Some(release_at) => release_at.min(deadline),
                None => deadline,
            };

            if now >= deadline {
                return Polled::Timeout;
            }

            self.condvar.wait_until(&mut state, wake_at);
        }
    }

    /// Wakes all pollers and makes them return [`Polled::Closed`].
    ///
    /// Items remain in the queue and can still be removed.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.condvar.notify_all();
    }

    /// Removes all items released at `now`, in release order.
    pub fn take_released(&self, now: Instant) -> Vec<T> {
        let mut state = self.state.lock();
        let mut released = Vec::new();

        while state
            .heap
            .peek()
            .is_some_and(|Reverse(head)| head.is_released(now))
        {
            if let Some(Reverse(item)) = state.heap.pop() {
                released.push(item.into_payload());
            }
        }

        released
    }

    /// Removes all remaining items.
    pub fn clear(&self) -> Vec<DelayedItem<T>> {
        let heap = std::mem::take(&mut self.state.lock().heap);
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(item)| item)
            .collect()
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DelayQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_orders_by_release_then_seq() {
        let now = Instant::now();
        let mut items = vec![
            DelayedItem::new("c", now + Duration::from_millis(300), 0),
            DelayedItem::new("a", now + Duration::from_millis(100), 1),
            DelayedItem::new("b2", now + Duration::from_millis(200), 3),
            DelayedItem::new("b1", now + Duration::from_millis(200), 2),
        ];

        items.sort();
        let order: Vec<_> = items.iter().map(|item| *item.payload()).collect();
        assert_eq!(order, ["a", "b1", "b2", "c"]);
    }

    #[test]
    fn test_equal_release_keeps_insertion_order() {
        let queue = DelayQueue::new();
        let release_at = Instant::now();

        for i in 0..5 {
            queue.push(i, release_at);
        }

        assert_eq!(queue.take_released(release_at), [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_poll_waits_for_release() {
        let queue = DelayQueue::new();
        let start = Instant::now();
        queue.push("late", start + Duration::from_millis(60));
        queue.push("early", start + Duration::from_millis(30));

        assert!(matches!(
            queue.poll(Duration::from_secs(5)),
            Polled::Released("early")
        ));
        assert!(start.elapsed() >= Duration::from_millis(30));

        assert!(matches!(
            queue.poll(Duration::from_secs(5)),
            Polled::Released("late")
        ));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_poll_times_out() {
        let queue = DelayQueue::new();
        queue.push((), Instant::now() + Duration::from_secs(60));

        assert!(matches!(
            queue.poll(Duration::from_millis(20)),
            Polled::Timeout
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_push_wakes_poller() {
        let queue = Arc::new(DelayQueue::new());
        queue.push("late", Instant::now() + Duration::from_secs(60));

        let poller = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.poll(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.push("now", Instant::now());

        assert!(matches!(poller.join().unwrap(), Polled::Released("now")));
    }

    #[test]
    fn test_close_wakes_poller() {
        let queue = Arc::new(DelayQueue::<()>::new());

        let poller = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.poll(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(matches!(poller.join().unwrap(), Polled::Closed));
    }

    #[test]
    fn test_clear_returns_release_order() {
        let queue = DelayQueue::new();
        let now = Instant::now();
        queue.push(2, now + Duration::from_secs(2));
        queue.push(1, now + Duration::from_secs(1));

        let cleared: Vec<_> = queue.clear().into_iter().map(DelayedItem::into_payload).collect();
        assert_eq!(cleared, [1, 2]);
        assert!(queue.is_empty());
    }
}
