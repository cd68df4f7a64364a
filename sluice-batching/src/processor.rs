//! Callbacks invoked with flushed batches and released items.
//!
//! All traits are implemented for closures with a matching signature, so most callers never
//! implement them by hand.

/// An action returned by a [`Transmit`] call, run right after the call in the same context.
pub type Finalizer = Box<dyn FnOnce() + Send + 'static>;

/// Processes batches flushed by a [`BatchAccumulator`](crate::BatchAccumulator).
///
/// Batches arrive in flush order on the accumulator thread, or on threads of the escalation pool
/// once the accumulator escalated. Implementations must therefore tolerate concurrent calls.
pub trait BatchProcessor<T>: Send + Sync + 'static {
    /// Processes one batch.
    ///
    /// `is_final` is set on the flush that empties a stopped accumulator.
    fn process(&self, batch: Vec<T>, is_final: bool);
}

impl<T, F> BatchProcessor<T> for F
where
    F: Fn(Vec<T>, bool) + Send + Sync + 'static,
{
    fn process(&self, batch: Vec<T>, is_final: bool) {
        self(batch, is_final)
    }
}

/// Processes single items released by a [`DelayedBatchDispatcher`](crate::DelayedBatchDispatcher).
pub trait ItemProcessor<T>: Send + Sync + 'static {
    /// Processes one released item.
    fn process(&self, item: T);
}

impl<T, F> ItemProcessor<T> for F
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn process(&self, item: T) {
        self(item)
    }
}

/// Hands batches of a [`Transmitter`](crate::Transmitter) to their destination.
pub trait Transmit<T>: Send + Sync + 'static {
    /// Transmits one batch and returns the action completing it.
    ///
    /// `is_final` is set on the last flush after [`end`](crate::Transmitter::end).
    fn transmit(&self, batch: Vec<T>, is_final: bool) -> Finalizer;
}

impl<T, F> Transmit<T> for F
where
    F: Fn(Vec<T>, bool) -> Finalizer + Send + Sync + 'static,
{
    fn transmit(&self, batch: Vec<T>, is_final: bool) -> Finalizer {
        self(batch, is_final)
    }
}
