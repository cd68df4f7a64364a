//! Maps a function over a collection on a [`WorkerPool`] and joins the results.
//!
//! Small collections are processed on the calling thread. Larger collections are submitted to the
//! pool as one task per item, and the caller blocks until every task reported back. Results are
//! returned in completion order, not in input order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::pool::{PoolError, WorkerPool};

/// Error returned by [`execute`] and [`execute_each`].
#[derive(Debug, thiserror::Error)]
pub enum FanOutError<E> {
    /// A task returned an error.
    #[error("task failed")]
    Task(#[source] E),
    /// A task panicked on a pool thread.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The pool dropped tasks without running them.
    #[error("{missing} of {expected} tasks were dropped by the pool")]
    Rejected {
        /// Number of tasks that never reported a result.
        missing: usize,
        /// Number of submitted tasks.
        expected: usize,
    },
    /// A task could not be submitted to the pool.
    #[error("failed to submit task")]
    Pool(#[from] PoolError),
}

/// Returns `true` if `len` items should be processed on the calling thread.
fn run_inline(len: usize, threshold: usize) -> bool {
    len == 0 || threshold == 0 || len < threshold
}

/// Applies `f` to every item and collects the results.
///
/// If `threshold` is `0` or there are fewer than `threshold` items, all items are processed on the
/// calling thread in input order without touching the pool. Otherwise, every item is submitted to
/// `pool` as a separate task and the results are collected in completion order.
///
/// The first failing task aborts the join. Its error is returned and results of other tasks are
/// discarded. Tasks that are still running complete in the background.
///
/// # Errors
///
/// - [`FanOutError::Task`] if `f` returned an error.
/// - [`FanOutError::Panicked`] if `f` panicked on a pool thread. Panics on the calling thread are
///   not caught.
/// - [`FanOutError::Rejected`] if the pool discarded tasks.
/// - [`FanOutError::Pool`] if the pool was shut down during submission.
pub fn execute<I, T, R, E, F>(
    items: I,
    f: F,
    threshold: usize,
    pool: &WorkerPool,
) -> Result<Vec<R>, FanOutError<E>>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
{
    let items = items.into_iter();
    let expected = items.len();

    if run_inline(expected, threshold) {
        return items.map(|item| f(item).map_err(FanOutError::Task)).collect();
    }

    let f = Arc::new(f);
    let (tx, rx) = flume::unbounded();

    for item in items {
        let f = Arc::clone(&f);
        let tx = tx.clone();

        pool.execute(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(item)))
                .map_err(|payload| {
                    FanOutError::Panicked(sluice_log::panic_message(payload.as_ref()).to_owned())
                })
                .and_then(|result| result.map_err(FanOutError::Task));

            // The receiver is gone if the join already failed.
            tx.send(result).ok();
        })?;
    }

    // Tasks dropped by the pool drop their sender, which disconnects the channel early.
    drop(tx);

    let mut results = Vec::with_capacity(expected);
    while results.len() < expected {
        match rx.recv() {
            Ok(result) => results.push(result?),
            Err(flume::RecvError::Disconnected) => {
                let missing = expected - results.len();
                sluice_log::warn!(
                    pool = pool.name(),
                    missing,
                    expected,
                    "fan-out tasks were dropped by the pool"
                );
                return Err(FanOutError::Rejected { missing, expected });
            }
        }
    }

    Ok(results)
}

/// Applies `f` to every item and waits for completion.
///
/// This is the variant of [`execute`] for functions without a result. The threshold and error
/// semantics are identical.
pub fn execute_each<I, T, E, F>(
    items: I,
    f: F,
    threshold: usize,
    pool: &WorkerPool,
) -> Result<(), FanOutError<E>>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
{
    execute(items, f, threshold, pool).map(|_| ())
}
