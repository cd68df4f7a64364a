//! # Sluice Threading
//!
//! Thread pools and fan-out execution used by the sluice accumulators. The crate provides:
//!
//! - **Worker pools**: [`WorkerPool`] runs closures on a dynamically sized set of named threads.
//!   Pools are configured through [`WorkerPoolBuilder`] with a core and maximum thread count, an
//!   idle timeout, a bounded or rendezvous queue and a [`RejectionPolicy`].
//! - **Pool registry**: [`PoolRegistry`] owns shared, named pools and shuts all of them down when
//!   it is dropped, so tests can create and tear down isolated instances.
//! - **Fan-out**: [`fan_out::execute`] maps a function over a collection on a pool and joins the
//!   results, or runs on the caller when the collection is small.
//!
//! ## Concurrency Model
//!
//! A pool starts without threads. Each submission below the core size starts a new thread.
//! Beyond that, tasks are queued, and only when the queue cannot take a task does the pool grow up
//! to its maximum size. When the queue is full and all threads are busy, the rejection policy
//! decides: run the task on the submitting thread, drop it, or block the submitter until a worker
//! takes it.
//!
//! Threads that stay idle for the keep-alive duration exit, including core threads. A pool with
//! no pending work therefore holds no threads.
//!
//! With a queue capacity of `0` the queue is a rendezvous channel: a task is only accepted when a
//! worker is waiting for it, so bursts grow the pool instead of queueing.
//!
//! ## Usage Example
//!
//! ```
//! use std::time::Duration;
//! use sluice_threading::{RejectionPolicy, WorkerPoolBuilder};
//!
//! let pool = WorkerPoolBuilder::new("example")
//!     .core_threads(1)
//!     .max_threads(4)
//!     .keep_alive(Duration::from_secs(30))
//!     .queue_capacity(16)
//!     .rejection_policy(RejectionPolicy::CallerRuns)
//!     .build()
//!     .expect("failed to build worker pool");
//!
//! pool.execute(|| {
//!     // Place your task logic here
//! })
//! .expect("pool is running");
//!
//! pool.shutdown();
//! assert!(pool.await_termination(Duration::from_secs(5)));
//! ```
//!
//! ## Error Handling
//!
//! Panics in tasks are caught on the worker thread and either passed to a custom panic handler or
//! logged. A panicking task never takes a worker thread down.

mod builder;
mod config;
pub mod fan_out;
mod metrics;
mod pool;
mod registry;

pub use self::builder::*;
pub use self::config::*;
pub use self::pool::*;
pub use self::registry::*;
