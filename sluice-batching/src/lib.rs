//! Batching and delayed dispatch of items on background threads.
//!
//! Producers hand items to one of three consumers, each owning a dedicated background thread:
//!
//! - [`BatchAccumulator`] buffers items and flushes them to a [`BatchProcessor`] when either
//!   `batch_size` items are buffered or `period` has elapsed since the previous flush.
//! - [`Transmitter`] flushes like the accumulator, but its [`Transmit`] callback returns a
//!   [`Finalizer`] per batch and it distinguishes between ending the stream, which drains all
//!   items, and stopping, which drops them.
//! - [`DelayedBatchDispatcher`] holds every item until its own delay elapsed and then hands it to
//!   an [`ItemProcessor`].
//!
//! `put` never blocks by default and returns `false` once the consumer was stopped. A bounded
//! intake with [`Backpressure`] can be configured through [`IntakeConfig`].
//!
//! # Escalation
//!
//! An accumulator processes batches on its own thread as long as it keeps up. When the intake
//! backlog at flush time exceeds `escalation_factor × batch_size`, the accumulator creates a
//! worker pool of up to `max_pool_size` threads and submits all further flushes to it. The
//! accumulator thread then only buffers and seals batches, and runs a flush itself only when all
//! pool threads are busy. The pool lives until the accumulator terminates.
//!
//! # Example
//!
//! ```
//! use sluice_batching::{AccumulatorConfig, BatchAccumulator};
//!
//! let config = AccumulatorConfig {
//!     batch_size: 2,
//!     ..Default::default()
//! };
//!
//! let accumulator = BatchAccumulator::new("example", config, |batch: Vec<u32>, is_final: bool| {
//!     // Send the batch somewhere
//!     let _ = (batch, is_final);
//! })
//! .expect("valid configuration");
//!
//! assert!(accumulator.put_all([1, 2, 3]));
//! accumulator.stop_and_await();
//! assert!(!accumulator.put(4));
//! ```
#![warn(missing_docs)]

mod accumulator;
mod config;
mod delay;
mod dispatcher;
mod escalation;
mod intake;
mod processor;
mod state;
mod statsd;
mod transmitter;

pub use self::accumulator::*;
pub use self::config::*;
pub use self::delay::*;
pub use self::dispatcher::*;
pub use self::processor::*;
pub use self::state::State;
pub use self::transmitter::*;
