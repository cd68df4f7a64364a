//! Configuration for sluice pools, accumulators and dispatchers.
//!
//! The configuration lives in a folder containing a `config.yml` file. Every section is optional
//! and falls back to defaults:
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: json
//! metrics:
//!   statsd: 127.0.0.1:8125
//!   prefix: sluice
//! pools:
//!   shared:
//!     core_threads: 2
//!     max_threads: 8
//!     rejection_policy: caller_runs
//! accumulators:
//!   events:
//!     batch_size: 500
//!     period_ms: 1000
//! dispatchers:
//!   retries:
//!     delay_ms: 5000
//! transmitters:
//!   outcomes:
//!     batch_size: 100
//! ```
//!
//! Component sections are keyed by name. Their parameters are defined next to the components in
//! [`sluice_threading`] and [`sluice_batching`]. Values can be overridden through
//! [`OverridableConfig`], for instance from `SLUICE_*` environment variables.
#![warn(missing_docs)]

mod config;
mod overrides;
mod setup;

pub use self::config::*;
pub use self::overrides::*;
pub use self::setup::*;
