use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The shortest flush period an accumulator accepts.
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Default backlog multiple of the batch size above which flushes move to a worker pool.
pub const DEFAULT_ESCALATION_FACTOR: f64 = 1.5;

/// Any error that may occur when constructing an accumulator or dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The background thread could not be started.
    #[error("failed to spawn background thread")]
    Spawn(#[source] io::Error),
}

/// What happens to `put` calls when a bounded intake is full.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Rejects the item immediately.
    #[default]
    Reject,
    /// Blocks the producer until there is space, for at most
    /// [`block_timeout_ms`](IntakeConfig::block_timeout_ms).
    Block,
}

/// Parameters of the producer-facing queue of an accumulator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct IntakeConfig {
    /// Maximum number of items waiting to be buffered.
    ///
    /// Defaults to `None`, an unbounded queue. A slow processor then causes unbounded memory growth
    /// that escalation alone does not prevent.
    pub capacity: Option<usize>,

    /// Behavior of `put` on a full bounded queue.
    pub backpressure: Backpressure,

    /// Maximum time in milliseconds a blocked producer waits for space.
    ///
    /// Defaults to `1000`. Only used with [`Backpressure::Block`].
    pub block_timeout_ms: u64,
}

impl IntakeConfig {
    /// Returns the block timeout as a [`Duration`].
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            backpressure: Backpressure::default(),
            block_timeout_ms: 1000,
        }
    }
}

/// Parameters of a [`BatchAccumulator`](crate::BatchAccumulator).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Number of items that triggers a flush.
    ///
    /// Defaults to `100`. Must be positive.
    pub batch_size: usize,

    /// Maximum time in milliseconds an item waits in the buffer before it is flushed.
    ///
    /// Defaults to `1000`. Must be at least [`MIN_PERIOD`].
    pub period_ms: u64,

    /// Maximum number of threads of the escalation pool.
    ///
    /// Defaults to `4`. Must be positive.
    pub max_pool_size: usize,

    /// Multiple of `batch_size` the intake backlog has to exceed at flush time to create the
    /// escalation pool.
    ///
    /// Defaults to `1.5`. Must be at least `1.0`.
    pub escalation_factor: f64,

    /// Time in milliseconds to wait for running pool flushes on termination.
    ///
    /// Defaults to `30000`.
    pub shutdown_grace_ms: u64,

    /// The producer-facing queue.
    pub intake: IntakeConfig,
}

impl AccumulatorConfig {
    /// Returns the flush period as a [`Duration`].
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Returns the shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Checks that all values are in range.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.period() < MIN_PERIOD {
            return Err(BatchError::InvalidConfig("period must be at least 10ms"));
        }
        if self.batch_size == 0 {
            return Err(BatchError::InvalidConfig("batch size must be positive"));
        }
        if self.max_pool_size == 0 {
            return Err(BatchError::InvalidConfig("max pool size must be positive"));
        }
        if self.escalation_factor.is_nan() || self.escalation_factor < 1.0 {
            return Err(BatchError::InvalidConfig(
                "escalation factor must be at least 1.0",
            ));
        }
        if self.intake.capacity == Some(0) {
            return Err(BatchError::InvalidConfig("intake capacity must be positive"));
        }

        Ok(())
    }
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            period_ms: 1000,
            max_pool_size: 4,
            escalation_factor: DEFAULT_ESCALATION_FACTOR,
            shutdown_grace_ms: 30_000,
            intake: IntakeConfig::default(),
        }
    }
}

/// Parameters of a [`Transmitter`](crate::Transmitter).
///
/// Transmitters flush and escalate exactly like accumulators.
pub type TransmitterConfig = AccumulatorConfig;

/// Parameters of a [`DelayedBatchDispatcher`](crate::DelayedBatchDispatcher).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delay in milliseconds between `put` and the release of an item.
    ///
    /// Defaults to `1000`.
    pub delay_ms: u64,

    /// Number of pending items above which `put` rejects.
    ///
    /// Defaults to `10000`.
    pub capacity: usize,

    /// Number of threads processing released items.
    ///
    /// Defaults to `1`, which processes items on the dispatcher thread. Larger values create a
    /// worker pool on the first release.
    pub pool_size: usize,

    /// Maximum time in milliseconds the dispatcher waits for a release before it logs that it is
    /// still alive.
    ///
    /// Defaults to `3000`.
    pub poll_timeout_ms: u64,

    /// Time in milliseconds to wait for running pool tasks on termination.
    ///
    /// Defaults to `30000`.
    pub shutdown_grace_ms: u64,
}

impl DispatcherConfig {
    /// Returns the default delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Returns the poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Returns the shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Checks that all values are in range.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.pool_size == 0 {
            return Err(BatchError::InvalidConfig("pool size must be positive"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(BatchError::InvalidConfig("poll timeout must be positive"));
        }

        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            capacity: 10_000,
            pool_size: 1,
            poll_timeout_ms: 3000,
            shutdown_grace_ms: 30_000,
        }
    }
}
