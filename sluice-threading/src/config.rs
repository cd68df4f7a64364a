use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::{DEFAULT_KEEP_ALIVE, RejectionPolicy, WorkerPoolBuilder};

/// Default capacity of the task queue of configured pools.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Serializable parameters of a [`WorkerPool`](crate::WorkerPool).
///
/// The pool name is not part of the configuration. Pools configured in a map take the name of
/// their key, see [`PoolRegistry::get_or_create`](crate::PoolRegistry::get_or_create).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of threads started eagerly by submissions before tasks are queued.
    ///
    /// Defaults to `1`.
    pub core_threads: usize,

    /// Maximum number of threads of the pool.
    ///
    /// Defaults to the number of logical CPUs.
    pub max_threads: usize,

    /// Time in milliseconds an idle thread waits for work before it exits.
    ///
    /// Defaults to `60000`, one minute.
    pub keep_alive_ms: u64,

    /// Capacity of the task queue.
    ///
    /// `0` selects a rendezvous queue. Defaults to `1024`.
    pub queue_capacity: usize,

    /// What happens to tasks when the queue is full and all threads are busy.
    pub rejection_policy: RejectionPolicy,

    /// If set, dropping the pool does not wait for its threads.
    pub daemon: bool,
}

impl PoolConfig {
    /// Returns the keep-alive as a [`Duration`].
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Creates a [`WorkerPoolBuilder`] named `name` with the parameters of this config.
    pub fn to_builder(&self, name: impl Into<String>) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(name)
            .core_threads(self.core_threads)
            .max_threads(self.max_threads)
            .keep_alive(self.keep_alive())
            .queue_capacity(self.queue_capacity)
            .rejection_policy(self.rejection_policy)
            .daemon(self.daemon)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_threads: 1,
            max_threads: num_cpus::get(),
            keep_alive_ms: DEFAULT_KEEP_ALIVE.as_millis() as u64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rejection_policy: RejectionPolicy::default(),
            daemon: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PoolConfig = serde_json::from_str(
            r#"{"max_threads": 8, "rejection_policy": "block", "keep_alive_ms": 500}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            PoolConfig {
                core_threads: 1,
                max_threads: 8,
                keep_alive_ms: 500,
                queue_capacity: 1024,
                rejection_policy: RejectionPolicy::Block,
                daemon: false,
            }
        );
    }

    #[test]
    fn test_to_builder() {
        let config = PoolConfig {
            core_threads: 2,
            max_threads: 4,
            queue_capacity: 0,
            ..Default::default()
        };

        let pool = config.to_builder("configured").build().unwrap();
        assert_eq!(pool.name(), "configured");
        assert_eq!(pool.max_threads(), 4);
    }
}
