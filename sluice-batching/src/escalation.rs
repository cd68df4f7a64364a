use std::time::Duration;

use sluice_statsd::metric;
use sluice_threading::{RejectionPolicy, WorkerPool, WorkerPoolBuilder};

use crate::config::AccumulatorConfig;
use crate::state::Lifecycle;
use crate::statsd::BatchCounters;

/// Lazily creates the worker pool an accumulator offloads flushes to under backlog.
///
/// The pool uses a rendezvous queue and runs flushes on the accumulator thread when all of its
/// threads are busy. Once shut down, it is never created again.
#[derive(Debug)]
pub(crate) struct Escalation {
    name: String,
    max_pool_size: usize,
    threshold: f64,
    pool: Option<WorkerPool>,
    retired: bool,
}

impl Escalation {
    pub fn new(name: &str, config: &AccumulatorConfig) -> Self {
        Self {
            name: format!("{name}-flush"),
            max_pool_size: config.max_pool_size,
            threshold: config.escalation_factor * config.batch_size as f64,
            pool: None,
            retired: false,
        }
    }

    /// Returns the pool to submit the next flush to.
    ///
    /// Creates the pool if it does not exist yet and `backlog` exceeds the threshold. Returns
    /// `None` if the flush should run inline.
    pub fn pool(&mut self, backlog: usize, lifecycle: &Lifecycle) -> Option<&WorkerPool> {
        if self.pool.is_none() && !self.retired && backlog as f64 > self.threshold {
            self.create(backlog, lifecycle);
        }

        self.pool.as_ref()
    }

    fn create(&mut self, backlog: usize, lifecycle: &Lifecycle) {
        let result = WorkerPoolBuilder::new(self.name.as_str())
            .core_threads(1)
            .max_threads(self.max_pool_size)
            .queue_capacity(0)
            .rejection_policy(RejectionPolicy::CallerRuns)
            .build();

        match result {
            Ok(pool) => {
                sluice_log::debug!(
                    name = lifecycle.name(),
                    backlog,
                    max_pool_size = self.max_pool_size,
                    "backlog exceeded threshold, escalating flushes to worker pool"
                );
                metric!(counter(BatchCounters::Escalations) += 1, name = lifecycle.name());
                lifecycle.mark_escalated();
                self.pool = Some(pool);
            }
            Err(error) => {
                sluice_log::error!(
                    error = &error as &dyn std::error::Error,
                    name = lifecycle.name(),
                    "failed to create escalation pool"
                );
                self.retired = true;
            }
        }
    }

    /// Returns `true` if the pool exists.
    pub fn is_active(&self) -> bool {
        self.pool.is_some()
    }

    /// Shuts the pool down and waits up to `grace` for running flushes.
    pub fn shutdown(&mut self, grace: Duration) {
        self.retired = true;
        let Some(pool) = self.pool.take() else {
            return;
        };

        pool.shutdown();
        if !pool.await_termination(grace) {
            sluice_log::warn!(
                pool = pool.name(),
                grace_ms = grace.as_millis() as u64,
                "escalation pool did not finish within grace period"
            );
        }

        sluice_log::debug!("{}", pool.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AccumulatorConfig {
        AccumulatorConfig {
            batch_size: 10,
            max_pool_size: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_escalates_above_threshold() {
        sluice_test::setup();
        let lifecycle = Lifecycle::new("test".to_owned());
        let mut escalation = Escalation::new("test", &config());

        assert!(escalation.pool(15, &lifecycle).is_none());
        assert!(!lifecycle.escalated());

        let pool = escalation.pool(16, &lifecycle).unwrap();
        assert_eq!(pool.name(), "test-flush");
        assert_eq!(pool.max_threads(), 2);
        assert!(lifecycle.escalated());

        // Once created, the pool is used regardless of the backlog.
        assert!(escalation.pool(0, &lifecycle).is_some());
    }

    #[test]
    fn test_never_resurrected() {
        sluice_test::setup();
        let lifecycle = Lifecycle::new("test".to_owned());
        let mut escalation = Escalation::new("test", &config());

        assert!(escalation.pool(100, &lifecycle).is_some());
        escalation.shutdown(Duration::from_secs(1));

        assert!(!escalation.is_active());
        assert!(escalation.pool(100, &lifecycle).is_none());
    }
}
