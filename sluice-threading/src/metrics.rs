use sluice_statsd::{CounterMetric, GaugeMetric};

/// Gauge metrics emitted by worker pools.
///
/// All gauges are tagged with the `pool` name.
pub enum PoolGauges {
    /// Number of live threads in the pool.
    PoolSize,
    /// Number of tasks waiting in the queue of the pool.
    QueueSize,
    /// Number of threads currently running a task.
    ActiveTasks,
}

impl GaugeMetric for PoolGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::PoolSize => "pool.size",
            Self::QueueSize => "pool.queue_size",
            Self::ActiveTasks => "pool.active",
        }
    }
}

/// Counter metrics emitted by worker pools.
pub enum PoolCounters {
    /// Number of tasks that neither fit the queue nor a new thread.
    ///
    /// Tagged with the `pool` name and the rejection `policy` that handled the task.
    TasksRejected,
}

impl CounterMetric for PoolCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::TasksRejected => "pool.rejected",
        }
    }
}
