use sluice_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

/// Counter metrics for accumulators and dispatchers.
///
/// All metrics are tagged with the `name` of the emitting instance.
pub enum BatchCounters {
    /// Incremented for every item that `put` did not accept.
    ///
    /// Tagged by `reason`: `stopped`, `full` or `disconnected`.
    ItemsRejected,

    /// Incremented for every accepted item that was never processed.
    ///
    /// This happens when a transmitter is stopped without draining, or when a dispatcher stops
    /// before the item was released.
    ItemsDropped,

    /// Incremented for every flush.
    ///
    /// Tagged by `escalated`, whether the flush ran on the escalation pool.
    Flushes,

    /// Incremented when an accumulator creates its escalation pool.
    Escalations,

    /// Incremented for every item a dispatcher hands to its processor.
    ItemsDispatched,
}

impl CounterMetric for BatchCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ItemsRejected => "batching.items.rejected",
            Self::ItemsDropped => "batching.items.dropped",
            Self::Flushes => "batching.flushes",
            Self::Escalations => "batching.escalations",
            Self::ItemsDispatched => "batching.items.dispatched",
        }
    }
}

/// Distribution metrics for accumulators.
pub enum BatchDistributions {
    /// The number of items in a flushed batch.
    BatchSize,

    /// The number of items left in the intake when a batch is flushed.
    Backlog,
}

impl DistributionMetric for BatchDistributions {
    fn name(&self) -> &'static str {
        match *self {
            Self::BatchSize => "batching.batch_size",
            Self::Backlog => "batching.backlog",
        }
    }
}

/// Timer metrics for accumulators.
pub enum BatchTimers {
    /// Time in milliseconds a processor spent on a batch.
    ///
    /// For transmitters, this includes the finalizer.
    FlushDuration,
}

impl TimerMetric for BatchTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::FlushDuration => "batching.flush.duration",
        }
    }
}

/// Gauge metrics for dispatchers.
pub enum BatchGauges {
    /// The number of items waiting for their release in a dispatcher.
    DelayQueueSize,
}

impl GaugeMetric for BatchGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::DelayQueueSize => "batching.delay_queue.size",
        }
    }
}
