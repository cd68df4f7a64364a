//! A StatsD metric client for measuring pools and accumulators, built on cadence.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first implement one of the metric traits on a custom
//! enum. The following types of metrics are available: `counter`, `timer`, `gauge` and
//! `distribution`. The metric traits serve only to provide a type safe metric name, so that a
//! counter metric cannot be used as a timer metric.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking
//! [`with_client`] or the [`metric!`] macro will become a noop. Only when configured, metrics
//! will actually be collected.
//!
//! To initialize the client, either use [`set_client`] to pass a custom client, or use [`init`]
//! to create a UDP client:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use sluice_statsd::MetricsClientConfig;
//! sluice_statsd::init(MetricsClientConfig {
//!     prefix: "sluice",
//!     host: "localhost:8125",
//!     default_tags: BTreeMap::new(),
//!     default_sample_rate: 1.0.into(),
//!     buffering: true,
//! })
//! .ok();
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use sluice_statsd::{metric, CounterMetric};
//!
//! struct BatchesFlushed;
//!
//! impl CounterMetric for BatchesFlushed {
//!     fn name(&self) -> &'static str {
//!         "accumulator.flushed"
//!     }
//! }
//!
//! metric!(counter(BatchesFlushed) += 1, accumulator = "events");
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricError, QueuingMetricSink, StatsdClient,
    UdpMetricSink,
};
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::StandardUniform;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// A sample rate between `0.0` and `1.0`.
#[derive(Debug, Clone, Copy)]
pub struct SampleRate(f64);

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate.
    pub default_sample_rate: SampleRate,
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Host of the metrics upstream.
    pub host: A,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Default sample rate for metrics, between 0.0 (= 0%) and 1.0 (= 100%).
    pub default_sample_rate: SampleRate,
    /// Whether to buffer metrics into larger UDP datagrams before sending them.
    pub buffering: bool,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.send_metric_with_sample_rate(metric, None)
    }

    /// Send a metric with an explicit sample rate that overrides the global sample rate.
    #[doc(hidden)]
    #[inline(always)]
    pub fn send_metric_with_sample_rate<'a, T>(
        &'a self,
        mut metric: MetricBuilder<'a, '_, T>,
        sample_rate: Option<SampleRate>,
    ) where
        T: Metric + From<String>,
    {
        let effective_sample_rate = match sample_rate {
            Some(sample_rate) => sample_rate.0.min(self.default_sample_rate.0),
            None => self.default_sample_rate.0,
        };
        if !Self::should_send(effective_sample_rate) {
            return;
        }

        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if effective_sample_rate < 1.0 {
            metric = metric.with_sampling_rate(effective_sample_rate);
        }

        if let Err(error) = metric.try_send() {
            sluice_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }

    fn should_send(sample_rate: f64) -> bool {
        if sample_rate <= 0.0 {
            false
        } else if sample_rate >= 1.0 {
            true
        } else {
            let s: f64 = rand::rng().sample(StandardUniform);
            s <= sample_rate
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: RefCell<Option<Arc<MetricsClient>>> = METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro.
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
///
/// Threads that already recorded a metric keep their previous client. Set the client before
/// starting pools and accumulators.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
///
/// Returns the raw statsd lines recorded while `f` ran.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
        default_sample_rate: 1.0.into(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Disable the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Tell the metrics system to report to statsd.
///
/// Metrics are sent from a background thread through a bounded queue, so recording a metric never
/// blocks on the network.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<A>) -> Result<(), MetricError> {
    let addrs: Vec<_> = config.host.to_socket_addrs()?.collect();
    let Some(addr) = addrs.first().copied() else {
        return Err(MetricError::from((
            cadence::ErrorKind::InvalidInput,
            "no address for statsd host",
        )));
    };

    sluice_log::info!("reporting metrics to statsd at {addr}");

    let sample_rate: f64 = config.default_sample_rate.into();
    sluice_log::debug!(
        "metrics sample rate is set to {sample_rate}{}",
        if sample_rate == 0.0 {
            ", no metrics will be reported"
        } else {
            ""
        }
    );

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let statsd_client = if config.buffering {
        let udp_sink = BufferedUdpMetricSink::from(addr, socket)?;
        let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);
        StatsdClient::from_sink(config.prefix, queuing_sink)
    } else {
        let udp_sink = UdpMetricSink::from(addr, socket)?;
        let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);
        StatsdClient::from_sink(config.prefix, queuing_sink)
    };

    set_client(MetricsClient {
        statsd_client,
        default_tags: config.default_tags,
        default_sample_rate: config.default_sample_rate,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are reported in milliseconds, for example the time a processor spent on one flush.
///
/// ## Example
///
/// ```
/// use sluice_statsd::{metric, TimerMetric};
///
/// struct FlushDuration;
///
/// impl TimerMetric for FlushDuration {
///     fn name(&self) -> &'static str {
///         "accumulator.flush.duration"
///     }
/// }
///
/// // measure a block of code
/// let sum = metric!(timer(FlushDuration), accumulator = "events", {
///     (0..10).sum::<u32>()
/// });
/// assert_eq!(sum, 45);
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client, for example the number of
/// items rejected by a stopped accumulator.
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing distributions.
///
/// A distribution is often a timing value, but may be any value whose distribution is of
/// interest, such as the number of items per flushed batch.
pub trait DistributionMetric {
    /// Returns the distribution metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement determined by the client, for example the
/// number of live threads in a worker pool.
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // distribution (uses global sample rate)
    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::DistributionMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                // Reported as a distribution in milliseconds.
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}
