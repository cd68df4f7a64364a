use sluice_statsd::MetricsClientConfig;

use crate::config::{Config, ConfigError, ConfigErrorKind};

/// Initializes the logging system from the `logging` section.
pub fn init_logging(config: &Config) {
    sluice_log::init(config.logging());
}

/// Initializes the metrics client from the `metrics` section.
///
/// Does nothing if no statsd address is configured. Metrics emitted before this call are
/// discarded.
pub fn init_metrics(config: &Config) -> Result<(), ConfigError> {
    let Some(host) = config.statsd_addr() else {
        sluice_log::debug!("metrics are disabled, no statsd address configured");
        return Ok(());
    };

    sluice_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags: config.metrics_default_tags().clone(),
        default_sample_rate: config.metrics_sample_rate().into(),
        buffering: config.metrics_buffering(),
    })
    .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::MetricsInit).field("metrics.statsd"))
}

/// Prints the effective configuration to the log.
pub fn dump_config(config: &Config) {
    if config.path().as_os_str().is_empty() {
        sluice_log::info!("launching sluice without config folder");
    } else {
        sluice_log::info!(
            "launching sluice from config folder {}",
            config.path().display()
        );
    }

    sluice_log::info!("  log level: {}", config.logging().level);
    match config.statsd_addr() {
        Some(addr) => sluice_log::info!("  statsd: {addr}"),
        None => sluice_log::info!("  statsd: -"),
    }
    for (name, pool) in config.pools() {
        sluice_log::info!(
            "  pool {name}: core={} max={} queue={}",
            pool.core_threads,
            pool.max_threads,
            pool.queue_capacity
        );
    }
}
