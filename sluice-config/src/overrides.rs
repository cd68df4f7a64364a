//! Overrides of the file configuration from environment variables or command line arguments.

use std::env;

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "SLUICE_LOG_LEVEL";
/// Environment variable overriding the log format.
pub const ENV_LOG_FORMAT: &str = "SLUICE_LOG_FORMAT";
/// Environment variable overriding the statsd address. An empty value disables metrics.
pub const ENV_STATSD: &str = "SLUICE_STATSD_ADDR";
/// Environment variable overriding the metrics prefix.
pub const ENV_METRICS_PREFIX: &str = "SLUICE_METRICS_PREFIX";

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
///
/// Values are kept as raw strings and validated in
/// [`Config::apply_override`](crate::Config::apply_override), so errors point at the field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OverridableConfig {
    /// The log level, e.g. `debug`.
    pub log_level: Option<String>,
    /// The log format: `auto`, `pretty`, `simplified` or `json`.
    pub log_format: Option<String>,
    /// The `host:port` of the statsd server.
    pub statsd: Option<String>,
    /// The prefix of all emitted metrics.
    pub metrics_prefix: Option<String>,
}

impl OverridableConfig {
    /// Extracts overrides from the `SLUICE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Extracts overrides through a variable lookup function.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            log_level: lookup(ENV_LOG_LEVEL),
            log_format: lookup(ENV_LOG_FORMAT),
            statsd: lookup(ENV_STATSD),
            metrics_prefix: lookup(ENV_METRICS_PREFIX),
        }
    }

    /// Returns `true` if no value is overridden.
    pub fn is_empty(&self) -> bool {
        self.log_level.is_none()
            && self.log_format.is_none()
            && self.statsd.is_none()
            && self.metrics_prefix.is_none()
    }

    /// Combines two sets of overrides. Values set in `other` win.
    ///
    /// Used to layer command line arguments over environment variables.
    pub fn merge(self, other: Self) -> Self {
        Self {
            log_level: other.log_level.or(self.log_level),
            log_format: other.log_format.or(self.log_format),
            statsd: other.statsd.or(self.statsd),
            metrics_prefix: other.metrics_prefix.or(self.metrics_prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_from_vars() {
        let vars = HashMap::from([
            (ENV_LOG_LEVEL, "debug"),
            (ENV_STATSD, "localhost:8125"),
        ]);

        let overrides =
            OverridableConfig::from_vars(|name| vars.get(name).map(|v| (*v).to_owned()));

        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(overrides.log_format, None);
        assert_eq!(overrides.statsd.as_deref(), Some("localhost:8125"));
        assert_eq!(overrides.metrics_prefix, None);
        assert!(!overrides.is_empty());
    }

    #[test]
    fn test_merge_prefers_other() {
        let env = OverridableConfig {
            log_level: Some("info".to_owned()),
            metrics_prefix: Some("env".to_owned()),
            ..Default::default()
        };
        let args = OverridableConfig {
            log_level: Some("trace".to_owned()),
            ..Default::default()
        };

        let merged = env.merge(args);
        assert_eq!(merged.log_level.as_deref(), Some("trace"));
        assert_eq!(merged.metrics_prefix.as_deref(), Some("env"));
        assert!(OverridableConfig::default().is_empty());
    }
}
