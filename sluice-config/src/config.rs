use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sluice_batching::{AccumulatorConfig, DispatcherConfig, TransmitterConfig};
use sluice_log::{LogConfig, LogFormat, LogLevel};
use sluice_threading::{PoolConfig, PoolRegistry};

use crate::overrides::OverridableConfig;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field, either from a file section or an override.
    Field(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<BoxError>,
}

impl ConfigError {
    #[inline]
    pub(crate) fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    pub(crate) fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(inner.into()),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: impl Into<String>) -> Self
    where
        E: Into<BoxError>,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    pub(crate) fn field(mut self, name: impl Into<String>) -> Self {
        self.source = ConfigErrorSource::Field(name.into());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the name of the offending field, if the error originates from a single field.
    pub fn field_name(&self) -> Option<&str> {
        match &self.source {
            ConfigErrorSource::Field(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => write!(f, "{}", self.kind),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
    /// Creating a configured pool failed.
    #[error("could not create configured pool")]
    PoolCreation,
    /// The metrics client could not be initialized.
    #[error("could not initialize metrics client")]
    MetricsInit,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut f = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`, which disables metrics.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"sluice"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Emitted metrics will be buffered to optimize performance.
    ///
    /// Defaults to `true`.
    buffering: bool,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    ///
    /// For example, a value of `0.3` means that only 30% of the emitted metrics will be sent.
    /// Defaults to `1.0` (100%).
    sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "sluice".into(),
            default_tags: BTreeMap::new(),
            buffering: true,
            sample_rate: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    pools: BTreeMap<String, PoolConfig>,
    #[serde(default)]
    accumulators: BTreeMap<String, AccumulatorConfig>,
    #[serde(default)]
    dispatchers: BTreeMap<String, DispatcherConfig>,
    #[serde(default)]
    transmitters: BTreeMap<String, TransmitterConfig>,
}

impl ConfigValues {
    /// Checks every component section and reports the first invalid entry.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, config) in &self.accumulators {
            config
                .validate()
                .map_err(|e| ConfigError::for_field(e, format!("accumulators.{name}")))?;
        }

        for (name, config) in &self.dispatchers {
            config
                .validate()
                .map_err(|e| ConfigError::for_field(e, format!("dispatchers.{name}")))?;
        }

        for (name, config) in &self.transmitters {
            config
                .validate()
                .map_err(|e| ConfigError::for_field(e, format!("transmitters.{name}")))?;
        }

        for (name, config) in &self.pools {
            if config.keep_alive_ms == 0 {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                    .field(format!("pools.{name}.keep_alive_ms")));
            }
        }

        if !(0.0..=1.0).contains(&self.metrics.sample_rate) {
            return Err(
                ConfigError::new(ConfigErrorKind::InvalidValue).field("metrics.sample_rate")
            );
        }

        Ok(())
    }
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// The folder must contain a `config.yml` file. All sections are optional.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = ConfigValues::load(&path)?;
        values
            .validate()
            .map_err(|e| e.file(ConfigValues::path(&path)))?;

        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let logging = &mut self.values.logging;

        if let Some(level) = overrides.log_level {
            logging.level = level
                .parse::<LogLevel>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(format) = overrides.log_format {
            logging.format = format
                .parse::<LogFormat>()
                .map_err(|err| ConfigError::for_field(err, "log_format"))?;
        }

        let metrics = &mut self.values.metrics;

        if let Some(host) = overrides.statsd {
            metrics.statsd = parse_statsd_host(&host)?;
        }

        if let Some(prefix) = overrides.metrics_prefix {
            metrics.prefix = prefix;
        }

        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the path of the config folder.
    ///
    /// Empty for configs created from a JSON value.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves the config as `config.yml` in the given folder, creating the folder if needed.
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.values.save(path)
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of all emitted metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags attached to all emitted metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns `true` if metrics are buffered before sending.
    pub fn metrics_buffering(&self) -> bool {
        self.values.metrics.buffering
    }

    /// Returns the global sample rate of emitted metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns all configured pools by name.
    pub fn pools(&self) -> &BTreeMap<String, PoolConfig> {
        &self.values.pools
    }

    /// Returns the parameters of the accumulator `name`, or the defaults if it is not configured.
    pub fn accumulator(&self, name: &str) -> AccumulatorConfig {
        self.values
            .accumulators
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the parameters of the dispatcher `name`, or the defaults if it is not configured.
    pub fn dispatcher(&self, name: &str) -> DispatcherConfig {
        self.values
            .dispatchers
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the parameters of the transmitter `name`, or the defaults if it is not configured.
    pub fn transmitter(&self, name: &str) -> TransmitterConfig {
        self.values
            .transmitters
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Creates a [`PoolRegistry`] holding one pool per entry of the `pools` section.
    ///
    /// Pools are named after their key and start without threads.
    pub fn build_registry(&self) -> Result<PoolRegistry, ConfigError> {
        let registry = PoolRegistry::new();

        for (name, config) in &self.values.pools {
            registry.get_or_create(name, config).map_err(|e| {
                ConfigError::wrap(e, ConfigErrorKind::PoolCreation).field(format!("pools.{name}"))
            })?;
        }

        Ok(registry)
    }
}

/// Parses a `host:port` statsd address. An empty value disables metrics.
fn parse_statsd_host(host: &str) -> Result<Option<String>, ConfigError> {
    let host = host.trim();
    if host.is_empty() {
        return Ok(None);
    }

    let Some((name, port)) = host.rsplit_once(':') else {
        return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("statsd"));
    };

    if name.is_empty() {
        return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("statsd"));
    }

    port.parse::<u16>()
        .map_err(|err| ConfigError::for_field(err, "statsd"))?;

    Ok(Some(host.to_owned()))
}
