use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use filecache_sources::StorageConfig;
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "filecache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The directory holding the cache slots. Created on first use.
    pub path: PathBuf,

    /// The maximum size of a single cached file in bytes.
    ///
    /// `-1`, `null`, or leaving this out means there is no limit.
    #[serde(deserialize_with = "deserialize_max_file_size")]
    pub max_file_size: Option<u64>,

    /// Files that have not been accessed for this long are removed when pruning.
    ///
    /// Either a duration like `2h`, or a plain number of minutes.
    #[serde(deserialize_with = "deserialize_minutes")]
    pub max_age: Duration,

    /// The maximum total size of the cache in bytes, enforced when pruning.
    pub max_size: u64,

    /// The total timeout of a single request to a remote source.
    ///
    /// Timeouts are either a duration like `500ms`, or a plain number of seconds.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub timeout: Duration,

    /// The timeout for establishing a connection to a remote source.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub connect_timeout: Duration,

    /// The longest time a download may stall without receiving any data.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub read_timeout: Duration,

    /// MIME types which may be cached. An empty list allows all types.
    pub mime_types: Vec<String>,

    /// A cron expression for how often the cache should be pruned.
    ///
    /// This is not acted upon by the library. It is meant for the scheduler running the
    /// `prune` command.
    pub prune_interval: String,

    /// Storage backends by name, used for URLs of the form `<name>://<path>`.
    pub storage: BTreeMap<String, StorageConfig>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

/// Default value for the "path" configuration.
fn default_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("filecache")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path: default_path(),
            max_file_size: None,
            max_age: Duration::from_secs(60 * 60),
            max_size: 1_000_000_000,
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            mime_types: Vec::new(),
            prune_interval: "*/5 * * * *".to_owned(),
            storage: BTreeMap::new(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

fn deserialize_max_file_size<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    match Option::<i64>::deserialize(deserializer)? {
        None | Some(-1) => Ok(None),
        Some(size) => u64::try_from(size).map(Some).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Signed(size),
                &"a non-negative size in bytes, or -1 for no limit",
            )
        }),
    }
}

/// A duration given either as a human readable string or as a plain number of some unit.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Number(u64),
    Human(#[serde(with = "humantime_serde")] Duration),
}

fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
    unit: Duration,
) -> Result<Duration, D::Error> {
    match DurationValue::deserialize(deserializer) {
        Ok(DurationValue::Number(count)) => u32::try_from(count)
            .ok()
            .and_then(|count| unit.checked_mul(count))
            .ok_or_else(|| {
                de::Error::invalid_value(de::Unexpected::Unsigned(count), &"a shorter duration")
            }),
        Ok(DurationValue::Human(duration)) => Ok(duration),
        Err(_) => Err(de::Error::custom(
            "expected a duration like `90s` or `5m`, or a plain number",
        )),
    }
}

fn deserialize_minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserialize_duration(deserializer, Duration::from_secs(60))
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserialize_duration(deserializer, Duration::from_secs(1))
}
