use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::caching::{ConfigError, deserialize_ttl, validate_ttl};

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
    /// The log level for the cache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
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
            prefix: "tiercache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// A bounded in-process tier.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryTierConfig {
    /// Default lifetime of entries, `None` if they never expire.
    #[serde(deserialize_with = "deserialize_ttl")]
    pub ttl: Option<Duration>,
    /// The maximum number of entries.
    pub capacity: u64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            capacity: 10_000,
        }
    }
}

/// A tier keeping one file per entry below a directory.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FsTierConfig {
    /// The root directory of the tier, created if it does not exist.
    pub path: PathBuf,
    /// Default lifetime of entries, `None` if they never expire.
    #[serde(default, deserialize_with = "deserialize_ttl")]
    pub ttl: Option<Duration>,
    /// Whether other processes read and write the same directory.
    #[serde(default)]
    pub shared: bool,
    /// Whether failures of this tier are logged instead of surfaced to callers.
    #[serde(default)]
    pub rejection_safe: bool,
}

/// Configuration of a single tier, see [`crate::tiers::build_tiers`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TierConfig {
    Memory(MemoryTierConfig),
    Filesystem(FsTierConfig),
}

impl TierConfig {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            TierConfig::Memory(config) => config.ttl,
            TierConfig::Filesystem(config) => config.ttl,
        }
    }

    /// Checks limits that cannot be expressed in the config format itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ttl) = self.ttl() {
            validate_ttl(ttl)?;
        }
        if let TierConfig::Filesystem(config) = self {
            crate::tiers::validate_root(&config.path)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configures the logging system.
    pub logging: Logging,
    /// Configures the metrics system.
    pub metrics: Metrics,
    /// The tiers of the cache, from the fastest to the slowest one.
    pub tiers: Vec<TierConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: Logging::default(),
            metrics: Metrics::default(),
            tiers: vec![TierConfig::Memory(MemoryTierConfig::default())],
        }
    }
}

impl Config {
    /// Loads the config from `path`, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self = serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers.into());
        }
        for (index, tier) in self.tiers.iter().enumerate() {
            tier.validate()
                .with_context(|| format!("invalid configuration of tier {index}"))?;
        }
        Ok(())
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
