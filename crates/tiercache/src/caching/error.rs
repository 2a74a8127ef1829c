use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A misconfiguration that is detected before any tier is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A tiered cache needs at least one tier to delegate to.
    #[error("a tiered cache needs at least one tier")]
    NoTiers,
    /// The TTL could not be parsed as a number of milliseconds or a human-readable duration.
    #[error("invalid ttl `{value}`")]
    InvalidTtl {
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    /// The TTL exceeds the maximum delay the timer subsystem supports.
    #[error("ttl of {} exceeds the maximum delay of {}", format_ttl(.0), format_ttl(&super::MAX_DELAY))]
    TtlTooLarge(Duration),
    /// The storage path would exceed the platform limits for file paths.
    #[error("storage path `{}` is too long: {len} bytes exceeds the limit of {max}", .path.display())]
    PathTooLong { path: PathBuf, len: usize, max: usize },
    /// The storage location could not be prepared.
    #[error("failed to prepare storage")]
    Io(#[from] io::Error),
}

/// A failure inside an individual tier.
///
/// Tiers that declare themselves [`rejection_safe`](super::Tier::rejection_safe) handle these
/// internally, all others surface them to the caller of the [`TieredCache`](super::TieredCache).
#[derive(Debug, Error)]
pub enum TierError {
    /// Reading or writing the backing storage failed.
    #[error("tier i/o failed")]
    Io(#[from] io::Error),
    /// A value could not be encoded or decoded.
    #[error("codec failed: {0}")]
    Codec(String),
    /// A stored record is not in the expected format.
    #[error("corrupted record: {0}")]
    Corrupted(String),
    /// Any other backend-specific failure.
    #[error("tier backend failed: {0}")]
    Backend(String),
}

fn format_ttl(ttl: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*ttl)
}

impl From<serde_json::Error> for TierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// An error surfaced by the [`TieredCache`](super::TieredCache).
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The request carried an invalid configuration, for example a TTL above the maximum delay.
    #[error("invalid configuration")]
    Config(#[source] Arc<ConfigError>),
    /// A tier that is not rejection safe failed.
    #[error("tier {tier} failed")]
    Tier {
        tier: usize,
        #[source]
        source: Arc<TierError>,
    },
    /// A pending computation handed to [`set_pending`](super::TieredCache::set_pending) failed.
    #[error("pending computation failed: {0:#}")]
    Computation(Arc<anyhow::Error>),
    /// The task driving a pending computation was cancelled before it settled.
    #[error("pending computation was cancelled")]
    Cancelled,
}

impl CacheError {
    pub(crate) fn tier(tier: usize, source: TierError) -> Self {
        Self::Tier {
            tier,
            source: Arc::new(source),
        }
    }
}

impl From<ConfigError> for CacheError {
    fn from(err: ConfigError) -> Self {
        Self::Config(Arc::new(err))
    }
}
