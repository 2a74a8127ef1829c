use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use tokio::time::Instant;

use super::ConfigError;

/// The maximum delay the timer subsystem accepts: `2^31 - 1` milliseconds, or roughly 24.8 days.
pub const MAX_DELAY: Duration = Duration::from_millis(2_147_483_647);

/// The remaining lifetime of a cache entry, as reported by a tier.
///
/// Every [`Finite`](Self::Finite) TTL orders below [`Unbounded`](Self::Unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ttl {
    /// The entry expires after the given duration.
    Finite(Duration),
    /// The entry never expires on its own.
    Unbounded,
}

impl Ttl {
    /// Converts an optional duration, where `None` means "no expiration".
    pub fn from_option(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => Self::Finite(ttl),
            None => Self::Unbounded,
        }
    }

    /// The finite duration, or `None` if unbounded.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Finite(ttl) => Some(*ttl),
            Self::Unbounded => None,
        }
    }

    /// The absolute [`Deadline`] when counting this TTL from `now`.
    pub fn deadline_from(self, now: Instant) -> Deadline {
        match self {
            // `Instant` overflows are well out of range, but saturate into "never" regardless.
            Self::Finite(ttl) => now.checked_add(ttl).map_or(Deadline::Never, Deadline::At),
            Self::Unbounded => Deadline::Never,
        }
    }

    /// Fails with [`ConfigError::TtlTooLarge`] if this TTL exceeds [`MAX_DELAY`].
    pub fn validate(self) -> Result<Self, ConfigError> {
        match self {
            Self::Finite(ttl) if ttl > MAX_DELAY => Err(ConfigError::TtlTooLarge(ttl)),
            ttl => Ok(ttl),
        }
    }
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Self::Finite(ttl)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(ttl) => write!(f, "{}", humantime::format_duration(*ttl)),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// An absolute point in time at which a cache entry expires.
///
/// Every [`At`](Self::At) deadline orders below [`Never`](Self::Never).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Deadline {
    At(Instant),
    Never,
}

impl Deadline {
    /// The [`Ttl`] remaining until this deadline, saturating at zero.
    pub fn remaining(&self) -> Ttl {
        match self {
            Self::At(deadline) => Ttl::Finite(deadline.saturating_duration_since(Instant::now())),
            Self::Never => Ttl::Unbounded,
        }
    }
}

/// Parses a TTL given either as a plain number of milliseconds or as a human-readable duration
/// such as `"1h"`, `"5ms"` or `"1h 30m"`.
///
/// The parsed TTL is validated against [`MAX_DELAY`].
pub fn parse_ttl(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let ttl = match value.parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => humantime::parse_duration(value).map_err(|source| ConfigError::InvalidTtl {
            value: value.to_owned(),
            source,
        })?,
    };
    validate_ttl(ttl)
}

/// Fails with [`ConfigError::TtlTooLarge`] if `ttl` exceeds [`MAX_DELAY`].
pub fn validate_ttl(ttl: Duration) -> Result<Duration, ConfigError> {
    if ttl > MAX_DELAY {
        return Err(ConfigError::TtlTooLarge(ttl));
    }
    Ok(ttl)
}

struct TtlVisitor;

impl<'de> Visitor<'de> for TtlVisitor {
    type Value = Option<Duration>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "a number of milliseconds, a duration string like \"5m\", or null"
        )
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        validate_ttl(Duration::from_millis(v))
            .map(Some)
            .map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        let millis = u64::try_from(v)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))?;
        self.visit_u64(millis)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_ttl(v).map(Some).map_err(E::custom)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(TtlVisitor)
    }
}

/// Deserializes an optional TTL from config, see [`parse_ttl`] for the accepted formats.
///
/// `null` means that entries never expire.
pub fn deserialize_ttl<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    deserializer.deserialize_option(TtlVisitor)
}
