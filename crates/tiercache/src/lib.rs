//! A coordinator that composes independent cache tiers into one logical cache.
//!
//! See [`caching`] for how reads, writes and expiration work across tiers, and [`tiers`] for
//! the tiers that ship with this crate.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod tiers;

#[cfg(test)]
use tiercache_test as test;
