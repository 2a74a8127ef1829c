//! # Tiered caching
//!
//! A [`TieredCache`] composes an ordered list of independent [`Tier`]s into one logical cache.
//! Tiers are ordered from the fastest (for example an in-memory map) to the slowest and most
//! durable one (for example a file-system store that other processes share).
//!
//! ## Reads
//!
//! A `get` scans the tiers in order and stops at the first hit:
//!
//! - Tiers in front of the hit tier missed the key, so they are *backfilled* with the value.
//!   Backfills are skipped if the key was written, deleted or expired after the hit was read.
//! - The hit tier and all deeper tiers are *reconciled*: whichever tier reports the longest TTL
//!   for the key is authoritative. Shared tiers with a shorter TTL are extended towards it
//!   (capped at their own default TTL), private tiers with a shorter TTL are evicted.
//!
//! If every tier is [rejection safe](Tier::rejection_safe), this repair work happens in the
//! background. Otherwise `get` awaits it, so that tier failures are reported to the caller.
//!
//! ## Writes
//!
//! A `set` writes to all tiers in parallel and starts tracking the key. Every tracked key has
//! one eviction timer, armed with the latest deadline of all tiers holding a copy. When it
//! fires, the key is deleted from every tier. Tiers that evict keys on their own report that
//! through their [`TierListeners`], which can fire the timer early.
//!
//! [`set_pending`](TieredCache::set_pending) accepts a value that is still being computed.
//! Concurrent reads of the same key wait for that computation instead of scanning the tiers.
//! A later write or delete of the key supersedes the computation, which then writes nothing.
//!
//! ## Metrics
//!
//! - `tiered.access`: All reads.
//! - `tiered.hit`: Reads served by a tier, tagged with the `tier` index.
//! - `tiered.miss`: Reads no tier could serve.
//! - `tiered.scan.duration`: Time spent scanning the tiers, tagged with the `result`.
//! - `tiered.coalesced`: Reads served by a pending computation.
//! - `tiered.backfill`: Values written back into tiers that missed them.
//! - `tiered.reconcile`: TTL repairs, tagged with the `action` (`extend` or `evict`).
//! - `tiered.expired`: Keys removed by their eviction timer.
//! - `tiered.entries`: The number of tracked keys, sampled whenever a new key is tracked.
//! - `tiered.background_error`: Tier failures that were logged instead of returned.

mod entry;
mod error;
mod locks;
mod pending;
mod signal;
mod tier;
mod tiered;
mod timer;
mod ttl;

pub use entry::EntryInfo;
pub use error::*;
pub use signal::{Signal, SubscriptionId};
pub use tier::*;
pub use tiered::TieredCache;
pub use timer::Timer;
pub use ttl::*;
