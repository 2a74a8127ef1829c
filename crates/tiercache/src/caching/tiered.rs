use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::entry::{Entries, EntryInfo, ExpireHook, Stamp};
use super::locks::KeyLocks;
use super::pending::PendingComputations;
use super::{
    CacheError, ConfigError, ListenerId, Tier, TierError, TierListener, Ttl, validate_ttl,
};
use crate::config::Config;

/// A value read from a tier, along with everything needed to repair the other tiers.
struct Hit<V> {
    key: String,
    value: V,
    tier: usize,
    /// The TTL the hit tier reported along with the value.
    ttl: Option<Ttl>,
    /// The state of the bookkeeping for `key` before any tier was read.
    stamp: Stamp,
}

/// The TTL a tier reported for a key during reconciliation.
#[derive(Debug, Clone, Copy)]
struct Reported {
    tier: usize,
    ttl: Ttl,
    shared: bool,
    default_ttl: Ttl,
}

/// What reconciliation does with a single tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconcile {
    /// The tier lives at least as long as the longest-lived copy.
    Keep(Ttl),
    /// Extend the TTL of a shared tier.
    Extend(Ttl),
    /// Delete the copy from a private tier that would expire early.
    Evict,
}

/// Decides how to align the tiers that reported a TTL for a key.
///
/// The tier with the longest TTL is authoritative, with the earliest tier winning ties.
fn plan_reconciliation(reports: &[Reported]) -> Vec<(usize, Reconcile)> {
    let longest = reports.iter().fold(None, |longest: Option<&Reported>, report| {
        match longest {
            Some(longest) if longest.ttl >= report.ttl => Some(longest),
            _ => Some(report),
        }
    });
    let Some(longest) = longest else {
        return Vec::new();
    };

    reports
        .iter()
        .map(|report| {
            let action = if report.ttl >= longest.ttl {
                Reconcile::Keep(report.ttl)
            } else if report.shared {
                // shared tiers are never deleted, and never extended past their own policy
                let target = longest.ttl.min(report.default_ttl);
                if target > report.ttl {
                    Reconcile::Extend(target)
                } else {
                    Reconcile::Keep(report.ttl)
                }
            } else {
                Reconcile::Evict
            };
            (report.tier, action)
        })
        .collect()
}

/// Keeps the first error of a sequence of fallible steps.
fn merge(result: &mut Result<(), CacheError>, outcome: Result<(), CacheError>) {
    if result.is_ok() {
        *result = outcome;
    }
}

/// Updates the bookkeeping of a cache when one of its tiers evicts a key on its own.
struct EvictionListener {
    entries: Weak<Entries>,
    tier: usize,
}

impl TierListener for EvictionListener {
    fn on_evicted(&self, key: &str) {
        if let Some(entries) = self.entries.upgrade() {
            tracing::trace!(key, tier = self.tier, "Tier evicted key");
            entries.update_tiers(key, &[(self.tier, None)]);
        }
    }
}

struct Inner<V>
where
    V: Send + Sync + 'static,
{
    tiers: Vec<Arc<dyn Tier<V>>>,
    rejection_safe: bool,
    is_shared: bool,
    entries: Arc<Entries>,
    pending: PendingComputations<V>,
    locks: KeyLocks,
    /// Held exclusively by `clear`, and shared by every other mutation.
    clearing: RwLock<()>,
    listeners: Vec<(usize, ListenerId)>,
}

impl<V> Inner<V>
where
    V: Send + Sync + 'static,
{
    /// Decides whether a tier failure is returned to the caller or only logged.
    fn tier_failure(
        &self,
        tier: usize,
        operation: &'static str,
        err: TierError,
    ) -> Result<(), CacheError> {
        if self.tiers[tier].rejection_safe() {
            metric!(counter("tiered.background_error") += 1);
            tracing::warn!(
                tier,
                operation,
                error = &err as &dyn std::error::Error,
                "Ignoring failure of rejection safe tier"
            );
            Ok(())
        } else {
            Err(CacheError::tier(tier, err))
        }
    }

    fn default_ttl(&self) -> Ttl {
        self.tiers
            .iter()
            .map(|tier| tier.default_ttl())
            .max()
            .unwrap_or(Ttl::Unbounded)
    }
}

impl<V> Drop for Inner<V>
where
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        for (tier, id) in &self.listeners {
            if let Some(registry) = self.tiers[*tier].listeners() {
                registry.deregister(*id);
            }
        }
    }
}

/// An ordered composite of [`Tier`]s that behaves like a single cache.
///
/// See the [module docs](super) for how reads, writes and expiration work. Cloning a
/// [`TieredCache`] is cheap and gives another handle to the same cache.
pub struct TieredCache<V>
where
    V: Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TieredCache<V>
where
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for TieredCache<V>
where
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("tiers", &self.inner.tiers.len())
            .field("entries", &self.inner.entries.len())
            .field("pending", &self.inner.pending.len())
            .field("rejection_safe", &self.inner.rejection_safe)
            .field("is_shared", &self.inner.is_shared)
            .finish()
    }
}

/// Schedules the removal of an entry once its eviction timer fires.
fn expire_hook<V>(inner: Weak<Inner<V>>) -> ExpireHook
where
    V: Clone + Send + Sync + 'static,
{
    Arc::new(move |key: &str, id: u64| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let cache = TieredCache { inner };
        let key = key.to_owned();
        tokio::spawn(async move { cache.expire(&key, id).await });
    })
}

/// The registration of a computation in the pending map, removed when the task driving the
/// computation ends in any way, including a panic.
struct Registration<V>
where
    V: Send + Sync + 'static,
{
    cache: TieredCache<V>,
    key: String,
    id: u64,
}

impl<V> Registration<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Writes the computed `value`, unless the computation has been superseded meanwhile.
    async fn settle(self, value: V, ttl: Option<Duration>) -> Result<V, CacheError> {
        let inner = &*self.cache.inner;
        let _clearing = inner.clearing.read().await;
        let _guard = inner.locks.lock(&self.key).await;

        if !inner.pending.is_current(&self.key, self.id) {
            tracing::debug!(
                key = self.key.as_str(),
                "Skipping write of superseded computation"
            );
            return Ok(value);
        }
        self.cache.write(&self.key, value, ttl).await
    }
}

impl<V> Drop for Registration<V>
where
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.cache.inner.pending.remove(&self.key, self.id) {
            tracing::trace!(key = self.key.as_str(), "Pending computation settled");
        }
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache over `tiers`, ordered from the fastest to the slowest tier.
    ///
    /// Registers an eviction listener with every tier that provides [`listeners`](Tier::listeners).
    /// They are deregistered again once the last handle to this cache is dropped.
    pub fn new(tiers: Vec<Arc<dyn Tier<V>>>) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }

        let rejection_safe = tiers.iter().all(|tier| tier.rejection_safe());
        let is_shared = tiers.iter().any(|tier| tier.is_shared());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<V>>| {
            let entries = Arc::new(Entries::new(expire_hook(weak.clone())));
            let listeners = tiers
                .iter()
                .enumerate()
                .filter_map(|(index, tier)| {
                    let registry = tier.listeners()?;
                    let listener = EvictionListener {
                        entries: Arc::downgrade(&entries),
                        tier: index,
                    };
                    Some((index, registry.register(Arc::new(listener))))
                })
                .collect();

            Inner {
                tiers,
                rejection_safe,
                is_shared,
                entries,
                pending: PendingComputations::default(),
                locks: KeyLocks::default(),
                clearing: RwLock::new(()),
                listeners,
            }
        });

        Ok(Self { inner })
    }

    /// Reads `key` from the first tier that holds it.
    ///
    /// If a computation for `key` is in flight, this waits for it instead.
    pub async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        metric!(counter("tiered.access") += 1);

        if let Some(computation) = self.inner.pending.get(key) {
            metric!(counter("tiered.coalesced") += 1);
            tracing::trace!(key, "Waiting for pending computation");
            return computation.await.map(Some);
        }

        let inner = &*self.inner;
        let stamp = inner.entries.stamp(key);
        let start = Instant::now();

        for (index, tier) in inner.tiers.iter().enumerate() {
            let (value, ttl) = future::join(tier.get(key), tier.entry_ttl(key)).await;
            let value = match value {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => {
                    inner.tier_failure(index, "get", err)?;
                    continue;
                }
            };
            let ttl = match ttl {
                Ok(ttl) => ttl,
                Err(err) => {
                    inner.tier_failure(index, "entry_ttl", err)?;
                    None
                }
            };

            tracing::trace!(key, tier = index, "Tiered cache hit");
            metric!(counter("tiered.hit") += 1, "tier" => &index.to_string());
            metric!(timer("tiered.scan.duration") = start.elapsed(), "result" => "hit");

            let hit = Hit {
                key: key.to_owned(),
                value: value.clone(),
                tier: index,
                ttl,
                stamp,
            };
            self.repair(hit).await?;
            return Ok(Some(value));
        }

        metric!(counter("tiered.miss") += 1);
        metric!(timer("tiered.scan.duration") = start.elapsed(), "result" => "miss");
        Ok(None)
    }

    /// Runs backfill and reconciliation after a hit.
    ///
    /// The work is only awaited if a tier might fail without handling it on its own.
    async fn repair(&self, hit: Hit<V>) -> Result<(), CacheError> {
        if self.inner.tiers.len() == 1 {
            return Ok(());
        }

        if !self.inner.rejection_safe {
            return self.backfill_and_reconcile(hit).await;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.backfill_and_reconcile(hit).await {
                metric!(counter("tiered.background_error") += 1);
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "Failed to repair tiers in the background"
                );
            }
        });
        Ok(())
    }

    async fn backfill_and_reconcile(&self, hit: Hit<V>) -> Result<(), CacheError> {
        let inner = &*self.inner;
        let _clearing = inner.clearing.read().await;
        let _guard = inner.locks.lock(&hit.key).await;
        let key = hit.key.as_str();

        let missed = &inner.tiers[..hit.tier];
        let deeper = &inner.tiers[hit.tier + 1..];

        // a value that was superseded or deleted since it was read must not be written back
        let backfills: Vec<_> = if inner.entries.stamp(key) == hit.stamp {
            missed
                .iter()
                .map(|tier| tier.set(key, hit.value.clone(), None))
                .collect()
        } else {
            tracing::debug!(key, "Skipping backfill of superseded value");
            Vec::new()
        };
        let deeper_ttls = future::join_all(deeper.iter().map(|tier| tier.entry_ttl(key)));
        let (backfilled, deeper_ttls) = future::join(future::join_all(backfills), deeper_ttls).await;

        let now = Instant::now();
        let mut result = Ok(());
        let mut updates = Vec::new();

        for (index, outcome) in backfilled.into_iter().enumerate() {
            match outcome {
                Ok(()) => {
                    metric!(counter("tiered.backfill") += 1);
                    tracing::trace!(key, tier = index, "Backfilled tier");
                    let ttl = inner.tiers[index].default_ttl();
                    updates.push((index, Some(ttl.deadline_from(now))));
                }
                Err(err) => merge(&mut result, inner.tier_failure(index, "backfill", err)),
            }
        }

        let describe = |index: usize, ttl: Ttl| {
            let tier = &inner.tiers[index];
            Reported {
                tier: index,
                ttl,
                shared: tier.is_shared(),
                default_ttl: tier.default_ttl(),
            }
        };
        let mut reports: Vec<_> = hit.ttl.map(|ttl| describe(hit.tier, ttl)).into_iter().collect();
        for (offset, outcome) in deeper_ttls.into_iter().enumerate() {
            let index = hit.tier + 1 + offset;
            match outcome {
                Ok(Some(ttl)) => reports.push(describe(index, ttl)),
                Ok(None) => {}
                Err(err) => merge(&mut result, inner.tier_failure(index, "entry_ttl", err)),
            }
        }

        let mut actions: Vec<BoxFuture<'_, (usize, Reconcile, Result<(), TierError>)>> = Vec::new();
        for (index, action) in plan_reconciliation(&reports) {
            let tier = &inner.tiers[index];
            match action {
                Reconcile::Keep(ttl) => updates.push((index, Some(ttl.deadline_from(now)))),
                Reconcile::Extend(ttl) => actions.push(
                    async move { (index, action, tier.update_ttl(key, ttl).await) }.boxed(),
                ),
                Reconcile::Evict => actions.push(
                    async move { (index, action, tier.del(key).await.map(drop)) }.boxed(),
                ),
            }
        }

        for (index, action, outcome) in future::join_all(actions).await {
            if let Err(err) = outcome {
                merge(&mut result, inner.tier_failure(index, "reconcile", err));
                continue;
            }
            match action {
                Reconcile::Extend(ttl) => {
                    metric!(counter("tiered.reconcile") += 1, "action" => "extend");
                    tracing::debug!(key, tier = index, %ttl, "Extended ttl of shared tier");
                    updates.push((index, Some(ttl.deadline_from(now))));
                }
                Reconcile::Evict => {
                    metric!(counter("tiered.reconcile") += 1, "action" => "evict");
                    tracing::debug!(key, tier = index, "Evicted short-lived copy");
                    updates.push((index, None));
                }
                Reconcile::Keep(_) => {}
            }
        }

        inner.entries.update_tiers(key, &updates);
        result
    }

    /// Writes `value` to every tier and starts tracking `key`.
    ///
    /// `ttl` overrides the default TTL of every tier. Returns the written value. A computation
    /// still pending for `key` is superseded: readers no longer wait for it, and it does not
    /// write its value once it settles.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<V, CacheError> {
        if let Some(ttl) = ttl {
            validate_ttl(ttl)?;
        }

        let inner = &*self.inner;
        let _clearing = inner.clearing.read().await;
        let _guard = inner.locks.lock(key).await;

        if inner.pending.take(key) {
            tracing::trace!(key, "Superseding pending computation");
        }
        self.write(key, value, ttl).await
    }

    /// Writes `value` to every tier. The caller holds the locks for `key`.
    async fn write(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<V, CacheError> {
        let inner = &*self.inner;
        let written =
            future::join_all(inner.tiers.iter().map(|tier| tier.set(key, value.clone(), ttl))).await;
        let reported = future::join_all(inner.tiers.iter().zip(&written).map(
            |(tier, written)| async move {
                match written {
                    Ok(()) => tier.entry_ttl(key).await,
                    Err(_) => Ok(None),
                }
            },
        ))
        .await;

        let now = Instant::now();
        let mut result = Ok(());
        let mut deadlines = Vec::with_capacity(inner.tiers.len());

        for (index, (written, reported)) in written.into_iter().zip(reported).enumerate() {
            if let Err(err) = written {
                merge(&mut result, inner.tier_failure(index, "set", err));
                deadlines.push(None);
                continue;
            }
            let entry_ttl = match reported {
                Ok(entry_ttl) => entry_ttl,
                Err(err) => {
                    merge(&mut result, inner.tier_failure(index, "entry_ttl", err));
                    // the write went through, so assume it got the requested lifetime
                    Some(ttl.map_or_else(|| inner.tiers[index].default_ttl(), Ttl::Finite))
                }
            };
            deadlines.push(entry_ttl.map(|entry_ttl| entry_ttl.deadline_from(now)));
        }

        if inner.entries.upsert(key, deadlines) {
            tracing::trace!(key, "Tracking new entry");
            metric!(gauge("tiered.entries") = inner.entries.len() as u64);
        }
        result.map(|()| value)
    }

    /// Writes the value produced by `computation` once it resolves.
    ///
    /// The computation is driven by a background task, so it settles even if the caller stops
    /// waiting. Until then, [`get`](Self::get) for `key` waits for it. A failed or panicking
    /// computation is reported to everyone waiting for it, and nothing is written. Neither is
    /// anything written if a later `set`, `set_pending` or `del` of `key` superseded it, but the
    /// caller still receives the computed value.
    pub async fn set_pending<F, E>(
        &self,
        key: &str,
        computation: F,
        ttl: Option<Duration>,
    ) -> Result<V, CacheError>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        if let Some(ttl) = ttl {
            validate_ttl(ttl)?;
        }

        let shared = self.inner.pending.register(key, |id| {
            let cache = self.clone();
            let key = key.to_owned();
            let task = tokio::spawn(async move {
                let registration = Registration { cache, key, id };
                let value = computation
                    .await
                    .map_err(|err| CacheError::Computation(Arc::new(err.into())))?;
                registration.settle(value, ttl).await
            });
            async move { task.await.unwrap_or_else(|_| Err(CacheError::Cancelled)) }
                .boxed()
                .shared()
        });

        shared.await
    }

    /// Deletes `key` from every tier and stops tracking it, superseding a pending computation.
    ///
    /// Returns `true` if any tier deleted something.
    pub async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let inner = &*self.inner;
        let _clearing = inner.clearing.read().await;
        let _guard = inner.locks.lock(key).await;

        if inner.pending.take(key) {
            tracing::trace!(key, "Superseding pending computation");
        }
        inner.entries.remove(key);
        let outcomes = future::join_all(inner.tiers.iter().map(|tier| tier.del(key))).await;

        let mut result = Ok(());
        let mut deleted = false;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(removed) => deleted |= removed,
                Err(err) => merge(&mut result, inner.tier_failure(index, "del", err)),
            }
        }
        result.map(|()| deleted)
    }

    /// Deletes everything from every tier and drops all tracked entries.
    ///
    /// Returns the total number of entries the tiers removed.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let inner = &*self.inner;
        let _clearing = inner.clearing.write().await;

        let dropped = inner.entries.clear();
        tracing::debug!(entries = dropped, "Clearing all tiers");
        let outcomes = future::join_all(inner.tiers.iter().map(|tier| tier.clear())).await;

        let mut result = Ok(());
        let mut removed = 0;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(count) => removed += count,
                Err(err) => merge(&mut result, inner.tier_failure(index, "clear", err)),
            }
        }
        result.map(|()| removed)
    }

    /// The longest remaining TTL any tier reports for `key`.
    ///
    /// Without a key, or for tiers that do not hold it, the default TTL of the tier counts.
    pub async fn get_ttl(&self, key: Option<&str>) -> Result<Ttl, CacheError> {
        let inner = &*self.inner;
        let outcomes = future::join_all(inner.tiers.iter().map(|tier| tier.get_ttl(key))).await;

        let mut result = Ok(());
        let mut longest = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let ttl = match outcome {
                Ok(ttl) => ttl,
                Err(err) => {
                    merge(&mut result, inner.tier_failure(index, "get_ttl", err));
                    inner.tiers[index].default_ttl()
                }
            };
            longest = longest.max(Some(ttl));
        }
        result?;
        Ok(longest.unwrap_or_else(|| inner.default_ttl()))
    }

    /// Re-arms the expiration of `key` in every tier without rewriting it.
    ///
    /// Defaults to the longest default TTL of all tiers.
    pub async fn update_ttl(&self, key: &str, ttl: Option<Ttl>) -> Result<(), CacheError> {
        let ttl = match ttl {
            Some(ttl) => ttl.validate()?,
            None => self.get_ttl(None).await?,
        };

        let inner = &*self.inner;
        let _clearing = inner.clearing.read().await;
        let _guard = inner.locks.lock(key).await;

        let outcomes =
            future::join_all(inner.tiers.iter().map(|tier| tier.update_ttl(key, ttl))).await;

        let mut result = Ok(());
        let mut updated = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(()) => updated.push(index),
                Err(err) => merge(&mut result, inner.tier_failure(index, "update_ttl", err)),
            }
        }
        inner
            .entries
            .retime(key, &updated, ttl.deadline_from(Instant::now()));
        result
    }

    /// Removes an entry whose eviction timer fired, unless it was rewritten in the meantime.
    async fn expire(&self, key: &str, id: u64) {
        let inner = &*self.inner;
        let _clearing = inner.clearing.read().await;
        let _guard = inner.locks.lock(key).await;

        if !inner.entries.remove_expired(key, id) {
            return;
        }

        metric!(counter("tiered.expired") += 1);
        tracing::debug!(key, "Entry expired");

        let outcomes = future::join_all(inner.tiers.iter().map(|tier| tier.del(key))).await;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            if let Err(err) = outcome {
                metric!(counter("tiered.background_error") += 1);
                tracing::error!(
                    key,
                    tier = index,
                    error = &err as &dyn std::error::Error,
                    "Failed to delete expired entry"
                );
            }
        }
    }

    /// `true` only if every tier is rejection safe.
    pub fn rejection_safe(&self) -> bool {
        self.inner.rejection_safe
    }

    /// `true` if any tier is shared.
    pub fn is_shared(&self) -> bool {
        self.inner.is_shared
    }

    pub fn tiers(&self) -> &[Arc<dyn Tier<V>>] {
        &self.inner.tiers
    }

    /// All keys that are currently tracked, in sorted order.
    pub fn tracked_keys(&self) -> Vec<String> {
        self.inner.entries.keys()
    }

    /// The number of computations that are still in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// The remaining lifetime of `key` according to the bookkeeping of this cache.
    ///
    /// This is the latest deadline of all tiers holding a copy, or `None` if `key` is not
    /// tracked.
    pub fn effective_ttl(&self, key: &str) -> Option<Ttl> {
        self.inner.entries.effective_ttl(key)
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.inner.entries.info(key)
    }

    #[cfg(test)]
    pub(super) fn timer_deadline(&self, key: &str) -> Option<Instant> {
        self.inner.entries.timer_deadline(key)
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a cache from the `tiers` section of the config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let tiers = crate::tiers::build_tiers(&config.tiers)?;
        Self::new(tiers)
    }
}

fn nested(err: CacheError) -> TierError {
    TierError::Backend(format!("{:#}", anyhow::Error::new(err)))
}

#[async_trait]
impl<V> Tier<V> for TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>, TierError> {
        TieredCache::get(self, key).await.map_err(nested)
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), TierError> {
        TieredCache::set(self, key, value, ttl)
            .await
            .map(drop)
            .map_err(nested)
    }

    async fn del(&self, key: &str) -> Result<bool, TierError> {
        TieredCache::del(self, key).await.map_err(nested)
    }

    async fn clear(&self) -> Result<usize, TierError> {
        TieredCache::clear(self).await.map_err(nested)
    }

    async fn entry_ttl(&self, key: &str) -> Result<Option<Ttl>, TierError> {
        let inner = &*self.inner;
        let outcomes = future::join_all(inner.tiers.iter().map(|tier| tier.entry_ttl(key))).await;

        let mut longest = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(ttl) => longest = longest.max(ttl),
                Err(err) => inner.tier_failure(index, "entry_ttl", err).map_err(nested)?,
            }
        }
        Ok(longest)
    }

    async fn get_ttl(&self, key: Option<&str>) -> Result<Ttl, TierError> {
        TieredCache::get_ttl(self, key).await.map_err(nested)
    }

    async fn update_ttl(&self, key: &str, ttl: Ttl) -> Result<(), TierError> {
        TieredCache::update_ttl(self, key, Some(ttl))
            .await
            .map_err(nested)
    }

    fn default_ttl(&self) -> Ttl {
        self.inner.default_ttl()
    }

    fn is_shared(&self) -> bool {
        self.inner.is_shared
    }

    fn rejection_safe(&self) -> bool {
        self.inner.rejection_safe
    }
}
