use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{TierError, Ttl};

/// The uniform contract every backing cache of a [`TieredCache`](super::TieredCache) implements.
///
/// A tier owns its own storage. The tiered cache only ever talks to it through these methods.
#[async_trait]
pub trait Tier<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Reads the value for `key`.
    ///
    /// A missing key is `Ok(None)`, and never an error.
    async fn get(&self, key: &str) -> Result<Option<V>, TierError>;

    /// Writes `value`, replacing any existing one.
    ///
    /// `ttl` overrides the [default TTL](Self::default_ttl) of this tier.
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), TierError>;

    /// Deletes `key`, returning whether anything was deleted.
    async fn del(&self, key: &str) -> Result<bool, TierError>;

    /// Deletes everything, returning the number of removed entries.
    async fn clear(&self) -> Result<usize, TierError>;

    /// The remaining TTL of `key`, or `None` if this tier does not hold it.
    async fn entry_ttl(&self, key: &str) -> Result<Option<Ttl>, TierError>;

    /// The remaining TTL for `key` if present, otherwise the [default TTL](Self::default_ttl).
    async fn get_ttl(&self, key: Option<&str>) -> Result<Ttl, TierError> {
        let entry_ttl = match key {
            Some(key) => self.entry_ttl(key).await?,
            None => None,
        };
        Ok(entry_ttl.unwrap_or_else(|| self.default_ttl()))
    }

    /// Re-arms the expiration of `key` without rewriting its value.
    ///
    /// This is a no-op if the key is not present.
    async fn update_ttl(&self, key: &str, ttl: Ttl) -> Result<(), TierError>;

    /// The TTL newly written entries get unless told otherwise.
    fn default_ttl(&self) -> Ttl;

    /// Whether agents outside of this process may observe or mutate this tier.
    fn is_shared(&self) -> bool;

    /// Whether this tier handles and reports its own failures, so that its background work does
    /// not need to be awaited.
    fn rejection_safe(&self) -> bool;

    /// The registry of listeners interested in keys this tier evicts on its own.
    ///
    /// Tiers that never evict on their own don't need to provide one.
    fn listeners(&self) -> Option<&TierListeners> {
        None
    }
}

/// Gets notified about keys a [`Tier`] evicted on its own, because they expired or because the
/// tier ran out of capacity.
pub trait TierListener: Send + Sync {
    fn on_evicted(&self, key: &str);
}

/// Identifies a registered [`TierListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Arc<dyn TierListener>>,
}

/// An explicit registry of [`TierListener`]s, owned by a tier.
///
/// Listeners stay registered until they are explicitly [deregistered](Self::deregister).
#[derive(Default)]
pub struct TierListeners {
    registry: Mutex<Registry>,
}

impl fmt::Debug for TierListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierListeners")
            .field("listeners", &self.len())
            .finish()
    }
}

impl TierListeners {
    pub fn register(&self, listener: Arc<dyn TierListener>) -> ListenerId {
        let mut registry = self.registry.lock().unwrap();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.insert(id, listener);
        id
    }

    /// Removes a listener, returning `false` if it was not registered.
    pub fn deregister(&self, id: ListenerId) -> bool {
        self.registry.lock().unwrap().listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().unwrap().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tells every registered listener that `key` was evicted.
    pub fn notify_evicted(&self, key: &str) {
        let listeners: Vec<_> = {
            let registry = self.registry.lock().unwrap();
            registry.listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener.on_evicted(key);
        }
    }
}
