use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::notification::RemovalCause;

use crate::caching::{Tier, TierError, TierListeners, Ttl};

/// An item saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct MemoryItem<V> {
    /// When to evict this item, `None` if it never expires.
    deadline: Option<Instant>,
    /// The actual value.
    value: V,
}

/// A struct implementing [`moka::Expiry`] that uses the [`MemoryItem`] deadline as the explicit
/// expiration time.
struct ItemExpiration;

/// Returns the duration between `current_time` and the `deadline`, saturating at zero.
fn remaining(current_time: Instant, deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(current_time))
}

impl<V> moka::Expiry<String, MemoryItem<V>> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryItem<V>,
        current_time: Instant,
    ) -> Option<Duration> {
        remaining(current_time, value.deadline)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryItem<V>,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        remaining(current_time, value.deadline)
    }
}

type MemoryCache<V> = moka::future::Cache<String, MemoryItem<V>>;

/// A private, bounded, in-process tier.
///
/// Entries expire individually at their own deadline. Entries that expire or get evicted for lack
/// of capacity are reported to the registered [`TierListeners`]. This tier never fails, so it is
/// rejection safe.
pub struct MemoryTier<V> {
    cache: MemoryCache<V>,
    default_ttl: Option<Duration>,
    listeners: Arc<TierListeners>,
}

impl<V> fmt::Debug for MemoryTier<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTier")
            .field("entries", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl<V> MemoryTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a tier holding up to `capacity` entries.
    ///
    /// Entries written without an explicit TTL live for `default_ttl`, or forever if that is
    /// `None`.
    pub fn new(capacity: u64, default_ttl: Option<Duration>) -> Self {
        let listeners = Arc::new(TierListeners::default());

        let eviction_listeners = Arc::clone(&listeners);
        let cache = MemoryCache::builder()
            .max_capacity(capacity)
            .name("memory-tier")
            .expire_after(ItemExpiration)
            .eviction_listener(move |key: Arc<String>, _value, cause: RemovalCause| {
                // explicit removals and replacements are initiated by the cache itself
                if cause.was_evicted() {
                    tracing::trace!(key = key.as_str(), ?cause, "Memory tier evicted key");
                    eviction_listeners.notify_evicted(&key);
                }
            })
            .build();

        Self {
            cache,
            default_ttl,
            listeners,
        }
    }

    /// Performs pending maintenance, which includes reporting expired entries.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    fn deadline(ttl: Ttl) -> Option<Instant> {
        ttl.as_duration()
            .and_then(|ttl| Instant::now().checked_add(ttl))
    }
}

#[async_trait]
impl<V> Tier<V> for MemoryTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>, TierError> {
        Ok(self.cache.get(key).await.map(|item| item.value))
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), TierError> {
        let ttl = ttl.map_or_else(|| self.default_ttl(), Ttl::Finite);
        let item = MemoryItem {
            deadline: Self::deadline(ttl),
            value,
        };
        self.cache.insert(key.to_owned(), item).await;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, TierError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn clear(&self) -> Result<usize, TierError> {
        let count = self.cache.iter().count();
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(count)
    }

    async fn entry_ttl(&self, key: &str) -> Result<Option<Ttl>, TierError> {
        let Some(item) = self.cache.get(key).await else {
            return Ok(None);
        };
        let ttl = match item.deadline {
            Some(deadline) => Ttl::Finite(deadline.saturating_duration_since(Instant::now())),
            None => Ttl::Unbounded,
        };
        Ok(Some(ttl))
    }

    async fn update_ttl(&self, key: &str, ttl: Ttl) -> Result<(), TierError> {
        if let Some(mut item) = self.cache.get(key).await {
            item.deadline = Self::deadline(ttl);
            self.cache.insert(key.to_owned(), item).await;
        }
        Ok(())
    }

    fn default_ttl(&self) -> Ttl {
        Ttl::from_option(self.default_ttl)
    }

    fn is_shared(&self) -> bool {
        false
    }

    fn rejection_safe(&self) -> bool {
        true
    }

    fn listeners(&self) -> Option<&TierListeners> {
        Some(self.listeners.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::caching::TierListener;
    use crate::test;

    use super::*;

    struct Collect(Mutex<Vec<String>>);

    impl TierListener for Collect {
        fn on_evicted(&self, key: &str) {
            self.0.lock().unwrap().push(key.to_owned());
        }
    }

    #[tokio::test]
    async fn test_get_set_del() {
        test::setup();
        let tier = MemoryTier::<String>::new(100, Some(Duration::from_secs(60)));

        assert_eq!(tier.get("foo").await.unwrap(), None);
        tier.set("foo", "bar".to_owned(), None).await.unwrap();
        assert_eq!(tier.get("foo").await.unwrap().as_deref(), Some("bar"));

        let ttl = tier.entry_ttl("foo").await.unwrap().unwrap();
        assert!(ttl <= Ttl::Finite(Duration::from_secs(60)));
        assert!(ttl > Ttl::Finite(Duration::from_secs(59)));
        assert_eq!(tier.get_ttl(None).await.unwrap(), Ttl::Finite(Duration::from_secs(60)));

        assert!(tier.del("foo").await.unwrap());
        assert!(!tier.del("foo").await.unwrap());
        assert_eq!(tier.entry_ttl("foo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiration() {
        test::setup();
        let tier = MemoryTier::<u32>::new(100, None);
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        tier.listeners().unwrap().register(collect.clone());

        tier.set("foo", 1, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        tier.set("bar", 2, None).await.unwrap();
        assert_eq!(tier.entry_ttl("bar").await.unwrap(), Some(Ttl::Unbounded));

        test::sleep_ms(150).await;
        assert_eq!(tier.get("foo").await.unwrap(), None);
        assert_eq!(tier.get("bar").await.unwrap(), Some(2));

        // moka only reaps expired entries once its timer wheel advanced past them
        test::sleep_ms(1500).await;
        tier.run_pending_tasks().await;
        assert_eq!(*collect.0.lock().unwrap(), vec!["foo".to_owned()]);
    }

    #[tokio::test]
    async fn test_update_ttl() {
        test::setup();
        let tier = MemoryTier::<u32>::new(100, Some(Duration::from_millis(50)));
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        tier.listeners().unwrap().register(collect.clone());

        tier.set("foo", 1, None).await.unwrap();
        tier.update_ttl("foo", Ttl::Unbounded).await.unwrap();
        // absent keys are ignored
        tier.update_ttl("bar", Ttl::Unbounded).await.unwrap();

        test::sleep_ms(150).await;
        assert_eq!(tier.get("foo").await.unwrap(), Some(1));
        assert_eq!(tier.get("bar").await.unwrap(), None);

        // replacing the item is not an eviction
        tier.run_pending_tasks().await;
        assert!(collect.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let tier = MemoryTier::<u32>::new(100, None);
        tier.set("foo", 1, None).await.unwrap();
        tier.set("bar", 2, None).await.unwrap();

        assert_eq!(tier.clear().await.unwrap(), 2);
        assert_eq!(tier.clear().await.unwrap(), 0);
        assert_eq!(tier.get("foo").await.unwrap(), None);
    }
}
