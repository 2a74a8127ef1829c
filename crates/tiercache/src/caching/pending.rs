use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};

use super::CacheError;

/// A computation that any number of callers can await.
pub(super) type SharedComputation<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// The in-flight computations of a tiered cache, by key.
///
/// Every computation is registered under a unique id so that it can only ever remove its own
/// registration, and never one that superseded it.
pub(super) struct PendingComputations<V> {
    inner: Mutex<Inner<V>>,
}

struct Inner<V> {
    next_id: u64,
    computations: HashMap<String, (u64, SharedComputation<V>)>,
}

impl<V> Default for PendingComputations<V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                computations: HashMap::new(),
            }),
        }
    }
}

impl<V> PendingComputations<V> {
    /// Removes the registration of `key`, but only if it is still the one with the given `id`.
    pub fn remove(&self, key: &str, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.computations.get(key) {
            Some((current, _)) if *current == id => {
                inner.computations.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Removes whatever computation is registered for `key`, superseding it.
    pub fn take(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.computations.remove(key).is_some()
    }

    /// Whether the registration with `id` is still the one in flight for `key`.
    pub fn is_current(&self, key: &str, id: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        matches!(inner.computations.get(key), Some((current, _)) if *current == id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().computations.len()
    }
}

impl<V> PendingComputations<V>
where
    V: Clone,
{
    /// Registers the computation created by `start` under `key`, replacing any previous one.
    ///
    /// `start` receives the id of the registration and is called while the map is locked, so the
    /// computation can not settle and [`remove`](Self::remove) itself before it was registered.
    pub fn register<F>(&self, key: &str, start: F) -> SharedComputation<V>
    where
        F: FnOnce(u64) -> SharedComputation<V>,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;

        let computation = start(id);
        inner
            .computations
            .insert(key.to_owned(), (id, computation.clone()));
        computation
    }

    /// The computation currently in flight for `key`.
    pub fn get(&self, key: &str) -> Option<SharedComputation<V>> {
        let inner = self.inner.lock().unwrap();
        inner
            .computations
            .get(key)
            .map(|(_, computation)| computation.clone())
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    fn ready(value: u32) -> SharedComputation<u32> {
        async move { Ok(value) }.boxed().shared()
    }

    #[tokio::test]
    async fn test_guarded_removal() {
        let pending = PendingComputations::default();

        let mut first_id = None;
        pending.register("foo", |id| {
            first_id = Some(id);
            ready(1)
        });
        let mut second_id = None;
        pending.register("foo", |id| {
            second_id = Some(id);
            ready(2)
        });

        // the superseded registration does not remove the newer one
        assert!(!pending.remove("foo", first_id.unwrap()));
        assert_eq!(pending.get("foo").unwrap().await.unwrap(), 2);

        assert!(pending.is_current("foo", second_id.unwrap()));
        assert!(pending.remove("foo", second_id.unwrap()));
        assert!(pending.get("foo").is_none());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_take() {
        let pending = PendingComputations::default();

        let mut id = None;
        pending.register("foo", |registered| {
            id = Some(registered);
            ready(1)
        });

        assert!(pending.take("foo"));
        assert!(!pending.take("foo"));
        assert!(!pending.is_current("foo", id.unwrap()));
        assert!(!pending.remove("foo", id.unwrap()));
    }
}
