use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::time::Instant;

use super::signal::Signal;
use super::timer::Timer;
use super::{Deadline, Ttl};

/// Called with the key and entry id when the eviction timer of an entry fires.
pub(super) type ExpireHook = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// The deadline at which a single tier's copy expires, `None` if the tier holds no copy.
type TierDeadline = Option<Deadline>;

/// Bookkeeping details of a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    /// The number of times the entry was written after it was created.
    pub revision: u64,
}

/// Identifies the state of the bookkeeping for a key at one point in time.
///
/// Two stamps of the same key differ if the entry has been written, deleted, expired or cleared
/// in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Stamp {
    removals: u64,
    entry: Option<(u64, u64)>,
}

/// The tracked state of one key, independent of which tiers currently hold it.
struct Entry {
    id: u64,
    info: EntryInfo,
    /// One deadline per tier, in tier order.
    sources: Vec<Signal<TierDeadline>>,
    /// The latest of all `sources`.
    ttl: Signal<TierDeadline>,
    timer: Timer,
}

impl Entry {
    fn new(id: u64, deadlines: Vec<TierDeadline>, timer: Timer) -> Self {
        let sources: Vec<_> = deadlines.into_iter().map(Signal::new).collect();
        let ttl = Signal::derived(&sources, |deadlines| {
            deadlines.iter().copied().max().flatten()
        });

        arm(&timer, ttl.get());
        let hook_timer = timer.clone();
        ttl.subscribe(move |_old, new| arm(&hook_timer, *new));

        let now = SystemTime::now();
        Self {
            id,
            info: EntryInfo {
                created_at: now,
                modified_at: now,
                revision: 0,
            },
            sources,
            ttl,
            timer,
        }
    }

    fn set_source(&self, tier: usize, deadline: TierDeadline) {
        if let Some(source) = self.sources.get(tier) {
            source.set(deadline);
        }
    }
}

/// Re-arms the eviction timer for the effective deadline of an entry.
fn arm(timer: &Timer, deadline: TierDeadline) {
    match deadline {
        Some(Deadline::At(deadline)) => timer.reset_at(deadline),
        Some(Deadline::Never) => timer.cancel(),
        // no tier holds a copy anymore
        None => timer.reset(std::time::Duration::ZERO),
    }
}

/// Owns all tracked entries of a tiered cache.
///
/// Every entry owns exactly one eviction timer. The timer is only ever moved through the
/// entry's derived TTL, and it is cancelled before the entry is removed.
pub(super) struct Entries {
    map: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    removals: AtomicU64,
    on_expire: ExpireHook,
}

impl Entries {
    pub fn new(on_expire: ExpireHook) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            on_expire,
        }
    }

    pub fn stamp(&self, key: &str) -> Stamp {
        let map = self.map.lock().unwrap();
        Stamp {
            removals: self.removals.load(Ordering::SeqCst),
            entry: map.get(key).map(|e| (e.id, e.info.revision)),
        }
    }

    /// Records a write of `key`, given the deadline every tier reported right after the write.
    ///
    /// Creates the entry on the first write. Later writes refresh the timestamps and feed the new
    /// deadlines into the existing sources. Returns `true` if the entry was created.
    pub fn upsert(&self, key: &str, deadlines: Vec<TierDeadline>) -> bool {
        let mut map = self.map.lock().unwrap();
        if let Some(entry) = map.get_mut(key) {
            entry.info.modified_at = SystemTime::now();
            entry.info.revision += 1;
            for (tier, deadline) in deadlines.into_iter().enumerate() {
                entry.set_source(tier, deadline);
            }
            return false;
        }

        if deadlines.iter().all(Option::is_none) {
            // nothing was written, so there is nothing to track
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timer = {
            let on_expire = Arc::clone(&self.on_expire);
            let key = key.to_owned();
            Timer::new(move || on_expire(&key, id))
        };
        map.insert(key.to_owned(), Entry::new(id, deadlines, timer));
        true
    }

    /// Updates the deadlines of individual tiers for `key`, if it is tracked.
    pub fn update_tiers(&self, key: &str, updates: &[(usize, TierDeadline)]) {
        let map = self.map.lock().unwrap();
        if let Some(entry) = map.get(key) {
            for (tier, deadline) in updates {
                entry.set_source(*tier, *deadline);
            }
        }
    }

    /// Moves the deadline of every tier that currently holds a copy of `key`.
    pub fn retime(&self, key: &str, tiers: &[usize], deadline: Deadline) {
        let map = self.map.lock().unwrap();
        if let Some(entry) = map.get(key) {
            for tier in tiers {
                if let Some(source) = entry.sources.get(*tier) {
                    if source.get().is_some() {
                        source.set(Some(deadline));
                    }
                }
            }
        }
    }

    /// Removes the entry for `key`, returning whether one was tracked.
    pub fn remove(&self, key: &str) -> bool {
        let mut map = self.map.lock().unwrap();
        self.removals.fetch_add(1, Ordering::SeqCst);
        match map.remove(key) {
            Some(entry) => {
                entry.timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `key`, but only if it is still the entry with the given `id` and its
    /// effective deadline has passed.
    pub fn remove_expired(&self, key: &str, id: u64) -> bool {
        let mut map = self.map.lock().unwrap();
        let expired = match map.get(key) {
            Some(entry) if entry.id == id => match entry.ttl.get() {
                Some(Deadline::At(deadline)) => deadline <= Instant::now(),
                Some(Deadline::Never) => false,
                None => true,
            },
            _ => false,
        };
        if !expired {
            return false;
        }
        self.removals.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = map.remove(key) {
            entry.timer.cancel();
        }
        true
    }

    /// Drops every entry, returning how many were tracked.
    pub fn clear(&self) -> usize {
        let mut map = self.map.lock().unwrap();
        self.removals.fetch_add(1, Ordering::SeqCst);
        for entry in map.values() {
            entry.timer.cancel();
        }
        let count = map.len();
        map.clear();
        count
    }

    pub fn keys(&self) -> Vec<String> {
        let map = self.map.lock().unwrap();
        let mut keys: Vec<_> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn info(&self, key: &str) -> Option<EntryInfo> {
        self.map.lock().unwrap().get(key).map(|entry| entry.info)
    }

    /// The effective remaining TTL of `key`, or `None` if it is not tracked.
    pub fn effective_ttl(&self, key: &str) -> Option<Ttl> {
        let map = self.map.lock().unwrap();
        let entry = map.get(key)?;
        Some(match entry.ttl.get() {
            Some(deadline) => deadline.remaining(),
            None => Ttl::Finite(std::time::Duration::ZERO),
        })
    }

    /// The deadline the eviction timer of `key` is armed with.
    #[cfg(test)]
    pub fn timer_deadline(&self, key: &str) -> Option<Instant> {
        let map = self.map.lock().unwrap();
        map.get(key).and_then(|entry| entry.timer.deadline())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn entries() -> (Entries, Arc<Mutex<Vec<(String, u64)>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = fired.clone();
        let hook: ExpireHook = Arc::new(move |key: &str, id: u64| {
            fired2.lock().unwrap().push((key.to_owned(), id));
        });
        (Entries::new(hook), fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_follows_longest_tier() {
        let (entries, fired) = entries();
        let now = Instant::now();
        let short = Deadline::At(now + Duration::from_millis(5));
        let long = Deadline::At(now + Duration::from_millis(50));

        assert!(entries.upsert("foo", vec![Some(short), None]));
        assert_eq!(entries.timer_deadline("foo"), Some(now + Duration::from_millis(5)));

        entries.update_tiers("foo", &[(1, Some(long))]);
        assert_eq!(entries.timer_deadline("foo"), Some(now + Duration::from_millis(50)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*fired.lock().unwrap(), vec![("foo".to_owned(), 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_cancels_timer() {
        let (entries, _fired) = entries();
        let now = Instant::now();
        entries.upsert("foo", vec![Some(Deadline::At(now + Duration::from_millis(5)))]);
        entries.update_tiers("foo", &[(0, Some(Deadline::Never))]);

        assert_eq!(entries.timer_deadline("foo"), None);
        assert_eq!(entries.effective_ttl("foo"), Some(Ttl::Unbounded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_keeps_entry() {
        let (entries, _fired) = entries();
        let deadline = Deadline::At(Instant::now() + Duration::from_secs(1));

        assert!(entries.upsert("foo", vec![Some(deadline)]));
        let stamp = entries.stamp("foo");
        let created = entries.info("foo").unwrap();

        assert!(!entries.upsert("foo", vec![Some(deadline)]));
        let updated = entries.info("foo").unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.revision, 1);
        assert_ne!(entries.stamp("foo"), stamp);
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_clear() {
        let (entries, fired) = entries();
        let deadline = Deadline::At(Instant::now() + Duration::from_millis(5));
        entries.upsert("foo", vec![Some(deadline)]);
        entries.upsert("bar", vec![Some(deadline)]);
        assert!(!entries.upsert("baz", vec![None]));

        let stamp = entries.stamp("nothing");
        assert!(!entries.remove_expired("foo", 42));
        assert!(!entries.remove_expired("foo", 0));
        assert!(entries.remove("foo"));
        assert!(!entries.remove("foo"));
        assert_ne!(entries.stamp("nothing"), stamp);

        assert_eq!(entries.clear(), 1);
        assert_eq!(entries.clear(), 0);
        assert!(entries.keys().is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fired.lock().unwrap().is_empty());
    }
}
