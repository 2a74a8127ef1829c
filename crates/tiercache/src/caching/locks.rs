use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// The lock of one key, along with everyone holding or waiting for it.
#[derive(Debug, Default)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

/// Serializes mutations per key, while independent keys proceed in parallel.
///
/// Locks are created on demand and dropped again as soon as nobody holds or waits for them.
#[derive(Debug, Default)]
pub(super) struct KeyLocks {
    locks: Mutex<HashMap<String, Slot>>,
}

impl KeyLocks {
    /// Waits until the lock for `key` is available.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            let slot = locks.entry(key.to_owned()).or_default();
            slot.users += 1;
            Arc::clone(&slot.lock)
        };

        // created before waiting, so that a cancelled waiter gives up its slot as well
        let mut guard = KeyGuard {
            locks: self,
            key: key.to_owned(),
            guard: None,
        };
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// The number of keys that are currently locked or waited on.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

/// Holds the lock for one key, see [`KeyLocks::lock`].
pub(super) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.locks.lock().unwrap();
        if let Some(slot) = locks.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}
