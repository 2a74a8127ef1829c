//! A minimal observable value.
//!
//! A [`Signal`] holds a value and notifies its subscribers whenever that value actually changes.
//! A derived signal recomputes itself from a fixed list of dependency signals whenever any of
//! them changes. Dependencies are fixed at construction, so the observer graph is acyclic.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

type Observer<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// Identifies a subscription so that it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct State<T> {
    value: T,
    next_id: u64,
    observers: Vec<(SubscriptionId, Observer<T>)>,
}

/// An observable value, see the [module docs](self).
///
/// Cloning a [`Signal`] gives another handle to the same value.
pub struct Signal<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Signal")
            .field("value", &state.value)
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                value,
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    /// Creates a signal whose value is `recompute` applied to the current values of `deps`.
    ///
    /// The derived signal subscribes to every dependency and only notifies its own subscribers
    /// if the recomputed value differs from the previous one. It holds weak references to its
    /// dependencies, the caller has to keep them alive.
    pub fn derived<F>(deps: &[Signal<T>], recompute: F) -> Self
    where
        F: Fn(&[T]) -> T + Send + Sync + 'static,
    {
        let values: Vec<T> = deps.iter().map(Signal::get).collect();
        let derived = Self::new(recompute(&values));

        let recompute = Arc::new(recompute);
        let weak_deps: Arc<[WeakSignal<T>]> = deps.iter().map(Signal::downgrade).collect();
        let target = derived.downgrade();

        for dep in deps {
            let recompute = Arc::clone(&recompute);
            let weak_deps = Arc::clone(&weak_deps);
            let target = target.clone();
            dep.subscribe(move |_old, _new| {
                let Some(target) = target.upgrade() else {
                    return;
                };
                let values: Option<Vec<T>> = weak_deps
                    .iter()
                    .map(|dep| dep.upgrade().map(|dep| dep.get()))
                    .collect();
                if let Some(values) = values {
                    target.set(recompute(&values));
                }
            });
        }

        derived
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        self.state.lock().unwrap().value.clone()
    }

    /// Replaces the value, notifying all subscribers if it changed.
    ///
    /// Returns `true` if the value changed.
    pub fn set(&self, value: T) -> bool {
        let (old, observers) = {
            let mut state = self.state.lock().unwrap();
            if state.value == value {
                return false;
            }
            let old = std::mem::replace(&mut state.value, value.clone());
            let observers: Vec<_> = state.observers.iter().map(|(_, o)| o.clone()).collect();
            (old, observers)
        };

        // observers run outside of the lock so they can freely read this signal again
        for observer in observers {
            observer(&old, &value);
        }
        true
    }

    /// Registers `observer` to be called with the old and new value on every change.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.observers.push((id, Arc::new(observer)));
        id
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        state.observers.len() != before
    }

    fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            state: Arc::downgrade(&self.state),
        }
    }
}

struct WeakSignal<T> {
    state: Weak<Mutex<State<T>>>,
}

impl<T> Clone for WeakSignal<T> {
    fn clone(&self) -> Self {
        Self {
            state: Weak::clone(&self.state),
        }
    }
}

impl<T> WeakSignal<T> {
    fn upgrade(&self) -> Option<Signal<T>> {
        self.state.upgrade().map(|state| Signal { state })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_set_notifies_on_change() {
        let signal = Signal::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = seen.clone();
        signal.subscribe(move |old, new| seen2.lock().unwrap().push((*old, *new)));

        assert!(signal.set(2));
        assert!(!signal.set(2));
        assert!(signal.set(3));

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 3)]);
        assert_eq!(signal.get(), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let signal = Signal::new(0);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls2 = calls.clone();
        let id = signal.subscribe(move |_, _| {
            calls2.fetch_add(1, Ordering::Relaxed);
        });

        signal.set(1);
        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
        signal.set(2);

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_derived_recomputes() {
        let a = Signal::new(1);
        let b = Signal::new(5);
        let max = Signal::derived(&[a.clone(), b.clone()], |values| {
            values.iter().copied().max().unwrap_or_default()
        });
        assert_eq!(max.get(), 5);

        let changes = Arc::new(AtomicUsize::new(0));
        let changes2 = changes.clone();
        max.subscribe(move |_, _| {
            changes2.fetch_add(1, Ordering::Relaxed);
        });

        // raising a value below the max does not change the derived value
        a.set(3);
        assert_eq!(max.get(), 5);
        assert_eq!(changes.load(Ordering::Relaxed), 0);

        a.set(7);
        assert_eq!(max.get(), 7);
        b.set(2);
        assert_eq!(max.get(), 7);
        a.set(0);
        assert_eq!(max.get(), 2);
        assert_eq!(changes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_derived_is_dropped_independently() {
        let a = Signal::new(1);
        let derived = Signal::derived(&[a.clone()], |values| values[0] * 2);
        assert_eq!(derived.get(), 2);
        drop(derived);

        // the dangling observer is a no-op
        assert!(a.set(4));
    }
}
