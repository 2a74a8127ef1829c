use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct TimerState {
    deadline: Mutex<Option<Instant>>,
    rearmed: Notify,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl TimerState {
    async fn run(self: Arc<Self>) {
        loop {
            let deadline = *self.deadline.lock().unwrap();
            let Some(deadline) = deadline else {
                self.rearmed.notified().await;
                continue;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let mut current = self.deadline.lock().unwrap();
                    // only fire if nobody re-armed the timer in the meantime
                    if *current == Some(deadline) {
                        *current = None;
                        drop(current);
                        (self.callback)();
                    }
                }
                _ = self.rearmed.notified() => {}
            }
        }
    }
}

struct TimerInner {
    state: Arc<TimerState>,
    task: JoinHandle<()>,
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A single delayed callback with a mutable deadline.
///
/// The callback is fixed at construction; re-arming the timer only moves its deadline. The timer
/// is backed by one background task which is aborted once the last handle is dropped.
///
/// Must be created from within a tokio runtime.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.deadline())
            .finish()
    }
}

impl Timer {
    /// Creates a disarmed timer that will invoke `callback` whenever it fires.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Arc::new(TimerState {
            deadline: Mutex::new(None),
            rearmed: Notify::new(),
            callback: Box::new(callback),
        });
        let task = tokio::spawn(Arc::clone(&state).run());
        Self {
            inner: Arc::new(TimerInner { state, task }),
        }
    }

    /// Arms the timer to fire after `delay`, replacing any previous deadline.
    pub fn reset(&self, delay: Duration) {
        self.reset_at(Instant::now() + delay);
    }

    /// Arms the timer to fire at `deadline`, replacing any previous deadline.
    pub fn reset_at(&self, deadline: Instant) {
        self.set_deadline(Some(deadline));
    }

    /// Disarms the timer. It can be armed again with [`reset`](Self::reset).
    pub fn cancel(&self) {
        self.set_deadline(None);
    }

    /// The deadline the timer is currently armed with, if any.
    pub fn deadline(&self) -> Option<Instant> {
        *self.inner.state.deadline.lock().unwrap()
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        let state = &self.inner.state;
        *state.deadline.lock().unwrap() = deadline;
        state.rearmed.notify_one();
    }
}
