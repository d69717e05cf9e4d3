//! Per-key debounced tasks.
//!
//! Each key has at most one scheduled task. Scheduling again within the window
//! cancels the sleeping task and starts a new window, so a burst of calls runs
//! only the last one. A task that has already woken up is never aborted; it
//! runs to completion while the next one waits out its own window.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Debounce window used when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

struct Slot {
    /// True while the task is still sleeping; cleared by whoever gets to it first
    armed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Scheduler of debounced tasks on a tokio runtime.
pub struct Debouncer<K> {
    handle: Handle,
    window: Duration,
    slots: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K> std::fmt::Debug for Debouncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Debouncer spawning onto `handle` with the given window.
    pub fn new(handle: Handle, window: Duration) -> Self {
        Self {
            handle,
            window,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `make()` once the window elapses without another call for `key`.
    ///
    /// `make` is called at fire time, so whatever it captures by handle is read
    /// then rather than now.
    pub fn schedule<F, Fut>(&self, key: K, make: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.lock();
        if let Some(prev) = slots.remove(&key) {
            disarm(prev);
        }

        let armed = Arc::new(AtomicBool::new(true));
        let fire = Arc::clone(&armed);
        let window = self.window;
        let task_slots = Arc::clone(&self.slots);
        let task_key = key.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(window).await;
            if !fire.swap(false, Ordering::SeqCst) {
                return;
            }
            {
                let mut slots = task_slots
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if slots
                    .get(&task_key)
                    .is_some_and(|slot| Arc::ptr_eq(&slot.armed, &fire))
                {
                    slots.remove(&task_key);
                }
            }
            make().await;
        });

        slots.insert(key, Slot { armed, task });
    }

    /// Cancel the scheduled task for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(slot) => disarm(slot),
            None => false,
        }
    }

    /// Whether a task for `key` is still waiting for its window to elapse.
    pub fn is_pending(&self, key: &K) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|slot| slot.armed.load(Ordering::SeqCst))
    }
}

/// Abort a slot's task if it has not fired. Returns whether it was still armed.
fn disarm(slot: Slot) -> bool {
    if slot.armed.swap(false, Ordering::SeqCst) {
        slot.task.abort();
        true
    } else {
        false
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, slot) in slots.drain() {
            disarm(slot);
        }
    }
}
