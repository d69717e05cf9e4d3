//! Driver selection and fallback.
//!
//! The router holds drivers in order of preference. The capability probe runs
//! once, on first use, and its outcome is cached for the session. Any probe or
//! read failure demotes the router to the next driver permanently; there is no
//! promotion back. The first demotion logs one warning and emits
//! [`EngineEvent::Degraded`]. A record that reads but holds damaged content is
//! returned as is; judging it is up to the caller.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::events::{EngineEvent, EventSink};
use crate::models::StorageRecord;
use crate::storage::{Capability, MemoryDriver, StorageDriver, StorageKey, Tier};
use crate::Result;

#[derive(Debug, Default)]
struct RouterState {
    /// Index of the active driver
    active: usize,
    probed: bool,
    /// Reason of the first demotion
    degraded: Option<String>,
}

/// Routes reads and writes to the best available driver.
pub struct DriverRouter {
    drivers: Vec<Arc<dyn StorageDriver>>,
    state: Mutex<RouterState>,
    events: EventSink,
}

impl std::fmt::Debug for DriverRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRouter")
            .field(
                "drivers",
                &self.drivers.iter().map(|d| d.driver_type()).collect::<Vec<_>>(),
            )
            .field("state", &*self.lock())
            .finish()
    }
}

impl DriverRouter {
    /// Router over `drivers`, most preferred first.
    ///
    /// An empty list gets an ephemeral [`MemoryDriver`] so there is always a
    /// last resort.
    pub fn new(mut drivers: Vec<Arc<dyn StorageDriver>>, events: EventSink) -> Self {
        if drivers.is_empty() {
            drivers.push(Arc::new(MemoryDriver::new()));
        }
        Self {
            drivers,
            state: Mutex::new(RouterState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn last_index(&self) -> usize {
        self.drivers.len() - 1
    }

    /// Probe drivers from the top until one is available. Runs once.
    fn ensure_probed(&self) {
        if self.lock().probed {
            return;
        }

        loop {
            let index = self.lock().active;
            let driver = &self.drivers[index];
            match driver.capability_check() {
                Capability::Available => {
                    debug!(
                        driver = driver.driver_type(),
                        tier = %driver.tier(),
                        location = %driver.location(),
                        "Storage driver available"
                    );
                    break;
                }
                Capability::Unavailable(reason) => {
                    if index == self.last_index() {
                        // Nothing left to fall back to; keep using it and let I/O report errors
                        warn!(
                            driver = driver.driver_type(),
                            %reason,
                            "Last-resort storage driver reports unavailable"
                        );
                        break;
                    }
                    self.demote(index, &reason);
                }
            }
        }

        self.lock().probed = true;
    }

    /// Move from driver `from` to the next one, if still on it.
    fn demote(&self, from: usize, reason: &str) {
        let mut state = self.lock();
        if state.active != from || from >= self.last_index() {
            return;
        }
        state.active = from + 1;
        let first = state.degraded.is_none();
        if first {
            state.degraded = Some(reason.to_string());
        }
        drop(state);

        let old = &self.drivers[from];
        let new = &self.drivers[from + 1];
        if first {
            warn!(
                from = %old.tier(),
                to = %new.tier(),
                %reason,
                "Storage degraded; falling back for the rest of the session"
            );
            self.events.emit(EngineEvent::Degraded {
                from: old.tier(),
                to: new.tier(),
                reason: reason.to_string(),
            });
        } else {
            info!(from = %old.tier(), to = %new.tier(), %reason, "Storage fell back again");
        }
    }

    fn active(&self) -> (usize, Arc<dyn StorageDriver>) {
        self.ensure_probed();
        let index = self.lock().active;
        (index, Arc::clone(&self.drivers[index]))
    }

    /// Read the record under `key`.
    ///
    /// A read error on the active driver demotes the router and retries on the
    /// next driver. If the active driver has no record, lower tiers are
    /// consulted so a record written during an earlier degraded session is
    /// still found; their errors are ignored.
    pub fn read(&self, key: &StorageKey) -> Result<Option<(StorageRecord, Tier)>> {
        loop {
            let (index, driver) = self.active();
            match driver.read(key) {
                Ok(Some(record)) => return Ok(Some((record, driver.tier()))),
                Ok(None) => return Ok(self.read_lower(index, key)),
                Err(e) if index < self.last_index() => {
                    self.demote(index, &e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Records under `key` on durable drivers after `index`, in order. Errors
    /// are skipped and never demote.
    fn records_after<'a>(
        &'a self,
        index: usize,
        key: &'a StorageKey,
    ) -> impl Iterator<Item = (StorageRecord, Tier)> + 'a {
        self.drivers[index + 1..]
            .iter()
            .filter(|driver| driver.tier().is_durable())
            .filter_map(move |driver| match driver.read(key) {
                Ok(Some(record)) => Some((record, driver.tier())),
                _ => None,
            })
    }

    fn read_lower(&self, index: usize, key: &StorageKey) -> Option<(StorageRecord, Tier)> {
        let found = self.records_after(index, key).next();
        if let Some((_, tier)) = &found {
            debug!(%tier, %key, "Found record on lower tier");
        }
        found
    }

    /// Records under `key` on durable drivers below the one serving `tier`,
    /// most preferred first.
    ///
    /// For when the record [`read`](Self::read) returned cannot be used.
    pub fn read_below(&self, key: &StorageKey, tier: Tier) -> Vec<(StorageRecord, Tier)> {
        match self.drivers.iter().position(|driver| driver.tier() == tier) {
            Some(index) => self
                .records_after(index, key)
                .filter(|(_, found)| *found != tier)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Write to the active driver. Failures are returned, not retried.
    pub fn write(&self, key: &StorageKey, record: &StorageRecord) -> Result<Tier> {
        let (_, driver) = self.active();
        driver.write(key, record)?;
        Ok(driver.tier())
    }

    /// Run the capability check now, if it has not run yet.
    pub fn check_capabilities(&self) {
        self.ensure_probed();
    }

    /// Tier of the active driver, without checking capabilities.
    ///
    /// Before the first read or write this is the most preferred driver.
    pub fn active_tier(&self) -> Tier {
        self.drivers[self.lock().active].tier()
    }

    /// Location of the active driver, without checking capabilities.
    pub fn active_location(&self) -> String {
        self.drivers[self.lock().active].location()
    }

    pub fn is_degraded(&self) -> bool {
        self.lock().degraded.is_some()
    }
}
