//! Ephemeral tier: records held in process memory.
//!
//! `MemoryDriver` is a cheap `Clone` handle; clones share one store. Besides
//! being the last-resort tier it doubles as the test driver: it can pose as any
//! tier, report itself unavailable, and fail reads or writes on demand.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::StorageRecord;
use crate::storage::{Capability, StorageDriver, StorageKey, Tier};
use crate::{Error, Result};

/// Policy for when writes should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Never fail (passthrough)
    #[default]
    Never,
    /// Fail every write
    Always,
    /// Fail the next N writes, then succeed
    FirstN(usize),
    /// Succeed for N writes, then fail every write
    AfterWrites(usize),
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<StorageKey, StorageRecord>,
    history: Vec<(StorageKey, StorageRecord)>,
    write_policy: FailurePolicy,
    attempted_writes: usize,
    unavailable: Option<String>,
    fail_reads: bool,
}

/// In-memory record store.
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
    tier: Tier,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Ephemeral driver with an empty store.
    pub fn new() -> Self {
        Self::with_tier(Tier::Ephemeral)
    }

    /// Driver reporting `tier`, for standing in for a durable driver.
    pub fn with_tier(tier: Tier) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            tier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // The state holds plain data; a panic elsewhere cannot leave it half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the capability probe fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = if available {
            None
        } else {
            Some("memory driver marked unavailable".to_string())
        };
    }

    /// Set the write failure policy and reset the write counter.
    pub fn set_write_policy(&self, policy: FailurePolicy) {
        let mut state = self.lock();
        state.write_policy = policy;
        state.attempted_writes = 0;
    }

    /// Make reads fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Store a record directly, bypassing failure injection and history.
    pub fn insert_raw(&self, key: &StorageKey, record: StorageRecord) {
        self.lock().records.insert(key.clone(), record);
    }

    /// Current record under `key`, bypassing failure injection.
    pub fn get(&self, key: &StorageKey) -> Option<StorageRecord> {
        self.lock().records.get(key).cloned()
    }

    /// Number of successful writes to `key`.
    pub fn write_count(&self, key: &StorageKey) -> usize {
        self.lock().history.iter().filter(|(k, _)| k == key).count()
    }

    /// Every record successfully written to `key`, oldest first.
    pub fn writes(&self, key: &StorageKey) -> Vec<StorageRecord> {
        self.lock()
            .history
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Number of write attempts since the policy was last set, failed ones included.
    pub fn attempted_writes(&self) -> usize {
        self.lock().attempted_writes
    }

    fn should_fail(state: &MemoryState) -> bool {
        match state.write_policy {
            FailurePolicy::Never => false,
            FailurePolicy::Always => true,
            FailurePolicy::FirstN(n) => state.attempted_writes <= n,
            FailurePolicy::AfterWrites(n) => state.attempted_writes > n,
        }
    }
}

impl StorageDriver for MemoryDriver {
    fn capability_check(&self) -> Capability {
        match &self.lock().unavailable {
            None => Capability::Available,
            Some(reason) => Capability::Unavailable(reason.clone()),
        }
    }

    fn read(&self, key: &StorageKey) -> Result<Option<StorageRecord>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(Error::StorageUnavailable(format!(
                "injected read failure for {}",
                key
            )));
        }
        Ok(state.records.get(key).cloned())
    }

    fn write(&self, key: &StorageKey, record: &StorageRecord) -> Result<()> {
        let mut state = self.lock();
        state.attempted_writes += 1;
        if Self::should_fail(&state) {
            return Err(Error::StorageUnavailable(format!(
                "injected write failure #{} for {}",
                state.attempted_writes, key
            )));
        }
        state.records.insert(key.clone(), record.clone());
        state.history.push((key.clone(), record.clone()));
        Ok(())
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn driver_type(&self) -> &'static str {
        "memory"
    }
}
