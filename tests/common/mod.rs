//! Common test utilities for ballast integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's data or config directories.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ballast::config::{ConfigOverrides, EngineConfig, ResolvedConfig, resolve_layers};
use ballast::models::StorageRecord;
use ballast::storage::{Capability, MemoryDriver, StorageDriver, StorageKey, Tier};
use ballast::{EngineBuilder, SettingsEngine};
pub use tempfile::TempDir;

/// Debounce window used by engines built in tests.
pub const TEST_DEBOUNCE: Duration = Duration::from_millis(400);

/// A test environment with an isolated data directory.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with an isolated directory.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    /// Resolved configuration rooted at the data directory.
    ///
    /// Environment variables and config.kdl are not consulted, so tests stay
    /// parallel-safe.
    pub fn config(&self, overrides: ConfigOverrides) -> ResolvedConfig {
        resolve_layers(
            &overrides.with_data_dir(self.data_path()),
            &EngineConfig::new(),
            None,
            &EngineConfig::new(),
        )
        .unwrap()
    }

    /// Open an engine on real drivers in the data directory.
    pub async fn open(&self) -> SettingsEngine {
        SettingsEngine::open(&self.config(ConfigOverrides::new()))
            .await
            .unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Two in-memory drivers posing as the structured and flat tiers.
pub struct MemoryTiers {
    pub structured: MemoryDriver,
    pub flat: MemoryDriver,
}

impl MemoryTiers {
    pub fn new() -> Self {
        Self {
            structured: MemoryDriver::with_tier(Tier::Structured),
            flat: MemoryDriver::with_tier(Tier::Flat),
        }
    }

    /// Builder wired to both drivers.
    pub fn builder(&self) -> EngineBuilder {
        SettingsEngine::builder()
            .driver(self.structured.clone())
            .driver(self.flat.clone())
            .debounce(TEST_DEBOUNCE)
    }

    /// Build and load an engine on both drivers.
    pub async fn engine(&self) -> SettingsEngine {
        self.builder().load().await.unwrap()
    }
}

impl Default for MemoryTiers {
    fn default() -> Self {
        Self::new()
    }
}

/// Store a raw JSON payload under the default key, with a valid record checksum.
pub fn store_json(driver: &MemoryDriver, payload: &serde_json::Value) {
    driver.insert_raw(
        &StorageKey::default(),
        StorageRecord::seal(payload.to_string(), None),
    );
}

/// Parse the payload of the last write under the default key.
pub fn last_written(driver: &MemoryDriver) -> serde_json::Value {
    let writes = driver.writes(&StorageKey::default());
    let record = writes.last().expect("no writes recorded");
    serde_json::from_str(&record.payload).unwrap()
}

#[derive(Default)]
struct Gate {
    hold_reads: bool,
    hold_writes: bool,
}

/// A memory driver whose reads or writes can be held mid-call.
///
/// Lets a test act on the engine while a load or save is parked inside the
/// driver. Capability checks are never held.
#[derive(Clone)]
pub struct GatedDriver {
    inner: MemoryDriver,
    gate: Arc<(Mutex<Gate>, Condvar)>,
    blocked: Arc<AtomicUsize>,
}

impl GatedDriver {
    pub fn new(inner: MemoryDriver) -> Self {
        Self {
            inner,
            gate: Arc::new((Mutex::new(Gate::default()), Condvar::new())),
            blocked: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hold_reads(&self) {
        self.gate.0.lock().unwrap().hold_reads = true;
    }

    pub fn hold_writes(&self) {
        self.gate.0.lock().unwrap().hold_writes = true;
    }

    /// Let every held call through.
    pub fn release(&self) {
        let (lock, cvar) = &*self.gate;
        *lock.lock().unwrap() = Gate::default();
        cvar.notify_all();
    }

    /// Wait until a call is parked at the gate.
    pub async fn wait_blocked(&self) {
        while self.blocked.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn pass(&self, held: impl Fn(&Gate) -> bool) {
        let (lock, cvar) = &*self.gate;
        let mut gate = lock.lock().unwrap();
        if !held(&gate) {
            return;
        }
        self.blocked.fetch_add(1, Ordering::SeqCst);
        while held(&gate) {
            gate = cvar.wait(gate).unwrap();
        }
        self.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StorageDriver for GatedDriver {
    fn capability_check(&self) -> Capability {
        self.inner.capability_check()
    }

    fn read(&self, key: &StorageKey) -> ballast::Result<Option<StorageRecord>> {
        self.pass(|gate| gate.hold_reads);
        self.inner.read(key)
    }

    fn write(&self, key: &StorageKey, record: &StorageRecord) -> ballast::Result<()> {
        self.pass(|gate| gate.hold_writes);
        self.inner.write(key, record)
    }

    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    fn driver_type(&self) -> &'static str {
        "gated"
    }
}
