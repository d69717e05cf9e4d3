//! Safe I/O: validated loads and checksummed, retried saves.
//!
//! Nothing in here returns an error for bad stored data. A record that is
//! missing, unreadable, fails its checksum, has the wrong shape or cannot be
//! migrated yields factory defaults plus a [`Recovery`] describing why. A
//! corrupt record is copied to the quarantine key before it can be replaced,
//! and a valid record on a lower durable tier is used in its place.

pub mod checksum;
pub mod debounce;

pub use debounce::{DEFAULT_DEBOUNCE, Debouncer};

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EngineEvent, EventSink};
use crate::migration::{MigrationError, MigrationRegistry};
use crate::models::{CURRENT_SCHEMA_VERSION, ConfigurationDocument, StorageRecord, next_timestamp};
use crate::settings::SettingsSchema;
use crate::storage::{DriverRouter, StorageKey, Tier};

/// Write retries after the first failed attempt when none are configured.
pub const DEFAULT_WRITE_RETRIES: u32 = 1;

/// Why factory defaults were used instead of the stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Recovery {
    /// The driver could not be read
    ReadFailed(String),
    /// Record or document checksum does not match its content
    ChecksumMismatch,
    /// Payload is not JSON
    Unparseable(String),
    /// Document does not match the shape of its declared version
    InvalidShape(String),
    /// A known field holds a value of the wrong kind
    SchemaMismatch(String),
    /// A migration step failed
    MigrationFailed(String),
    /// Document was written by a newer build
    NewerVersion { found: u32, supported: u32 },
}

impl Recovery {
    /// Whether the stored record is damaged, as opposed to unreachable or newer.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::ReadFailed(_) | Self::NewerVersion { .. })
    }
}

impl std::fmt::Display for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::Unparseable(e) => write!(f, "unparseable payload: {}", e),
            Self::InvalidShape(e) => write!(f, "invalid shape: {}", e),
            Self::SchemaMismatch(e) => write!(f, "schema mismatch: {}", e),
            Self::MigrationFailed(e) => write!(f, "migration failed: {}", e),
            Self::NewerVersion { found, supported } => write!(
                f,
                "schema version {} is newer than supported version {}",
                found, supported
            ),
        }
    }
}

/// Where a loaded document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOrigin {
    /// A valid stored record
    Stored(Tier),
    /// Nothing stored yet
    FirstRun,
    /// Stored record unusable; factory defaults
    Recovered(Recovery),
    /// Preferred record corrupt; a valid record from a lower tier instead
    Fallback { tier: Tier, recovery: Recovery },
}

impl LoadOrigin {
    /// Whether the loaded document should be written back to the active tier.
    pub fn needs_write_back(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Result of [`SafeIo::load`]. Always carries a usable document.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub document: ConfigurationDocument,
    pub origin: LoadOrigin,
    /// Declared version of the stored document, if it had to be migrated
    pub migrated_from: Option<u32>,
    /// Known fields dropped for violating their constraints
    pub dropped_fields: Vec<String>,
}

/// A successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReceipt {
    /// Document checksum as written
    pub checksum: String,
    /// `updatedAt` stamped on the written document
    pub updated_at: u64,
    /// Attempts it took, including the successful one
    pub attempts: u32,
    pub tier: Tier,
}

/// A save that failed on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("write failed after {attempts} attempt(s): {reason}")]
pub struct WriteFailure {
    pub attempts: u32,
    pub reason: String,
}

/// A decoded document, the version it was migrated from and dropped fields.
type Decoded = (ConfigurationDocument, Option<u32>, Vec<String>);

/// Validated access to the settings record behind a [`DriverRouter`].
pub struct SafeIo {
    router: Arc<DriverRouter>,
    registry: Arc<MigrationRegistry>,
    schema: Arc<SettingsSchema>,
    key: StorageKey,
    events: EventSink,
    /// Serializes writes: at most one in flight per key
    write_gate: tokio::sync::Mutex<()>,
    retries: u32,
    writer: String,
}

impl std::fmt::Debug for SafeIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeIo")
            .field("key", &self.key)
            .field("retries", &self.retries)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl SafeIo {
    pub fn new(
        router: Arc<DriverRouter>,
        registry: Arc<MigrationRegistry>,
        schema: Arc<SettingsSchema>,
        key: StorageKey,
        events: EventSink,
        retries: u32,
        writer: String,
    ) -> Self {
        Self {
            router,
            registry,
            schema,
            key,
            events,
            write_gate: tokio::sync::Mutex::new(()),
            retries,
            writer,
        }
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    pub fn router(&self) -> &DriverRouter {
        &self.router
    }

    fn factory(&self) -> ConfigurationDocument {
        ConfigurationDocument::factory(&self.schema)
    }

    /// Load the stored document, or factory defaults.
    ///
    /// `on_migrating` is called before migration steps run on a record.
    pub async fn load(&self, on_migrating: impl Fn()) -> LoadOutcome {
        let router = Arc::clone(&self.router);
        let key = self.key.clone();
        let read = tokio::task::spawn_blocking(move || router.read(&key)).await;

        let (record, tier) = match read {
            Ok(Ok(Some(found))) => found,
            Ok(Ok(None)) => {
                info!(key = %self.key, "No stored settings; using factory defaults");
                return self.outcome(self.factory(), LoadOrigin::FirstRun);
            }
            Ok(Err(e)) => return self.recover(Recovery::ReadFailed(e.to_string())),
            Err(e) => return self.recover(Recovery::ReadFailed(e.to_string())),
        };

        debug!(key = %self.key, tier = %tier, writer = ?record.writer, "Read stored settings");
        let recovery = match self.decode(&record, &on_migrating) {
            Ok(decoded) => return self.accept(decoded, LoadOrigin::Stored(tier)),
            Err(recovery) => recovery,
        };
        if !recovery.is_corruption() {
            return self.recover(recovery);
        }

        self.report(&recovery);
        self.quarantine(record).await;

        for (candidate, lower) in self.read_below(tier).await {
            match self.decode(&candidate, &on_migrating) {
                Ok(decoded) => {
                    info!(tier = %lower, reason = %recovery, "Using settings from a lower tier");
                    return self.accept(decoded, LoadOrigin::Fallback { tier: lower, recovery });
                }
                Err(e) => debug!(tier = %lower, reason = %e, "Lower-tier settings unusable"),
            }
        }
        info!(reason = %recovery, "Using factory defaults");
        self.outcome(self.factory(), LoadOrigin::Recovered(recovery))
    }

    fn accept(&self, decoded: Decoded, origin: LoadOrigin) -> LoadOutcome {
        let (document, migrated_from, dropped_fields) = decoded;
        if let Some(from) = migrated_from {
            self.events.emit(EngineEvent::Migrated {
                from,
                to: document.schema_version,
            });
        }
        LoadOutcome {
            document,
            origin,
            migrated_from,
            dropped_fields,
        }
    }

    async fn read_below(&self, tier: Tier) -> Vec<(StorageRecord, Tier)> {
        let router = Arc::clone(&self.router);
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || router.read_below(&key, tier))
            .await
            .unwrap_or_default()
    }

    fn outcome(&self, document: ConfigurationDocument, origin: LoadOrigin) -> LoadOutcome {
        LoadOutcome {
            document,
            origin,
            migrated_from: None,
            dropped_fields: Vec::new(),
        }
    }

    /// Validate, migrate and type-check a record.
    fn decode(&self, record: &StorageRecord, on_migrating: &impl Fn()) -> Result<Decoded, Recovery> {
        if !record.is_sealed() {
            return Err(Recovery::Unparseable("record envelope unreadable".to_string()));
        }
        if !record.verify() {
            return Err(Recovery::ChecksumMismatch);
        }

        let raw: Value = serde_json::from_str(&record.payload)
            .map_err(|e| Recovery::Unparseable(e.to_string()))?;
        let declared = MigrationRegistry::detect_version(&raw)
            .map_err(|e| Recovery::InvalidShape(e.to_string()))?;

        let migrated_from = if declared < self.registry.current_version() {
            on_migrating();
            Some(declared)
        } else {
            None
        };
        let value = self.registry.migrate(raw).map_err(|e| match e {
            MigrationError::NewerThanEngine { found, supported } => {
                Recovery::NewerVersion { found, supported }
            }
            MigrationError::InvalidShape { .. } | MigrationError::NotAnObject => {
                Recovery::InvalidShape(e.to_string())
            }
            other => Recovery::MigrationFailed(other.to_string()),
        })?;

        let mut document: ConfigurationDocument = serde_json::from_value(value)
            .map_err(|e| Recovery::SchemaMismatch(e.to_string()))?;

        if migrated_from.is_none() {
            match document.checksum_matches() {
                Ok(true) => {}
                Ok(false) => return Err(Recovery::ChecksumMismatch),
                Err(e) => return Err(Recovery::SchemaMismatch(e.to_string())),
            }
        }

        let mut dropped = Vec::new();
        let mut mismatched = Vec::new();
        let report = self.schema.sanitize_layer(&mut document.base);
        mismatched.extend(report.kind_mismatches);
        dropped.extend(report.dropped);
        for (name, layer) in document.contexts.iter_mut() {
            let report = self.schema.sanitize_layer(layer);
            mismatched.extend(report.kind_mismatches.into_iter().map(|p| format!("{}.{}", name, p)));
            dropped.extend(report.dropped.into_iter().map(|p| format!("{}.{}", name, p)));
        }
        if !mismatched.is_empty() {
            return Err(Recovery::SchemaMismatch(format!(
                "wrong value kind for {}",
                mismatched.join(", ")
            )));
        }
        if !dropped.is_empty() {
            warn!(fields = ?dropped, "Dropped stored values that violate their constraints");
        }

        for name in self.schema.contexts() {
            document.context_mut(name);
        }
        Ok((document, migrated_from, dropped))
    }

    /// Log and signal why the stored record cannot be used.
    fn report(&self, recovery: &Recovery) {
        match recovery {
            Recovery::NewerVersion { found, supported } => {
                warn!(found, supported, "Stored settings come from a newer build");
                self.events.emit(EngineEvent::OutdatedBuild {
                    found: *found,
                    supported: *supported,
                });
            }
            Recovery::MigrationFailed(reason) => {
                warn!(%reason, "Settings migration failed");
                self.events.emit(EngineEvent::MigrationFailed {
                    reason: reason.clone(),
                });
            }
            other => {
                warn!(reason = %other, "Stored settings unusable");
                self.events.emit(EngineEvent::CorruptionRecovered {
                    reason: other.to_string(),
                });
            }
        }
    }

    /// Factory defaults for a record that could not be reached or is newer.
    fn recover(&self, recovery: Recovery) -> LoadOutcome {
        self.report(&recovery);
        info!(reason = %recovery, "Using factory defaults");
        self.outcome(self.factory(), LoadOrigin::Recovered(recovery))
    }

    /// Copy a damaged record aside. Failures are logged and ignored.
    async fn quarantine(&self, record: StorageRecord) {
        let router = Arc::clone(&self.router);
        let key = self.key.quarantine();
        let target = key.clone();
        match tokio::task::spawn_blocking(move || router.write(&key, &record)).await {
            Ok(Ok(tier)) => info!(key = %target, tier = %tier, "Quarantined damaged settings record"),
            Ok(Err(e)) => warn!(key = %target, error = %e, "Failed to quarantine settings record"),
            Err(e) => warn!(key = %target, error = %e, "Quarantine task failed"),
        }
    }

    /// Read back the quarantined record, if any.
    pub async fn quarantined(&self) -> Option<StorageRecord> {
        let router = Arc::clone(&self.router);
        let key = self.key.quarantine();
        match tokio::task::spawn_blocking(move || router.read(&key)).await {
            Ok(Ok(found)) => found.map(|(record, _)| record),
            _ => None,
        }
    }

    /// Write `document`, stamping `updatedAt` and its checksum.
    ///
    /// A failed write is retried immediately, `retries` times. Writes are
    /// serialized, so a save started while another is in flight waits for it.
    pub async fn save(&self, document: &ConfigurationDocument) -> Result<SaveReceipt, WriteFailure> {
        let _gate = self.write_gate.lock().await;

        let mut sealed = document.clone();
        sealed.schema_version = CURRENT_SCHEMA_VERSION;
        sealed.updated_at = next_timestamp(document.updated_at);
        let prepared = sealed
            .content_hash()
            .and_then(|hash| {
                sealed.checksum = hash;
                Ok(serde_json::to_string(&sealed)?)
            });
        let payload = match prepared {
            Ok(payload) => payload,
            Err(e) => {
                let failure = WriteFailure {
                    attempts: 0,
                    reason: e.to_string(),
                };
                self.events.emit(EngineEvent::SaveFailed {
                    attempts: 0,
                    reason: failure.reason.clone(),
                });
                return Err(failure);
            }
        };
        let record = Arc::new(StorageRecord::seal(payload, Some(self.writer.clone())));

        let max_attempts = self.retries.saturating_add(1);
        let mut reason = String::new();
        for attempt in 1..=max_attempts {
            let router = Arc::clone(&self.router);
            let key = self.key.clone();
            let record = Arc::clone(&record);
            let result = tokio::task::spawn_blocking(move || router.write(&key, &record)).await;

            match result {
                Ok(Ok(tier)) => {
                    debug!(
                        key = %self.key,
                        tier = %tier,
                        attempt,
                        updated_at = sealed.updated_at,
                        "Saved settings"
                    );
                    let receipt = SaveReceipt {
                        checksum: sealed.checksum.clone(),
                        updated_at: sealed.updated_at,
                        attempts: attempt,
                        tier,
                    };
                    self.events.emit(EngineEvent::Saved {
                        checksum: receipt.checksum.clone(),
                        updated_at: receipt.updated_at,
                        tier,
                    });
                    return Ok(receipt);
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(e) => reason = e.to_string(),
            }
            if attempt < max_attempts {
                debug!(key = %self.key, attempt, %reason, "Settings write failed; retrying");
            }
        }

        warn!(key = %self.key, attempts = max_attempts, %reason, "Settings write failed");
        self.events.emit(EngineEvent::SaveFailed {
            attempts: max_attempts,
            reason: reason.clone(),
        });
        Err(WriteFailure {
            attempts: max_attempts,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FieldPath, SettingValue, builtin_schema};
    use crate::storage::{FailurePolicy, MemoryDriver};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        driver: MemoryDriver,
        io: SafeIo,
        events: EventSink,
    }

    fn harness() -> Harness {
        let schema = Arc::new(builtin_schema().unwrap());
        let driver = MemoryDriver::with_tier(Tier::Flat);
        let events = EventSink::new();
        let router = Arc::new(DriverRouter::new(
            vec![Arc::new(driver.clone())],
            events.clone(),
        ));
        let io = SafeIo::new(
            router,
            Arc::new(MigrationRegistry::builtin(&schema)),
            schema,
            StorageKey::default(),
            events.clone(),
            DEFAULT_WRITE_RETRIES,
            "test-session".to_string(),
        );
        Harness { driver, io, events }
    }

    fn store(h: &Harness, value: Value) {
        let record = StorageRecord::seal(value.to_string(), None);
        h.driver.insert_raw(&StorageKey::default(), record);
    }

    // ==================== Load Tests ====================

    #[tokio::test]
    async fn test_empty_store_is_first_run() {
        let h = harness();
        let outcome = h.io.load(|| {}).await;
        assert_eq!(outcome.origin, LoadOrigin::FirstRun);
        assert_eq!(
            outcome.document,
            ConfigurationDocument::factory(&builtin_schema().unwrap())
        );
    }

    #[tokio::test]
    async fn test_valid_record_loads() {
        let h = harness();
        store(
            &h,
            json!({"schemaVersion": 2, "base": {"gridSpacing": 8}, "contexts": {"preview": {"showGrid": false}}}),
        );
        let outcome = h.io.load(|| panic!("no migration expected")).await;
        assert_eq!(outcome.origin, LoadOrigin::Stored(Tier::Flat));
        assert_eq!(
            outcome.document.base.get("gridSpacing"),
            Some(&SettingValue::Integer(8))
        );
        // Known contexts always exist after a load
        assert!(outcome.document.context("normal").is_some());
    }

    #[tokio::test]
    async fn test_record_checksum_mismatch_recovers_and_quarantines() {
        let h = harness();
        let mut record = StorageRecord::seal(
            json!({"schemaVersion": 2, "base": {"gridSpacing": 8}}).to_string(),
            None,
        );
        record.payload = json!({"schemaVersion": 2, "base": {"gridSpacing": 9}}).to_string();
        h.driver.insert_raw(&StorageKey::default(), record.clone());
        let mut rx = h.events.subscribe();

        let outcome = h.io.load(|| {}).await;
        assert_eq!(outcome.origin, LoadOrigin::Recovered(Recovery::ChecksumMismatch));
        assert_eq!(
            outcome.document.base.get("gridSpacing"),
            Some(&SettingValue::Integer(20))
        );
        assert_eq!(h.io.quarantined().await, Some(record));
        assert_eq!(rx.try_recv().unwrap().name(), "corruption_recovered");
    }

    #[tokio::test]
    async fn test_document_checksum_mismatch_recovers() {
        let h = harness();
        store(
            &h,
            json!({"schemaVersion": 2, "base": {"gridSpacing": 8}, "checksum": "sha256:00"}),
        );
        let outcome = h.io.load(|| {}).await;
        assert_eq!(outcome.origin, LoadOrigin::Recovered(Recovery::ChecksumMismatch));
    }

    #[tokio::test]
    async fn test_unparseable_payload_recovers() {
        let h = harness();
        h.driver.insert_raw(
            &StorageKey::default(),
            StorageRecord::seal("{not json".to_string(), None),
        );
        let outcome = h.io.load(|| {}).await;
        assert!(matches!(
            outcome.origin,
            LoadOrigin::Recovered(Recovery::Unparseable(_))
        ));
    }

    #[tokio::test]
    async fn test_unsealed_record_is_quarantined_with_raw_content() {
        let h = harness();
        h.driver.insert_raw(
            &StorageKey::default(),
            StorageRecord::unsealed("truncated{".to_string()),
        );
        let outcome = h.io.load(|| {}).await;
        assert!(matches!(
            outcome.origin,
            LoadOrigin::Recovered(Recovery::Unparseable(_))
        ));
        assert_eq!(h.io.quarantined().await.unwrap().payload, "truncated{");
    }

    #[tokio::test]
    async fn test_corrupt_preferred_record_falls_back_to_lower_tier() {
        let schema = Arc::new(builtin_schema().unwrap());
        let structured = MemoryDriver::with_tier(Tier::Structured);
        let flat = MemoryDriver::with_tier(Tier::Flat);
        let events = EventSink::new();
        let router = Arc::new(DriverRouter::new(
            vec![Arc::new(structured.clone()), Arc::new(flat.clone())],
            events.clone(),
        ));
        let io = SafeIo::new(
            router,
            Arc::new(MigrationRegistry::builtin(&schema)),
            schema,
            StorageKey::default(),
            events,
            DEFAULT_WRITE_RETRIES,
            "test-session".to_string(),
        );
        let key = StorageKey::default();
        structured.insert_raw(&key, StorageRecord::unsealed("garbage".to_string()));
        flat.insert_raw(
            &key,
            StorageRecord::seal(
                json!({"schemaVersion": 2, "base": {"gridSpacing": 8}}).to_string(),
                None,
            ),
        );

        let outcome = io.load(|| {}).await;
        assert!(matches!(
            &outcome.origin,
            LoadOrigin::Fallback {
                tier: Tier::Flat,
                recovery: Recovery::Unparseable(_)
            }
        ));
        assert!(outcome.origin.needs_write_back());
        assert_eq!(
            outcome.document.base.get("gridSpacing"),
            Some(&SettingValue::Integer(8))
        );
        assert_eq!(
            structured.get(&key.quarantine()).unwrap().payload,
            "garbage"
        );
    }

    #[tokio::test]
    async fn test_wrong_kind_is_corruption() {
        let h = harness();
        store(&h, json!({"schemaVersion": 2, "base": {"gridSpacing": "wide"}}));
        let outcome = h.io.load(|| {}).await;
        assert!(matches!(
            outcome.origin,
            LoadOrigin::Recovered(Recovery::SchemaMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_constraint_violation_drops_field_only() {
        let h = harness();
        store(
            &h,
            json!({"schemaVersion": 2, "base": {"gridSpacing": 100000, "showGrid": false}}),
        );
        let outcome = h.io.load(|| {}).await;
        assert_eq!(outcome.origin, LoadOrigin::Stored(Tier::Flat));
        assert_eq!(outcome.dropped_fields, vec!["gridSpacing".to_string()]);
        assert!(outcome.document.base.get("gridSpacing").is_none());
        assert_eq!(
            outcome.document.base.get("showGrid"),
            Some(&SettingValue::Bool(false))
        );
    }

    #[tokio::test]
    async fn test_unknown_fields_survive_load() {
        let h = harness();
        store(
            &h,
            json!({"schemaVersion": 2, "base": {"futureField": "x"}, "contexts": {"print": {}}}),
        );
        let outcome = h.io.load(|| {}).await;
        assert_eq!(
            outcome.document.base.get("futureField"),
            Some(&SettingValue::Text("x".into()))
        );
        assert!(outcome.document.context("print").is_some());
    }

    #[tokio::test]
    async fn test_legacy_record_is_migrated() {
        let h = harness();
        store(&h, json!({"gridSpacing": 5, "preview": {"gridSpacing": 40}}));
        let migrating = AtomicBool::new(false);
        let mut rx = h.events.subscribe();

        let outcome = h.io.load(|| migrating.store(true, Ordering::SeqCst)).await;
        assert!(migrating.load(Ordering::SeqCst));
        assert_eq!(outcome.migrated_from, Some(1));
        assert_eq!(outcome.document.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(
            outcome.document.context("preview").unwrap().get("gridSpacing"),
            Some(&SettingValue::Integer(40))
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::Migrated { from: 1, to: 2 }
        ));
    }

    #[tokio::test]
    async fn test_newer_record_signals_outdated_build_without_quarantine() {
        let h = harness();
        store(&h, json!({"schemaVersion": 9, "base": {}}));
        let mut rx = h.events.subscribe();

        let outcome = h.io.load(|| {}).await;
        assert_eq!(
            outcome.origin,
            LoadOrigin::Recovered(Recovery::NewerVersion {
                found: 9,
                supported: 2
            })
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::OutdatedBuild { found: 9, .. }
        ));
        assert!(h.io.quarantined().await.is_none());
    }

    #[tokio::test]
    async fn test_read_failure_recovers() {
        let h = harness();
        h.driver.fail_reads(true);
        let outcome = h.io.load(|| {}).await;
        assert!(matches!(
            outcome.origin,
            LoadOrigin::Recovered(Recovery::ReadFailed(_))
        ));
    }

    // ==================== Save Tests ====================

    #[tokio::test]
    async fn test_save_stamps_and_round_trips() {
        let h = harness();
        let mut doc = ConfigurationDocument::factory(&builtin_schema().unwrap());
        doc.base
            .set(FieldPath::parse("gridSpacing").unwrap(), 12.into());

        let receipt = h.io.save(&doc).await.unwrap();
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.tier, Tier::Flat);
        assert!(receipt.updated_at > doc.updated_at);
        assert!(receipt.checksum.starts_with("sha256:"));

        let stored = h.driver.get(&StorageKey::default()).unwrap();
        assert_eq!(stored.writer.as_deref(), Some("test-session"));

        let outcome = h.io.load(|| {}).await;
        assert_eq!(outcome.origin, LoadOrigin::Stored(Tier::Flat));
        assert!(outcome.document.same_settings(&doc));
        assert_eq!(outcome.document.checksum, receipt.checksum);
        assert_eq!(outcome.document.updated_at, receipt.updated_at);
    }

    #[tokio::test]
    async fn test_save_retries_once() {
        let h = harness();
        h.driver.set_write_policy(FailurePolicy::FirstN(1));
        let doc = ConfigurationDocument::factory(&builtin_schema().unwrap());

        let receipt = h.io.save(&doc).await.unwrap();
        assert_eq!(receipt.attempts, 2);
    }

    #[tokio::test]
    async fn test_save_failure_after_retry() {
        let h = harness();
        h.driver.set_write_policy(FailurePolicy::Always);
        let mut rx = h.events.subscribe();
        let doc = ConfigurationDocument::factory(&builtin_schema().unwrap());

        let failure = h.io.save(&doc).await.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(h.driver.attempted_writes(), 2);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::SaveFailed { attempts: 2, .. }
        ));
    }
}
