//! The settings engine facade.
//!
//! [`SettingsEngine`] owns the three layers (base, contexts, session
//! overrides), drives loading and migration, resolves effective
//! configurations and schedules debounced saves. It is a cheap `Clone`
//! handle; clones share one engine. There is no global instance.
//!
//! Setters apply to memory synchronously, in call order, and schedule a save
//! on the runtime captured at build time. Only the document as it is when the
//! debounce window elapses is written.

pub mod state;

pub use state::{EngineStatus, Lifecycle, PersistenceState};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolvedConfig;
use crate::events::{EngineEvent, EventSink};
use crate::migration::MigrationRegistry;
use crate::models::ConfigurationDocument;
use crate::safe_io::{
    DEFAULT_DEBOUNCE, DEFAULT_WRITE_RETRIES, Debouncer, LoadOrigin, Recovery, SafeIo,
};
use crate::settings::{
    EffectiveConfiguration, FieldPath, OverrideValue, SessionOverrides, SettingValue,
    SettingsSchema, builtin_schema, resolve, validate_context_name,
};
use crate::storage::{
    DriverRouter, KvFileDriver, MemoryDriver, SqliteDriver, StorageDriver, StorageKey,
};
use crate::{Error, Result};

/// Builder for [`SettingsEngine`].
pub struct EngineBuilder {
    schema: Option<SettingsSchema>,
    registry: Option<MigrationRegistry>,
    drivers: Vec<Arc<dyn StorageDriver>>,
    key: StorageKey,
    debounce: Duration,
    retries: u32,
    events: Option<EventSink>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            schema: None,
            registry: None,
            drivers: Vec::new(),
            key: StorageKey::default(),
            debounce: DEFAULT_DEBOUNCE,
            retries: DEFAULT_WRITE_RETRIES,
            events: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `schema` instead of the built-in one.
    pub fn schema(mut self, schema: SettingsSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Use `registry` instead of the built-in one.
    pub fn registry(mut self, registry: MigrationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Append a storage driver. Drivers are tried in the order added.
    pub fn driver(mut self, driver: impl StorageDriver + 'static) -> Self {
        self.drivers.push(Arc::new(driver));
        self
    }

    /// Append a shared storage driver.
    pub fn shared_driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn storage_key(mut self, key: StorageKey) -> Self {
        self.key = key;
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn write_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Share an existing event channel.
    pub fn events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Drivers for a resolved configuration: SQLite (unless disabled), the
    /// key-value directory, then memory.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let mut builder = Self::new()
            .storage_key(config.storage_key().clone())
            .debounce(config.debounce())
            .write_retries(config.write_retries());
        if config.tier1_enabled() {
            builder = builder.driver(SqliteDriver::open(config.sqlite_path()));
        } else {
            builder = builder.driver(SqliteDriver::disabled());
        }
        builder
            .driver(KvFileDriver::new(config.kv_dir()))
            .driver(MemoryDriver::new())
    }

    /// Build the engine in the `Uninitialized` state.
    ///
    /// Runs the migration registry self-check and captures the current tokio
    /// runtime, which debounced saves are spawned on.
    pub fn build(self) -> Result<SettingsEngine> {
        let schema = match self.schema {
            Some(schema) => schema,
            None => builtin_schema()?,
        };
        let registry = self
            .registry
            .unwrap_or_else(|| MigrationRegistry::builtin(&schema));
        registry.self_check()?;

        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let session_id = Uuid::new_v4().to_string();
        let events = self.events.unwrap_or_default();
        let schema = Arc::new(schema);

        let router = Arc::new(DriverRouter::new(self.drivers, events.clone()));
        let io = SafeIo::new(
            router,
            Arc::new(registry),
            Arc::clone(&schema),
            self.key,
            events.clone(),
            self.retries,
            session_id.clone(),
        );

        let document = ConfigurationDocument::factory(&schema);
        debug!(session_id = %session_id, key = %io.key(), "Built settings engine");

        Ok(SettingsEngine {
            inner: Arc::new(EngineInner {
                schema,
                io,
                debouncer: Debouncer::new(handle, self.debounce),
                events,
                session_id,
                state: Mutex::new(EngineState::new(document)),
            }),
        })
    }

    /// Build, then load.
    pub async fn load(self) -> Result<SettingsEngine> {
        let engine = self.build()?;
        engine.load().await?;
        Ok(engine)
    }
}

struct EngineState {
    lifecycle: Lifecycle,
    persistence: PersistenceState,
    document: ConfigurationDocument,
    overrides: SessionOverrides,
    /// Bumped on every persisted-layer mutation
    revision: u64,
    /// Revision of the last document known to be durably stored
    saved_revision: u64,
    /// Revision at which the last load replaced the document
    loaded_revision: u64,
    /// A reload is reading storage; the engine stays `Ready` meanwhile
    reloading: bool,
    outdated_build: bool,
    last_error: Option<String>,
}

impl EngineState {
    fn new(document: ConfigurationDocument) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            persistence: PersistenceState::Clean,
            document,
            overrides: SessionOverrides::new(),
            revision: 0,
            saved_revision: 0,
            loaded_revision: 0,
            reloading: false,
            outdated_build: false,
            last_error: None,
        }
    }

    fn mark_dirty(&mut self) {
        self.document.touch();
        self.revision += 1;
        self.persistence = PersistenceState::Dirty;
    }
}

struct EngineInner {
    schema: Arc<SettingsSchema>,
    io: SafeIo,
    debouncer: Debouncer<StorageKey>,
    events: EventSink,
    session_id: String,
    state: Mutex<EngineState>,
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the reload flag even if the reload future is dropped.
struct ReloadGuard<'a>(&'a EngineInner);

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().reloading = false;
    }
}

/// Handle to a settings engine.
#[derive(Clone)]
pub struct SettingsEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SettingsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SettingsEngine")
            .field("session_id", &self.inner.session_id)
            .field("lifecycle", &state.lifecycle)
            .field("persistence", &state.persistence)
            .finish_non_exhaustive()
    }
}

impl SettingsEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Open an engine on the drivers described by `config` and load it.
    pub async fn open(config: &ResolvedConfig) -> Result<Self> {
        info!(
            data_dir = %config.data_dir().display(),
            key = %config.storage_key(),
            tier1 = config.tier1_enabled(),
            "Opening settings engine"
        );
        EngineBuilder::from_config(config).load().await
    }

    // ==================== Lifecycle ====================

    fn transition(&self, to: Lifecycle) {
        let from = {
            let mut state = self.inner.lock();
            let from = state.lifecycle;
            if from == to {
                return;
            }
            state.lifecycle = to;
            from
        };
        debug!(%from, %to, "Engine lifecycle changed");
        self.inner
            .events
            .emit(EngineEvent::LifecycleChanged { from, to });
    }

    /// Load the stored document: `Loading -> (Migrating) -> Ready`.
    ///
    /// Never fails because of stored data; unusable records yield factory
    /// defaults. Fails only if a load is already in progress.
    ///
    /// On a `Ready` engine this is a reload: the engine stays `Ready` and keeps
    /// serving the current document until the stored one replaces it. Edits
    /// made while the reload reads storage are superseded by what it reads.
    pub async fn load(&self) -> Result<()> {
        let reloading = {
            let mut state = self.inner.lock();
            if state.reloading {
                return Err(Error::InvalidInput(
                    "cannot load while a reload is in progress".to_string(),
                ));
            }
            match state.lifecycle {
                Lifecycle::Ready => {
                    state.reloading = true;
                    true
                }
                current if current.can_transition_to(Lifecycle::Loading) => false,
                other => {
                    return Err(Error::InvalidInput(format!("cannot load while {}", other)));
                }
            }
        };
        let _reload = reloading.then(|| ReloadGuard(self.inner.as_ref()));
        if !reloading {
            self.transition(Lifecycle::Loading);
        }

        let outcome = self
            .inner
            .io
            .load(|| {
                if !reloading {
                    self.transition(Lifecycle::Migrating);
                }
            })
            .await;

        let migrated = outcome.migrated_from.is_some();
        // Persist the upgraded shape, or restore the preferred tier
        let write_back = migrated || outcome.origin.needs_write_back();
        let outdated = matches!(
            outcome.origin,
            LoadOrigin::Recovered(Recovery::NewerVersion { .. })
        );
        self.inner.debouncer.cancel(self.inner.io.key());
        {
            let mut state = self.inner.lock();
            state.document = outcome.document;
            state.outdated_build = outdated;
            state.revision += 1;
            state.saved_revision = state.revision;
            state.loaded_revision = state.revision;
            state.persistence = PersistenceState::Clean;
            state.last_error = None;
            state.reloading = false;
            if write_back {
                state.revision += 1;
                state.persistence = PersistenceState::Dirty;
            }
        }

        match &outcome.origin {
            LoadOrigin::Stored(tier) => info!(%tier, migrated, reloading, "Loaded settings"),
            LoadOrigin::FirstRun => info!("Loaded factory settings"),
            LoadOrigin::Recovered(recovery) => {
                info!(reason = %recovery, "Loaded factory settings after recovery")
            }
            LoadOrigin::Fallback { tier, recovery } => {
                info!(%tier, reason = %recovery, "Loaded settings from a lower tier")
            }
        }

        self.transition(Lifecycle::Ready);
        if write_back {
            self.schedule_save();
        }
        Ok(())
    }

    /// Discard pending saves and load the stored document again.
    ///
    /// Picks up a record written by another instance (last writer wins).
    pub async fn reload(&self) -> Result<()> {
        self.inner.debouncer.cancel(self.inner.io.key());
        self.load().await
    }

    fn ensure_ready(&self, state: &EngineState) -> Result<()> {
        if state.lifecycle == Lifecycle::Ready {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    // ==================== Reads ====================

    /// Effective configuration for `context`.
    ///
    /// An unknown context resolves like an empty one.
    pub fn get_effective(&self, context: &str) -> Result<EffectiveConfiguration> {
        validate_context_name(context)?;
        let state = self.inner.lock();
        self.ensure_ready(&state)?;
        Ok(resolve(
            &self.inner.schema,
            &state.document.base,
            context,
            state.document.context(context),
            &state.overrides,
        ))
    }

    /// Known contexts plus any the document carries, sorted.
    pub fn contexts(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut names: Vec<String> = self
            .inner
            .schema
            .contexts()
            .iter()
            .cloned()
            .chain(state.document.contexts.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Snapshot of the in-memory document.
    pub fn document(&self) -> ConfigurationDocument {
        self.inner.lock().document.clone()
    }

    /// Snapshot of the session overrides.
    pub fn session_overrides(&self) -> SessionOverrides {
        self.inner.lock().overrides.clone()
    }

    pub fn schema(&self) -> &SettingsSchema {
        &self.inner.schema
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the engine state. Never touches storage.
    pub fn status(&self) -> EngineStatus {
        let router = self.inner.io.router();
        let storage_tier = router.active_tier();
        let storage_location = router.active_location();
        let degraded = router.is_degraded();

        let state = self.inner.lock();
        EngineStatus {
            lifecycle: state.lifecycle,
            persistence: state.persistence,
            unsaved_changes: state.revision != state.saved_revision,
            outdated_build: state.outdated_build,
            degraded,
            storage_tier,
            storage_location,
            schema_version: state.document.schema_version,
            updated_at: state.document.updated_at,
            session_id: self.inner.session_id.clone(),
            session_overrides: state.overrides.len(),
            last_error: state.last_error.clone(),
        }
    }

    // ==================== Persisted mutations ====================

    fn validated(&self, path: &str, value: SettingValue) -> Result<(FieldPath, SettingValue)> {
        let path = FieldPath::parse(path)?;
        let value = self.inner.schema.validate_value(path.as_str(), &value)?;
        Ok((path, value))
    }

    /// Apply `edit` to the document; schedule a save if it changed anything.
    fn mutate(&self, edit: impl FnOnce(&mut ConfigurationDocument) -> bool) -> Result<bool> {
        let changed = {
            let mut state = self.inner.lock();
            self.ensure_ready(&state)?;
            let changed = edit(&mut state.document);
            if changed {
                state.mark_dirty();
            }
            changed
        };
        if changed {
            self.schedule_save();
        }
        Ok(changed)
    }

    /// Set a field in the base layer.
    pub fn set_base_field(&self, path: &str, value: impl Into<SettingValue>) -> Result<()> {
        let (path, value) = self.validated(path, value.into())?;
        self.mutate(|doc| doc.base.set(path, value.clone()).as_ref() != Some(&value))?;
        Ok(())
    }

    /// Set a field in a context layer, creating the layer if needed.
    pub fn set_context_field(
        &self,
        context: &str,
        path: &str,
        value: impl Into<SettingValue>,
    ) -> Result<()> {
        validate_context_name(context)?;
        let (path, value) = self.validated(path, value.into())?;
        self.mutate(|doc| {
            doc.context_mut(context).set(path, value.clone()).as_ref() != Some(&value)
        })?;
        Ok(())
    }

    /// Remove a field from the base layer. Returns whether it was present.
    pub fn remove_base_field(&self, path: &str) -> Result<bool> {
        self.mutate(|doc| doc.base.remove(path).is_some())
    }

    /// Remove a field from a context layer. Returns whether it was present.
    pub fn remove_context_field(&self, context: &str, path: &str) -> Result<bool> {
        validate_context_name(context)?;
        self.mutate(|doc| {
            doc.contexts
                .get_mut(context)
                .is_some_and(|layer| layer.remove(path).is_some())
        })
    }

    /// Replace base and contexts with factory defaults and write immediately.
    ///
    /// Session overrides are kept. A pending debounced save is cancelled. This
    /// also clears the outdated-build state, overwriting a newer stored
    /// document.
    pub async fn reset_to_factory_defaults(&self) -> Result<()> {
        self.inner.debouncer.cancel(self.inner.io.key());
        {
            let mut state = self.inner.lock();
            self.ensure_ready(&state)?;
            let mut factory = ConfigurationDocument::factory(&self.inner.schema);
            factory.updated_at = state.document.updated_at;
            state.document = factory;
            state.outdated_build = false;
            state.mark_dirty();
        }
        info!("Reset settings to factory defaults");
        self.inner.events.emit(EngineEvent::Reset);
        self.save_now().await;
        Ok(())
    }

    // ==================== Session overrides ====================

    /// Set a session override: a value, or [`OverrideValue::Unset`] to force
    /// the field back to its base value. Never persisted.
    pub fn set_session_override(&self, path: &str, value: impl Into<OverrideValue>) -> Result<()> {
        let path = FieldPath::parse(path)?;
        let value = match value.into() {
            OverrideValue::Value(v) => {
                OverrideValue::Value(self.inner.schema.validate_value(path.as_str(), &v)?)
            }
            OverrideValue::Unset => {
                if self.inner.schema.spec(path.as_str()).is_none() {
                    return Err(Error::UnknownField(path.to_string()));
                }
                OverrideValue::Unset
            }
        };

        let mut state = self.inner.lock();
        self.ensure_ready(&state)?;
        state.overrides.set(path, value);
        Ok(())
    }

    /// Force `path` back to its base value for this session.
    pub fn unset_session_override(&self, path: &str) -> Result<()> {
        self.set_session_override(path, OverrideValue::Unset)
    }

    /// Drop the session override for `path`. Returns whether one existed.
    pub fn clear_session_override(&self, path: &str) -> Result<bool> {
        let mut state = self.inner.lock();
        self.ensure_ready(&state)?;
        Ok(state.overrides.remove(path).is_some())
    }

    /// Drop every session override.
    pub fn clear_session_overrides(&self) {
        self.inner.lock().overrides.clear();
    }

    // ==================== Persistence ====================

    fn schedule_save(&self) {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        self.inner
            .debouncer
            .schedule(self.inner.io.key().clone(), move || async move {
                if let Some(inner) = weak.upgrade() {
                    SettingsEngine { inner }.save_now().await;
                }
            });
    }

    /// Write the current document now, recording the outcome in the state.
    async fn save_now(&self) {
        let (document, revision) = {
            let mut state = self.inner.lock();
            if state.lifecycle != Lifecycle::Ready {
                return;
            }
            if state.outdated_build {
                debug!("Save suppressed: stored settings come from a newer build");
                return;
            }
            if state.reloading {
                debug!("Save suppressed: reload in progress");
                return;
            }
            state.persistence = PersistenceState::Saving;
            (state.document.clone(), state.revision)
        };

        let result = self.inner.io.save(&document).await;

        let mut state = self.inner.lock();
        match result {
            _ if revision < state.loaded_revision => {
                debug!("Save finished after a load replaced the document");
            }
            Ok(receipt) => {
                // The checksum describes the written revision only
                if state.revision == revision {
                    state.document.checksum = receipt.checksum;
                }
                state.document.updated_at = state.document.updated_at.max(receipt.updated_at);
                state.saved_revision = state.saved_revision.max(revision);
                state.last_error = None;
                state.persistence = if state.revision == revision {
                    PersistenceState::Clean
                } else {
                    PersistenceState::Dirty
                };
            }
            Err(failure) => {
                warn!(error = %failure, "Settings remain unsaved");
                state.last_error = Some(failure.to_string());
                state.persistence = PersistenceState::SaveFailed;
            }
        }
    }

    /// Write pending changes now instead of waiting for the debounce window.
    ///
    /// Returns the write failure, if the final attempt failed. Does nothing in
    /// the outdated-build state.
    pub async fn flush(&self) -> Result<()> {
        let cancelled = self.inner.debouncer.cancel(self.inner.io.key());
        let needs_save = {
            let state = self.inner.lock();
            self.ensure_ready(&state)?;
            !state.outdated_build && (cancelled || state.revision != state.saved_revision)
        };
        if needs_save {
            self.save_now().await;
        }

        let state = self.inner.lock();
        match (&state.persistence, &state.last_error) {
            (PersistenceState::SaveFailed, Some(reason)) => {
                Err(Error::StorageUnavailable(reason.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Whether a debounced save is waiting for its window to elapse.
    pub fn has_pending_save(&self) -> bool {
        self.inner.debouncer.is_pending(self.inner.io.key())
    }
}
