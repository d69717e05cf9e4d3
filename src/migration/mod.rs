//! Schema & migration registry.
//!
//! Documents are migrated as raw JSON: older shapes do not have a Rust type.
//! The registry holds, per schema version, a shape check, and per version
//! `N`, exactly one pure step `N -> N+1`. [`MigrationRegistry::self_check`]
//! verifies the chain is contiguous from version 1 to the current version and
//! runs when the engine is built, never during a document load.

pub mod legacy;

use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{CURRENT_SCHEMA_VERSION, ConfigurationDocument, LEGACY_SCHEMA_VERSION};
use crate::settings::SettingsSchema;

/// Migration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("document schema version {found} is newer than supported version {supported}")]
    NewerThanEngine { found: u32, supported: u32 },

    #[error("migration step {from} -> {to} failed: {reason}")]
    StepFailed { from: u32, to: u32, reason: String },

    #[error("migration step {from} -> {to} panicked")]
    StepPanicked { from: u32, to: u32 },

    #[error("no migration step registered from version {from}")]
    MissingStep { from: u32 },

    #[error("a migration step from version {from} is already registered")]
    DuplicateStep { from: u32 },

    #[error("migration step from version {from} is outside the chain 1..{current}")]
    UnexpectedStep { from: u32, current: u32 },

    #[error("no shape check registered for version {version}")]
    MissingShape { version: u32 },

    #[error("document does not match schema version {version}: {reason}")]
    InvalidShape { version: u32, reason: String },

    #[error("schema version must be a positive integer, got {0}")]
    InvalidVersion(String),

    #[error("document is not a JSON object")]
    NotAnObject,
}

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

type StepFn = dyn Fn(Value) -> MigrationResult<Value> + Send + Sync;
type ShapeFn = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// A pure upgrade from version `from` to `from + 1`.
pub struct MigrationStep {
    from: u32,
    description: String,
    apply: Box<StepFn>,
}

impl MigrationStep {
    /// Source version
    pub fn from_version(&self) -> u32 {
        self.from
    }

    /// Target version
    pub fn to_version(&self) -> u32 {
        self.from + 1
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("description", &self.description)
            .finish()
    }
}

/// Ordered, integer-keyed registry of shape checks and migration steps.
pub struct MigrationRegistry {
    current: u32,
    steps: BTreeMap<u32, MigrationStep>,
    shapes: BTreeMap<u32, Box<ShapeFn>>,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("current", &self.current)
            .field("steps", &self.steps.values().collect::<Vec<_>>())
            .field("shapes", &self.shapes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationRegistry {
    /// Create an empty registry targeting `current`.
    pub fn new(current: u32) -> Self {
        Self {
            current,
            steps: BTreeMap::new(),
            shapes: BTreeMap::new(),
        }
    }

    /// Registry for this build: legacy flat shape (v1), layered shape (v2),
    /// and the legacy reshaping step between them.
    pub fn builtin(schema: &SettingsSchema) -> Self {
        let contexts = schema.contexts().to_vec();
        let mut registry = Self::new(CURRENT_SCHEMA_VERSION);
        registry.register_shape(LEGACY_SCHEMA_VERSION, legacy_shape);
        registry.register_shape(CURRENT_SCHEMA_VERSION, layered_shape);
        registry.steps.insert(
            LEGACY_SCHEMA_VERSION,
            MigrationStep {
                from: LEGACY_SCHEMA_VERSION,
                description: "reshape flat settings into base and context layers".to_string(),
                apply: Box::new(move |value| legacy::flat_to_layered(value, &contexts)),
            },
        );
        registry
    }

    /// Current (target) schema version.
    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Register the step `from -> from + 1`. Exactly one step per version.
    pub fn register_step<F>(
        &mut self,
        from: u32,
        description: impl Into<String>,
        apply: F,
    ) -> MigrationResult<()>
    where
        F: Fn(Value) -> MigrationResult<Value> + Send + Sync + 'static,
    {
        if self.steps.contains_key(&from) {
            return Err(MigrationError::DuplicateStep { from });
        }
        self.steps.insert(
            from,
            MigrationStep {
                from,
                description: description.into(),
                apply: Box::new(apply),
            },
        );
        Ok(())
    }

    /// Register (or replace) the shape check for `version`.
    pub fn register_shape<F>(&mut self, version: u32, check: F)
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.shapes.insert(version, Box::new(check));
    }

    /// Registered steps in version order.
    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.values()
    }

    /// Verify the chain: one step for every version in `1..current`, no step
    /// outside it, and a shape check for every version in `1..=current`.
    pub fn self_check(&self) -> MigrationResult<()> {
        for from in 1..self.current {
            if !self.steps.contains_key(&from) {
                return Err(MigrationError::MissingStep { from });
            }
        }
        if let Some(&from) = self
            .steps
            .keys()
            .find(|&&from| from == 0 || from >= self.current)
        {
            return Err(MigrationError::UnexpectedStep {
                from,
                current: self.current,
            });
        }
        for version in 1..=self.current {
            if !self.shapes.contains_key(&version) {
                return Err(MigrationError::MissingShape { version });
            }
        }
        Ok(())
    }

    /// Declared schema version of a raw document. Missing means legacy (1).
    pub fn detect_version(value: &Value) -> MigrationResult<u32> {
        let obj = value.as_object().ok_or(MigrationError::NotAnObject)?;
        match obj.get("schemaVersion") {
            None => Ok(LEGACY_SCHEMA_VERSION),
            Some(v) => v
                .as_u64()
                .filter(|&n| n >= 1 && n <= u32::MAX as u64)
                .map(|n| n as u32)
                .ok_or_else(|| MigrationError::InvalidVersion(v.to_string())),
        }
    }

    /// Run the shape check registered for `version`.
    pub fn validate_shape(&self, version: u32, value: &Value) -> MigrationResult<()> {
        let check = self
            .shapes
            .get(&version)
            .ok_or(MigrationError::MissingShape { version })?;
        check(value).map_err(|reason| MigrationError::InvalidShape { version, reason })
    }

    /// Walk the chain from the document's declared version to the current one.
    ///
    /// The shape of the declared version is checked first and the current
    /// shape is checked at the end. `schemaVersion` is stamped after every
    /// step. A document newer than the engine is rejected, never downgraded.
    pub fn migrate(&self, value: Value) -> MigrationResult<Value> {
        let mut version = Self::detect_version(&value)?;
        if version > self.current {
            return Err(MigrationError::NewerThanEngine {
                found: version,
                supported: self.current,
            });
        }
        self.validate_shape(version, &value)?;

        let start = version;
        let mut value = value;
        while version < self.current {
            let step = self
                .steps
                .get(&version)
                .ok_or(MigrationError::MissingStep { from: version })?;
            let to = step.to_version();
            debug!(from = version, to, step = %step.description, "Applying migration step");

            let input = value;
            value = match catch_unwind(AssertUnwindSafe(|| (step.apply)(input))) {
                Ok(Ok(next)) => next,
                Ok(Err(MigrationError::StepFailed { reason, .. })) => {
                    return Err(MigrationError::StepFailed {
                        from: version,
                        to,
                        reason,
                    });
                }
                Ok(Err(other)) => {
                    return Err(MigrationError::StepFailed {
                        from: version,
                        to,
                        reason: other.to_string(),
                    });
                }
                Err(_) => return Err(MigrationError::StepPanicked { from: version, to }),
            };

            let obj = value.as_object_mut().ok_or(MigrationError::NotAnObject)?;
            obj.insert("schemaVersion".to_string(), Value::from(to));
            version = to;
        }

        if start != version {
            self.validate_shape(version, &value)?;
            info!(from = start, to = version, "Migrated settings document");
        }
        Ok(value)
    }

    /// Typed convenience: migrate an in-memory document through JSON.
    pub fn migrate_document(
        &self,
        document: &ConfigurationDocument,
    ) -> MigrationResult<ConfigurationDocument> {
        let value = serde_json::to_value(document).map_err(|e| MigrationError::InvalidShape {
            version: document.schema_version,
            reason: e.to_string(),
        })?;
        let migrated = self.migrate(value)?;
        serde_json::from_value(migrated).map_err(|e| MigrationError::InvalidShape {
            version: self.current,
            reason: e.to_string(),
        })
    }
}

/// Version 1: any JSON object.
fn legacy_shape(value: &Value) -> Result<(), String> {
    if value.is_object() {
        Ok(())
    } else {
        Err("expected an object".to_string())
    }
}

/// Version 2: `base` object, optional `contexts` object of objects,
/// optional string `checksum`, optional non-negative integer `updatedAt`.
fn layered_shape(value: &Value) -> Result<(), String> {
    let obj = value.as_object().ok_or("expected an object")?;

    match obj.get("base") {
        Some(Value::Object(_)) => {}
        Some(_) => return Err("`base` must be an object".to_string()),
        None => return Err("missing required field `base`".to_string()),
    }

    match obj.get("contexts") {
        None => {}
        Some(Value::Object(contexts)) => {
            if let Some((name, _)) = contexts.iter().find(|(_, layer)| !layer.is_object()) {
                return Err(format!("context `{}` must be an object", name));
            }
        }
        Some(_) => return Err("`contexts` must be an object".to_string()),
    }

    if let Some(checksum) = obj.get("checksum") {
        if !checksum.is_string() {
            return Err("`checksum` must be a string".to_string());
        }
    }
    if let Some(updated_at) = obj.get("updatedAt") {
        if updated_at.as_u64().is_none() {
            return Err("`updatedAt` must be a non-negative integer".to_string());
        }
    }
    Ok(())
}
