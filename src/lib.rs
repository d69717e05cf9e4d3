//! Ballast - layered settings with versioned, corruption-resistant persistence.
//!
//! This library resolves a tool's active configuration from layered inputs
//! (base defaults, per-context layers, session overrides) and persists the
//! layers through a tiered storage stack with schema migration.
//!
//! The entry point is [`SettingsEngine`]:
//!
//! ```no_run
//! # async fn demo() -> ballast::Result<()> {
//! use ballast::config::{ConfigOverrides, resolve_config};
//! use ballast::SettingsEngine;
//!
//! let config = resolve_config(&ConfigOverrides::default())?;
//! let engine = SettingsEngine::open(&config).await?;
//!
//! engine.set_context_field("normal", "gridSpacing", 10)?;
//! let effective = engine.get_effective("normal")?;
//! assert_eq!(effective.get_integer("gridSpacing"), Some(10));
//!
//! engine.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod events;
pub mod logging;
pub mod migration;
pub mod models;
pub mod safe_io;
pub mod settings;
pub mod storage;

pub use engine::{EngineBuilder, EngineStatus, Lifecycle, PersistenceState, SettingsEngine};
pub use events::{EngineEvent, EventSink};
pub use models::ConfigurationDocument;
pub use settings::{
    EffectiveConfiguration, FieldPath, LayerSource, OverrideValue, SettingValue, SettingsSchema,
    ValueKind,
};


/// Library-level error type for Ballast operations.
///
/// Problems with stored data never surface here; they are recovered and
/// reported through [`EngineEvent`]s and [`EngineStatus`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("KDL error: {0}")]
    Kdl(String),

    #[error("Migration registry error: {0}")]
    Migration(#[from] migration::MigrationError),

    #[error("Engine is not ready: call `load` first")]
    NotReady,

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("No tokio runtime: build the engine from within a runtime")]
    NoRuntime,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Ballast operations.
pub type Result<T> = std::result::Result<T, Error>;
