//! Engine configuration.
//!
//! This configures the engine itself (where records live, how saves are
//! paced), not the settings it manages.
//!
//! ## config.kdl
//!
//! Located at `$BALLAST_CONFIG_DIR/config.kdl`, else `~/.config/ballast/config.kdl`.
//!
//! Contains:
//! - `data-dir` - Directory for `settings.db` and the `kv/` store
//! - `storage-key` - Key of the settings record (`ballast.` namespace)
//! - `debounce-ms` - Save debounce window
//! - `write-retries` - Immediate retries after a failed write
//! - `tier1` - Whether the SQLite tier may be used
//! - `log-format` - "text" or "json"
//!
//! ## Precedence
//!
//! Host overrides > environment variables > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CONFIG_DIR_ENV, ConfigOverrides, DATA_DIR_ENV, DEBOUNCE_MS_ENV, DISABLE_TIER1_ENV, Resolved,
    ResolvedConfig, ValueSource, WRITE_RETRIES_ENV, config_dir, default_data_dir, resolve_config,
    resolve_layers,
};
pub use schema::EngineConfig;
