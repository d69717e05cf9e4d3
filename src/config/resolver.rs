//! Precedence resolution for engine configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Host overrides (passed at runtime)
//! 2. Environment variables (`BALLAST_*`)
//! 3. config.kdl (`$BALLAST_CONFIG_DIR/config.kdl` or `~/.config/ballast/config.kdl`)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::logging::LogFormat;
use crate::safe_io::{DEFAULT_DEBOUNCE, DEFAULT_WRITE_RETRIES};
use crate::storage::StorageKey;
use crate::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "BALLAST_DATA_DIR";
/// Environment variable overriding the directory holding config.kdl.
pub const CONFIG_DIR_ENV: &str = "BALLAST_CONFIG_DIR";
/// Environment variable overriding the debounce window (milliseconds).
pub const DEBOUNCE_MS_ENV: &str = "BALLAST_DEBOUNCE_MS";
/// Environment variable overriding the write retry count.
pub const WRITE_RETRIES_ENV: &str = "BALLAST_WRITE_RETRIES";
/// Environment variable that disables the structured tier when truthy.
pub const DISABLE_TIER1_ENV: &str = "BALLAST_DISABLE_TIER1";

/// File name of the SQLite database inside the data directory.
pub const DATABASE_FILE: &str = "settings.db";
/// Directory of the flat key-value store inside the data directory.
pub const KV_DIR: &str = "kv";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value passed by the host at runtime
    Override,
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config.kdl file
    ConfigFile(PathBuf),
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Override => write!(f, "override"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile(path) => write!(f, "file:{}", path.display()),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved engine configuration with source tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Directory holding the database and the kv store
    pub data_dir: Resolved<PathBuf>,
    /// Storage key of the settings record
    pub storage_key: Resolved<StorageKey>,
    /// Debounce window for saves
    pub debounce: Resolved<Duration>,
    /// Immediate retries after a failed write
    pub write_retries: Resolved<u32>,
    /// Whether the structured tier may be used
    pub tier1_enabled: Resolved<bool>,
    /// Log output format
    pub log_format: Resolved<LogFormat>,
}

impl ResolvedConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Resolved::new(data_dir.into(), ValueSource::Default),
            storage_key: Resolved::new(StorageKey::default(), ValueSource::Default),
            debounce: Resolved::new(DEFAULT_DEBOUNCE, ValueSource::Default),
            write_retries: Resolved::new(DEFAULT_WRITE_RETRIES, ValueSource::Default),
            tier1_enabled: Resolved::new(true, ValueSource::Default),
            log_format: Resolved::new(LogFormat::default(), ValueSource::Default),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir.value
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.storage_key.value
    }

    pub fn debounce(&self) -> Duration {
        self.debounce.value
    }

    pub fn write_retries(&self) -> u32 {
        self.write_retries.value
    }

    pub fn tier1_enabled(&self) -> bool {
        self.tier1_enabled.value
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format.value
    }

    /// Path of the SQLite database.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.value.join(DATABASE_FILE)
    }

    /// Directory of the flat key-value store.
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.value.join(KV_DIR)
    }
}

/// Host overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub storage_key: Option<String>,
    pub debounce_ms: Option<u64>,
    pub write_retries: Option<u32>,
    pub tier1: Option<bool>,
    pub log_format: Option<LogFormat>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = Some(ms);
        self
    }

    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = Some(retries);
        self
    }

    pub fn with_tier1(mut self, enabled: bool) -> Self {
        self.tier1 = Some(enabled);
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    fn as_config(&self) -> EngineConfig {
        EngineConfig {
            data_dir: self.data_dir.clone(),
            storage_key: self.storage_key.clone(),
            debounce_ms: self.debounce_ms,
            write_retries: self.write_retries,
            tier1: self.tier1,
            log_format: self.log_format,
        }
    }
}

/// Directory holding config.kdl: `$BALLAST_CONFIG_DIR`, else `<config dir>/ballast`.
pub fn config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("ballast")),
    }
}

/// Default data directory: `<data dir>/ballast`.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("ballast"))
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))
}

/// Read the `BALLAST_*` environment variables into a config layer.
///
/// Set but unparseable values are an error rather than silently ignored.
fn env_config() -> Result<EngineConfig> {
    let mut config = EngineConfig::new();

    if let Some(dir) = env_value(DATA_DIR_ENV) {
        config.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(ms) = env_value(DEBOUNCE_MS_ENV) {
        config.debounce_ms = Some(ms.parse().map_err(|_| {
            Error::InvalidInput(format!("{} must be an integer, got {:?}", DEBOUNCE_MS_ENV, ms))
        })?);
    }
    if let Some(retries) = env_value(WRITE_RETRIES_ENV) {
        config.write_retries = Some(retries.parse().map_err(|_| {
            Error::InvalidInput(format!(
                "{} must be an integer, got {:?}",
                WRITE_RETRIES_ENV, retries
            ))
        })?);
    }
    if let Some(flag) = env_value(DISABLE_TIER1_ENV) {
        let disabled = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        config.tier1 = Some(!disabled);
    }

    config.validate().map_err(Error::InvalidInput)?;
    Ok(config)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolve configuration with full precedence chain.
///
/// Precedence (highest to lowest):
/// 1. Host overrides (from `overrides`)
/// 2. Environment variables
/// 3. config.kdl in [`config_dir`]
/// 4. Built-in defaults
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let file = config_dir().map(|dir| dir.join("config.kdl"));
    let file_config = match &file {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::new(),
    };
    resolve_layers(overrides, &env_config()?, file.as_deref(), &file_config)
}

/// Resolve from explicit layers. Does not touch the environment or the filesystem.
pub fn resolve_layers(
    overrides: &ConfigOverrides,
    env: &EngineConfig,
    file_path: Option<&Path>,
    file: &EngineConfig,
) -> Result<ResolvedConfig> {
    let overrides = overrides.as_config();
    overrides.validate().map_err(Error::InvalidInput)?;

    let file_source = || {
        ValueSource::ConfigFile(file_path.map(Path::to_path_buf).unwrap_or_default())
    };
    let env_source = |name: &str| ValueSource::EnvVar(name.to_string());

    let data_dir = if let Some(ref dir) = overrides.data_dir {
        Resolved::new(dir.clone(), ValueSource::Override)
    } else if let Some(ref dir) = env.data_dir {
        Resolved::new(dir.clone(), env_source(DATA_DIR_ENV))
    } else if let Some(ref dir) = file.data_dir {
        Resolved::new(dir.clone(), file_source())
    } else {
        Resolved::new(default_data_dir()?, ValueSource::Default)
    };

    let mut result = ResolvedConfig::with_data_dir(data_dir.value.clone());
    result.data_dir = data_dir;

    // Resolve storage key (no env var)
    if let Some(ref key) = overrides.storage_key {
        result.storage_key = Resolved::new(StorageKey::new(key.as_str())?, ValueSource::Override);
    } else if let Some(ref key) = file.storage_key {
        result.storage_key = Resolved::new(StorageKey::new(key.as_str())?, file_source());
    }
    // else: remains Default (ballast.settings.v1)

    // Resolve debounce
    if let Some(ms) = overrides.debounce_ms {
        result.debounce = Resolved::new(Duration::from_millis(ms), ValueSource::Override);
    } else if let Some(ms) = env.debounce_ms {
        result.debounce = Resolved::new(Duration::from_millis(ms), env_source(DEBOUNCE_MS_ENV));
    } else if let Some(ms) = file.debounce_ms {
        result.debounce = Resolved::new(Duration::from_millis(ms), file_source());
    }

    // Resolve write retries
    if let Some(retries) = overrides.write_retries {
        result.write_retries = Resolved::new(retries, ValueSource::Override);
    } else if let Some(retries) = env.write_retries {
        result.write_retries = Resolved::new(retries, env_source(WRITE_RETRIES_ENV));
    } else if let Some(retries) = file.write_retries {
        result.write_retries = Resolved::new(retries, file_source());
    }

    // Resolve tier1
    if let Some(enabled) = overrides.tier1 {
        result.tier1_enabled = Resolved::new(enabled, ValueSource::Override);
    } else if let Some(enabled) = env.tier1 {
        result.tier1_enabled = Resolved::new(enabled, env_source(DISABLE_TIER1_ENV));
    } else if let Some(enabled) = file.tier1 {
        result.tier1_enabled = Resolved::new(enabled, file_source());
    }

    // Resolve log format (no env var; RUST_LOG covers filtering)
    if let Some(format) = overrides.log_format {
        result.log_format = Resolved::new(format, ValueSource::Override);
    } else if let Some(format) = file.log_format {
        result.log_format = Resolved::new(format, file_source());
    }

    Ok(result)
}
