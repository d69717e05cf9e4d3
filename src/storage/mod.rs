//! Storage layer for settings records.
//!
//! ## Drivers
//!
//! Records are kept by one of three tiers, tried in order:
//!
//! - **Structured** ([`SqliteDriver`]): a `settings_records` table in `settings.db`
//! - **Flat** ([`KvFileDriver`]): one `<key>.json` file per key
//! - **Ephemeral** ([`MemoryDriver`]): process memory, always available
//!
//! [`DriverRouter`] probes each driver once, picks the first usable one and
//! demotes to the next tier when a driver fails mid-session.

pub mod backend;
pub mod kv_file;
pub mod memory;
pub mod router;
pub mod sqlite;

pub use backend::{Capability, StorageDriver, Tier};
pub use kv_file::KvFileDriver;
pub use memory::{FailurePolicy, MemoryDriver};
pub use router::DriverRouter;
pub use sqlite::SqliteDriver;

use crate::{Error, Result};

/// Namespace every storage key lives under.
pub const KEY_NAMESPACE: &str = "ballast.";

/// Key of the settings record unless configured otherwise.
pub const DEFAULT_STORAGE_KEY: &str = "ballast.settings.v1";

/// Suffix of the key a corrupt record is copied to before it is replaced.
pub const QUARANTINE_SUFFIX: &str = ".quarantine";

/// A storage key inside the engine's namespace.
///
/// Keys are `ballast.` followed by ASCII letters, digits, `.`, `_` or `-`,
/// which keeps them valid as SQLite values and as file names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Validate and wrap a key.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let Some(rest) = key.strip_prefix(KEY_NAMESPACE) else {
            return Err(Error::InvalidInput(format!(
                "storage key `{}` must start with `{}`",
                key, KEY_NAMESPACE
            )));
        };
        if rest.is_empty() {
            return Err(Error::InvalidInput(format!(
                "storage key `{}` has no name after the namespace",
                key
            )));
        }
        if let Some(c) = rest
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(Error::InvalidInput(format!(
                "storage key `{}` contains invalid character {:?}",
                key, c
            )));
        }
        Ok(Self(key))
    }

    /// Key a corrupt record under this key is preserved at.
    pub fn quarantine(&self) -> StorageKey {
        StorageKey(format!("{}{}", self.0, QUARANTINE_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StorageKey {
    fn default() -> Self {
        Self(DEFAULT_STORAGE_KEY.to_string())
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for StorageKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
