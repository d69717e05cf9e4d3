//! Storage driver trait and the types shared by all drivers.

use serde::Serialize;

use crate::Result;
use crate::models::StorageRecord;
use crate::storage::StorageKey;

/// Result of a driver's capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Driver can read and write.
    Available,
    /// Driver cannot be used; the reason is logged once.
    Unavailable(String),
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Storage tiers, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Structured store (SQLite database)
    Structured,
    /// Flat key-value store (one JSON file per key)
    Flat,
    /// In-memory only; nothing survives the process
    Ephemeral,
}

impl Tier {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Flat => "flat",
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Whether records written to this tier survive a restart.
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Ephemeral)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persistence driver holding whole records under string keys.
///
/// Reads and writes are blocking; callers on an async runtime run them on the
/// blocking pool. A write replaces the record atomically: after a crash the
/// key holds either the old or the new record, never a mix.
pub trait StorageDriver: Send + Sync {
    /// Probe whether the driver can be used. Must not mutate stored records.
    fn capability_check(&self) -> Capability;

    /// Read the record stored under `key`. `Ok(None)` if the key was never written.
    fn read(&self, key: &StorageKey) -> Result<Option<StorageRecord>>;

    /// Atomically replace the record stored under `key`.
    fn write(&self, key: &StorageKey, record: &StorageRecord) -> Result<()>;

    /// Tier this driver serves.
    fn tier(&self) -> Tier;

    /// Get the storage location description (for display purposes).
    fn location(&self) -> String;

    /// Get the driver type name.
    fn driver_type(&self) -> &'static str;
}
