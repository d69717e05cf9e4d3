//! Flat tier: one JSON file per storage key.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::models::StorageRecord;
use crate::storage::{Capability, StorageDriver, StorageKey, Tier};
use crate::{Error, Result};

const PROBE_FILE: &str = ".ballast-probe";

/// Key-value store writing `<dir>/<key>.json`.
pub struct KvFileDriver {
    dir: PathBuf,
}

impl KvFileDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn record_path(&self, key: &StorageKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    /// Write `content` to `path` atomically.
    ///
    /// The bytes go to a temporary file in the same directory, are synced,
    /// then renamed over the target.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        debug!(path = ?path, "Writing file atomically");
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn probe(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let probe = self.dir.join(PROBE_FILE);
        self.write_atomic(&probe, b"probe")?;
        fs::remove_file(&probe)?;
        Ok(())
    }
}

impl StorageDriver for KvFileDriver {
    fn capability_check(&self) -> Capability {
        match self.probe() {
            Ok(()) => Capability::Available,
            Err(e) => Capability::Unavailable(format!("{}: {}", self.dir.display(), e)),
        }
    }

    fn read(&self, key: &StorageKey) -> Result<Option<StorageRecord>> {
        let path = self.record_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Damaged content, not a failing driver
                warn!(path = ?path, error = %e, "Settings file has no readable envelope");
                Ok(Some(StorageRecord::unsealed(content)))
            }
        }
    }

    fn write(&self, key: &StorageKey, record: &StorageRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&self.record_path(key), &bytes)
    }

    fn tier(&self) -> Tier {
        Tier::Flat
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn driver_type(&self) -> &'static str {
        "kv-file"
    }
}
