//! KDL schema for the engine's config.kdl.
//!
//! This module provides:
//! - The Rust struct representing the file
//! - Serialization/deserialization to/from KDL format
//! - Validation and merging

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::LogFormat;
use crate::storage::StorageKey;
use crate::{Error, Result};

/// Upper bound for the debounce window, in milliseconds.
pub const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Upper bound for write retries.
pub const MAX_WRITE_RETRIES: u32 = 10;

/// Engine tuning stored in config.kdl.
///
/// Every value is optional; unset values fall through to the next source.
///
/// # KDL Schema
///
/// ```kdl
/// data-dir "/var/lib/app/settings"
/// storage-key "ballast.settings.v1"
/// debounce-ms 400
/// write-retries 1
/// tier1 #true
/// log-format "json"  // or "text"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding settings.db and the kv/ directory
    pub data_dir: Option<PathBuf>,

    /// Storage key of the settings record
    pub storage_key: Option<String>,

    /// Debounce window for saves, in milliseconds
    pub debounce_ms: Option<u64>,

    /// Immediate retries after a failed write
    pub write_retries: Option<u32>,

    /// Whether the structured (SQLite) tier may be used
    pub tier1: Option<bool>,

    /// Log output format
    pub log_format: Option<LogFormat>,
}

impl EngineConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ms) = self.debounce_ms {
            if ms > MAX_DEBOUNCE_MS {
                return Err(format!(
                    "debounce-ms must be at most {}, got {}",
                    MAX_DEBOUNCE_MS, ms
                ));
            }
        }
        if let Some(retries) = self.write_retries {
            if retries > MAX_WRITE_RETRIES {
                return Err(format!(
                    "write-retries must be at most {}, got {}",
                    MAX_WRITE_RETRIES, retries
                ));
            }
        }
        if let Some(ref key) = self.storage_key {
            StorageKey::new(key.as_str()).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown nodes and values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = first_string(doc, "data-dir") {
            config.data_dir = Some(PathBuf::from(s));
        }

        if let Some(s) = first_string(doc, "storage-key") {
            config.storage_key = Some(s.to_string());
        }

        if let Some(i) = first_value(doc, "debounce-ms").and_then(|v| v.as_integer()) {
            if let Ok(ms) = u64::try_from(i) {
                config.debounce_ms = Some(ms);
            }
        }

        if let Some(i) = first_value(doc, "write-retries").and_then(|v| v.as_integer()) {
            if let Ok(retries) = u32::try_from(i) {
                config.write_retries = Some(retries);
            }
        }

        if let Some(b) = first_value(doc, "tier1").and_then(|v| v.as_bool()) {
            config.tier1 = Some(b);
        }

        if let Some(s) = first_string(doc, "log-format") {
            config.log_format = LogFormat::parse(s);
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref dir) = self.data_dir {
            push_node(
                &mut doc,
                "data-dir",
                KdlValue::String(dir.display().to_string()),
            );
        }

        if let Some(ref key) = self.storage_key {
            push_node(&mut doc, "storage-key", KdlValue::String(key.clone()));
        }

        if let Some(ms) = self.debounce_ms {
            push_node(&mut doc, "debounce-ms", KdlValue::Integer(ms as i128));
        }

        if let Some(retries) = self.write_retries {
            push_node(&mut doc, "write-retries", KdlValue::Integer(retries as i128));
        }

        if let Some(enabled) = self.tier1 {
            push_node(&mut doc, "tier1", KdlValue::Bool(enabled));
        }

        if let Some(format) = self.log_format {
            push_node(
                &mut doc,
                "log-format",
                KdlValue::String(format.as_str().to_string()),
            );
        }

        doc
    }

    /// Read config.kdl at `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Other(format!("Failed to read {}: {}", path.display(), e)))?;

        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Kdl(format!("Failed to parse KDL in {}: {}", path.display(), e)))?;

        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Write config.kdl to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &EngineConfig) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir.clone();
        }
        if other.storage_key.is_some() {
            self.storage_key = other.storage_key.clone();
        }
        if other.debounce_ms.is_some() {
            self.debounce_ms = other.debounce_ms;
        }
        if other.write_retries.is_some() {
            self.write_retries = other.write_retries;
        }
        if other.tier1.is_some() {
            self.tier1 = other.tier1;
        }
        if other.log_format.is_some() {
            self.log_format = other.log_format;
        }
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn first_string<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a str> {
    first_value(doc, name).and_then(|v| v.as_string())
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}
