//! The persisted configuration document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;
use crate::safe_io::checksum;
use crate::settings::{Layer, SettingsSchema};

/// Schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Schema version of the pre-layered flat settings object.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Full persisted unit: base layer, per-context layers and bookkeeping.
///
/// # JSON layout
///
/// ```json
/// {
///   "schemaVersion": 2,
///   "base": { "gridSpacing": 20 },
///   "contexts": { "preview": { "gridSpacing": 40 } },
///   "checksum": "sha256:...",
///   "updatedAt": 1760000000000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDocument {
    pub schema_version: u32,
    pub base: Layer,
    #[serde(default)]
    pub contexts: BTreeMap<String, Layer>,
    /// Content hash at the last successful write (empty if never written).
    #[serde(default)]
    pub checksum: String,
    /// Logical timestamp in milliseconds; strictly increases on every change.
    #[serde(default)]
    pub updated_at: u64,
}

impl ConfigurationDocument {
    /// Factory document: schema defaults in `base`, one empty layer per known context.
    pub fn factory(schema: &SettingsSchema) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            base: schema.factory_base(),
            contexts: schema
                .contexts()
                .iter()
                .map(|name| (name.clone(), Layer::new()))
                .collect(),
            checksum: String::new(),
            updated_at: 0,
        }
    }

    /// Get a context layer, if one exists.
    pub fn context(&self, name: &str) -> Option<&Layer> {
        self.contexts.get(name)
    }

    /// Get a context layer, creating an empty one if needed.
    pub fn context_mut(&mut self, name: &str) -> &mut Layer {
        self.contexts.entry(name.to_string()).or_default()
    }

    /// Advance `updated_at` and return the new value.
    pub fn touch(&mut self) -> u64 {
        self.updated_at = next_timestamp(self.updated_at);
        self.updated_at
    }

    /// Digest of the document with its own checksum field blanked.
    pub fn content_hash(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.checksum.clear();
        let bytes = serde_json::to_vec(&unsealed)?;
        Ok(checksum::digest(&bytes))
    }

    /// Whether the stored checksum (if any) matches the content.
    pub fn checksum_matches(&self) -> Result<bool> {
        if self.checksum.is_empty() {
            return Ok(true);
        }
        Ok(self.content_hash()? == self.checksum)
    }

    /// Same settings, ignoring bookkeeping fields.
    pub fn same_settings(&self, other: &ConfigurationDocument) -> bool {
        self.base == other.base && self.contexts == other.contexts
    }
}

/// Logical clock step: wall-clock milliseconds, but never less than `previous + 1`.
pub fn next_timestamp(previous: u64) -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    now.max(previous.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FieldPath, SettingValue, ValueKind};

    fn schema() -> SettingsSchema {
        SettingsSchema::new()
            .field("gridSpacing", ValueKind::Integer, 20)
            .unwrap()
            .context("normal")
            .unwrap()
            .context("preview")
            .unwrap()
    }

    #[test]
    fn test_factory_document() {
        let doc = ConfigurationDocument::factory(&schema());
        assert_eq!(doc.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(doc.base.get("gridSpacing"), Some(&SettingValue::Integer(20)));
        assert_eq!(doc.contexts.len(), 2);
        assert!(doc.context("normal").unwrap().is_empty());
        assert!(doc.checksum.is_empty());
    }

    #[test]
    fn test_serialized_layout_is_camel_case() {
        let doc = ConfigurationDocument::factory(&schema());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["base"]["gridSpacing"], 20);
        assert!(value["contexts"]["preview"].is_object());
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("checksum").is_some());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let doc: ConfigurationDocument =
            serde_json::from_str(r#"{"schemaVersion":2,"base":{"gridSpacing":5}}"#).unwrap();
        assert!(doc.contexts.is_empty());
        assert_eq!(doc.updated_at, 0);
        assert!(doc.checksum.is_empty());
    }

    #[test]
    fn test_context_mut_creates_layer() {
        let mut doc = ConfigurationDocument::factory(&schema());
        doc.context_mut("print")
            .set(FieldPath::parse("gridSpacing").unwrap(), 4.into());
        assert_eq!(
            doc.context("print").unwrap().get("gridSpacing"),
            Some(&SettingValue::Integer(4))
        );
    }

    #[test]
    fn test_touch_strictly_increases() {
        let mut doc = ConfigurationDocument::factory(&schema());
        doc.updated_at = u64::MAX / 2;
        let first = doc.touch();
        let second = doc.touch();
        assert_eq!(first, u64::MAX / 2 + 1);
        assert!(second > first);
    }

    #[test]
    fn test_content_hash_ignores_checksum_field() {
        let mut doc = ConfigurationDocument::factory(&schema());
        let hash = doc.content_hash().unwrap();
        doc.checksum = hash.clone();
        assert_eq!(doc.content_hash().unwrap(), hash);
        assert!(doc.checksum_matches().unwrap());

        doc.base.set(FieldPath::parse("gridSpacing").unwrap(), 21.into());
        assert!(!doc.checksum_matches().unwrap());
    }
}
