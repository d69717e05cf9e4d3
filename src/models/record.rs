//! The physical record written to a storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::safe_io::checksum;

/// Serialized document plus the digest of exactly those bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    /// Serialized `ConfigurationDocument` (JSON text)
    pub payload: String,
    /// Digest of `payload`
    pub checksum: String,
    /// Wall-clock time of the write
    pub written_at: DateTime<Utc>,
    /// Session id of the engine instance that wrote the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<String>,
}

impl StorageRecord {
    /// Build a record over `payload`, computing its checksum.
    pub fn seal(payload: String, writer: Option<String>) -> Self {
        let checksum = checksum::digest(payload.as_bytes());
        Self {
            payload,
            checksum,
            written_at: Utc::now(),
            writer,
        }
    }

    /// Wrap raw stored bytes whose envelope could not be parsed.
    ///
    /// The record carries no checksum, so it never verifies; it exists to be
    /// quarantined with its content intact.
    pub fn unsealed(raw: String) -> Self {
        Self {
            payload: raw,
            checksum: String::new(),
            written_at: Utc::now(),
            writer: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        !self.checksum.is_empty()
    }

    /// Whether the stored checksum matches the payload.
    pub fn verify(&self) -> bool {
        checksum::verify(self.payload.as_bytes(), &self.checksum)
    }
}
