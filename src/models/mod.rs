//! Persisted data model.

pub mod document;
pub mod record;

pub use document::{
    CURRENT_SCHEMA_VERSION, ConfigurationDocument, LEGACY_SCHEMA_VERSION, next_timestamp,
};
pub use record::StorageRecord;
