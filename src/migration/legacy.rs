//! Legacy migration: flat settings object (version 1) to layered document (version 2).
//!
//! Context layers are inferred from keys that name a known context:
//!
//! - `"preview": { "gridSpacing": 40 }` (object keyed by context name)
//! - `"preview.gridSpacing": 40` (context name as first path segment)
//! - `"contexts": { "preview": { ... } }` (explicit context map)
//!
//! Everything else lands in `base`. `null` values are dropped.

use serde_json::{Map, Value};

use crate::migration::{MigrationError, MigrationResult};

/// Keys that describe the document rather than a setting.
const METADATA_KEYS: [&str; 3] = ["schemaVersion", "checksum", "updatedAt"];

/// Reshape a flat legacy object into `{ base, contexts }`.
///
/// `known_contexts` decides which keys are contextual. `updatedAt` is carried
/// over when it is a number; `schemaVersion` is left for the registry to stamp.
pub fn flat_to_layered(value: Value, known_contexts: &[String]) -> MigrationResult<Value> {
    let Value::Object(flat) = value else {
        return Err(MigrationError::NotAnObject);
    };

    let is_context = |name: &str| known_contexts.iter().any(|c| c == name);
    let mut base = Map::new();
    let mut contexts: Map<String, Value> = Map::new();
    let mut updated_at = None;

    for (key, value) in flat {
        if key == "updatedAt" {
            updated_at = value.as_u64();
            continue;
        }
        if METADATA_KEYS.contains(&key.as_str()) || value.is_null() {
            continue;
        }

        if key == "contexts" {
            if let Value::Object(map) = value {
                for (name, fields) in map {
                    if let Value::Object(fields) = fields {
                        merge_into(&mut contexts, &name, fields);
                    }
                }
                continue;
            }
            base.insert(key, value);
            continue;
        }

        if is_context(&key) {
            if let Value::Object(fields) = value {
                merge_into(&mut contexts, &key, fields);
                continue;
            }
        }

        if let Some((head, rest)) = key.split_once('.') {
            if is_context(head) && !rest.is_empty() {
                let mut single = Map::new();
                single.insert(rest.to_string(), value);
                merge_into(&mut contexts, head, single);
                continue;
            }
        }

        base.insert(key, value);
    }

    let mut layered = Map::new();
    layered.insert("base".to_string(), Value::Object(base));
    layered.insert("contexts".to_string(), Value::Object(contexts));
    if let Some(ts) = updated_at {
        layered.insert("updatedAt".to_string(), Value::from(ts));
    }
    Ok(Value::Object(layered))
}

fn merge_into(contexts: &mut Map<String, Value>, name: &str, fields: Map<String, Value>) {
    let entry = contexts
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(layer) = entry {
        for (path, value) in fields {
            if !value.is_null() {
                layer.insert(path, value);
            }
        }
    }
}
