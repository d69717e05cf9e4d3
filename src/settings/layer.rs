//! Configuration layers.
//!
//! A [`Layer`] is a sparse map from field path to value: a field that is absent
//! falls through to the layer below it. Base and context layers are persisted;
//! [`SessionOverrides`] are not, and additionally support an explicit
//! [`OverrideValue::Unset`] sentinel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::settings::value::{FieldPath, SettingValue};

/// A sparse, persisted set of field values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Layer(BTreeMap<FieldPath, SettingValue>);

impl Layer {
    /// Create an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value for a path, if this layer defines one.
    pub fn get(&self, path: &str) -> Option<&SettingValue> {
        self.0.get(path)
    }

    /// Check whether this layer defines a value for a path.
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// Set a value, returning the previous one.
    pub fn set(&mut self, path: FieldPath, value: SettingValue) -> Option<SettingValue> {
        self.0.insert(path, value)
    }

    /// Remove a value so the field falls through again.
    pub fn remove(&mut self, path: &str) -> Option<SettingValue> {
        self.0.remove(path)
    }

    /// Iterate over defined fields in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &SettingValue)> {
        self.0.iter()
    }

    /// Number of defined fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no field is defined.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the fields for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&FieldPath, &SettingValue) -> bool) {
        self.0.retain(|path, value| keep(path, value));
    }
}

impl FromIterator<(FieldPath, SettingValue)> for Layer {
    fn from_iter<I: IntoIterator<Item = (FieldPath, SettingValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One session override entry.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    /// Force this value for the session.
    Value(SettingValue),
    /// Force the field back to the Base layer's value, ignoring the context layer.
    Unset,
}

impl From<SettingValue> for OverrideValue {
    fn from(value: SettingValue) -> Self {
        OverrideValue::Value(value)
    }
}

macro_rules! override_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for OverrideValue {
                fn from(value: $t) -> Self {
                    OverrideValue::Value(SettingValue::from(value))
                }
            }
        )*
    };
}

override_from!(bool, i32, i64, f64, &str, String);

/// In-memory overrides scoped to one engine instance. Never serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOverrides(BTreeMap<FieldPath, OverrideValue>);

impl SessionOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the override entry for a path.
    pub fn get(&self, path: &str) -> Option<&OverrideValue> {
        self.0.get(path)
    }

    /// Set an override entry, returning the previous one.
    pub fn set(&mut self, path: FieldPath, value: OverrideValue) -> Option<OverrideValue> {
        self.0.insert(path, value)
    }

    /// Set a value override.
    pub fn with_value(mut self, path: FieldPath, value: impl Into<SettingValue>) -> Self {
        self.0.insert(path, OverrideValue::Value(value.into()));
        self
    }

    /// Set an unset sentinel.
    pub fn with_unset(mut self, path: FieldPath) -> Self {
        self.0.insert(path, OverrideValue::Unset);
        self
    }

    /// Remove an override entry entirely.
    pub fn remove(&mut self, path: &str) -> Option<OverrideValue> {
        self.0.remove(path)
    }

    /// Drop every override.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterate over entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &OverrideValue)> {
        self.0.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
