//! Typed setting values and field paths.
//!
//! Values are opaque to the engine beyond their kind: the engine checks that a
//! value has the kind its field declares and never looks inside it otherwise.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Dotted path naming one setting (e.g. `gridSpacing`, `canvas.background`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    /// Parse and validate a field path.
    ///
    /// Segments are separated by `.` and must be non-empty; whitespace and
    /// control characters are rejected anywhere in the path.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidInput("field path must not be empty".to_string()));
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidInput(format!(
                "field path must not contain whitespace or control characters: {:?}",
                s
            )));
        }
        if s.split('.').any(str::is_empty) {
            return Err(Error::InvalidInput(format!(
                "field path has an empty segment: {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment of the path.
    pub fn head(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.0
    }
}

impl Borrow<str> for FieldPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FieldPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of a setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
    Text,
    List,
    Object,
}

impl ValueKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::List => "list",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed setting value.
///
/// Serialized as the plain JSON value (`true`, `10`, `1.5`, `"mm"`, ...).
/// Variant order matters for deserialization: integers are tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<SettingValue>),
    Object(BTreeMap<String, SettingValue>),
}

impl SettingValue {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            SettingValue::Bool(_) => ValueKind::Bool,
            SettingValue::Integer(_) => ValueKind::Integer,
            SettingValue::Float(_) => ValueKind::Float,
            SettingValue::Text(_) => ValueKind::Text,
            SettingValue::List(_) => ValueKind::List,
            SettingValue::Object(_) => ValueKind::Object,
        }
    }

    /// Convert to `kind`, widening integers to floats. No other conversion.
    pub fn coerce(&self, kind: ValueKind) -> Option<SettingValue> {
        match (self, kind) {
            (SettingValue::Integer(i), ValueKind::Float) => Some(SettingValue::Float(*i as f64)),
            (value, kind) if value.kind() == kind => Some(value.clone()),
            _ => None,
        }
    }

    /// Tries to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Tries to get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Tries to get as float (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SettingValue::Float(v) => Some(*v),
            SettingValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Tries to get as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Tries to get as list
    pub fn as_list(&self) -> Option<&[SettingValue]> {
        match self {
            SettingValue::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Whether every number in the value, nested ones included, is finite.
    ///
    /// JSON has no NaN or infinity, so a non-finite float would be written as
    /// `null` and the stored document could not be read back.
    pub fn is_finite(&self) -> bool {
        match self {
            SettingValue::Float(v) => v.is_finite(),
            SettingValue::List(items) => items.iter().all(SettingValue::is_finite),
            SettingValue::Object(map) => map.values().all(SettingValue::is_finite),
            _ => true,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{}", v),
            SettingValue::Integer(v) => write!(f, "{}", v),
            SettingValue::Float(v) => write!(f, "{}", v),
            SettingValue::Text(v) => write!(f, "{}", v),
            other => match serde_json::to_string(other) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "<{}>", other.kind()),
            },
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Integer(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Integer(v as i64)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

impl From<Vec<SettingValue>> for SettingValue {
    fn from(v: Vec<SettingValue>) -> Self {
        SettingValue::List(v)
    }
}
