//! Settings schema: the set of known fields, their kinds, factory defaults
//! and constraints, plus the contexts the consuming tool knows about.

use std::collections::BTreeMap;

use crate::settings::layer::Layer;
use crate::settings::value::{FieldPath, SettingValue, ValueKind};
use crate::{Error, Result};

/// Extra validation applied on top of the kind check.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Inclusive numeric range (integers and floats).
    Range { min: f64, max: f64 },
    /// Text must be one of the listed values.
    OneOf(Vec<String>),
    /// Text must not be empty.
    NonEmpty,
}

impl Constraint {
    /// Check a value (already of the right kind) against this constraint.
    pub fn check(&self, value: &SettingValue) -> std::result::Result<(), String> {
        match self {
            Constraint::Range { min, max } => match value.as_float() {
                Some(n) if n >= *min && n <= *max => Ok(()),
                Some(n) => Err(format!("must be between {} and {}, got {}", min, max, n)),
                None => Err("must be numeric".to_string()),
            },
            Constraint::OneOf(allowed) => match value.as_text() {
                Some(s) if allowed.iter().any(|a| a == s) => Ok(()),
                Some(s) => Err(format!("must be one of [{}], got {:?}", allowed.join(", "), s)),
                None => Err("must be text".to_string()),
            },
            Constraint::NonEmpty => match value.as_text() {
                Some(s) if !s.is_empty() => Ok(()),
                _ => Err("must not be empty".to_string()),
            },
        }
    }
}

/// Definition of one known field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub path: FieldPath,
    pub kind: ValueKind,
    pub default: SettingValue,
    pub constraint: Option<Constraint>,
}

impl FieldSpec {
    /// Coerce a value to this field's kind and check the constraint.
    pub fn accept(&self, value: &SettingValue) -> std::result::Result<SettingValue, String> {
        let coerced = value
            .coerce(self.kind)
            .ok_or_else(|| format!("expected {}, got {}", self.kind, value.kind()))?;
        if !coerced.is_finite() {
            return Err("must not contain NaN or infinite numbers".to_string());
        }
        if let Some(ref constraint) = self.constraint {
            constraint.check(&coerced)?;
        }
        Ok(coerced)
    }

    /// Whether the value has (or widens to) this field's kind.
    pub fn kind_matches(&self, value: &SettingValue) -> bool {
        value.coerce(self.kind).is_some()
    }
}

/// Outcome of sanitizing a stored layer against the schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerReport {
    /// Known fields whose stored value has the wrong kind.
    pub kind_mismatches: Vec<String>,
    /// Known fields dropped because they violated their constraint.
    pub dropped: Vec<String>,
}

/// Registry of known fields and contexts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSchema {
    fields: BTreeMap<FieldPath, FieldSpec>,
    contexts: Vec<String>,
}

impl SettingsSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field. The default must satisfy the field's kind.
    pub fn field(
        mut self,
        path: &str,
        kind: ValueKind,
        default: impl Into<SettingValue>,
    ) -> Result<Self> {
        let path = FieldPath::parse(path)?;
        let default = default.into();
        let default = default.coerce(kind).ok_or_else(|| Error::InvalidValue {
            path: path.to_string(),
            reason: format!("default must be {}, got {}", kind, default.kind()),
        })?;
        if !default.is_finite() {
            return Err(Error::InvalidValue {
                path: path.to_string(),
                reason: "default must not contain NaN or infinite numbers".to_string(),
            });
        }
        self.fields.insert(
            path.clone(),
            FieldSpec {
                path,
                kind,
                default,
                constraint: None,
            },
        );
        Ok(self)
    }

    /// Attach a constraint to an already registered field. The field's default
    /// must satisfy it.
    pub fn constrain(mut self, path: &str, constraint: Constraint) -> Result<Self> {
        let spec = self
            .fields
            .get_mut(path)
            .ok_or_else(|| Error::UnknownField(path.to_string()))?;
        constraint
            .check(&spec.default)
            .map_err(|reason| Error::InvalidValue {
                path: path.to_string(),
                reason: format!("default {}", reason),
            })?;
        spec.constraint = Some(constraint);
        Ok(self)
    }

    /// Register a known context name.
    pub fn context(mut self, name: &str) -> Result<Self> {
        validate_context_name(name)?;
        if !self.contexts.iter().any(|c| c == name) {
            self.contexts.push(name.to_string());
        }
        Ok(self)
    }

    /// Look up a field definition.
    pub fn spec(&self, path: &str) -> Option<&FieldSpec> {
        self.fields.get(path)
    }

    /// Iterate over known fields in path order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    /// Known context names in registration order.
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    /// Whether `name` is a registered context.
    pub fn is_known_context(&self, name: &str) -> bool {
        self.contexts.iter().any(|c| c == name)
    }

    /// Validate a value for a known field, returning the coerced value.
    pub fn validate_value(&self, path: &str, value: &SettingValue) -> Result<SettingValue> {
        let spec = self
            .spec(path)
            .ok_or_else(|| Error::UnknownField(path.to_string()))?;
        spec.accept(value).map_err(|reason| Error::InvalidValue {
            path: path.to_string(),
            reason,
        })
    }

    /// Base layer holding every field's factory default.
    pub fn factory_base(&self) -> Layer {
        self.fields
            .values()
            .map(|spec| (spec.path.clone(), spec.default.clone()))
            .collect()
    }

    /// Check a stored layer against the schema.
    ///
    /// Kind mismatches are reported and left in place (the caller decides to
    /// reject the document); constraint violations are removed from the layer.
    /// Unknown fields are kept untouched.
    pub fn sanitize_layer(&self, layer: &mut Layer) -> LayerReport {
        let mut report = LayerReport::default();
        layer.retain(|path, value| {
            let Some(spec) = self.fields.get(path) else {
                return true;
            };
            if !spec.kind_matches(value) {
                report.kind_mismatches.push(path.to_string());
                return true;
            }
            match spec.accept(value) {
                Ok(_) => true,
                Err(_) => {
                    report.dropped.push(path.to_string());
                    false
                }
            }
        });
        report
    }
}

/// Validate a context name: non-empty, no whitespace or control characters.
pub fn validate_context_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("context name must not be empty".to_string()));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidInput(format!(
            "context name must not contain whitespace or control characters: {:?}",
            name
        )));
    }
    Ok(())
}
