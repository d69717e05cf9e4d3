//! Effective-configuration resolution.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Session overrides (an `Unset` entry jumps straight to step 3)
//! 2. Context layer for the requested context
//! 3. Base layer
//! 4. Schema factory default
//!
//! Only fields known to the schema appear in the result. A layer value whose
//! kind does not match its field falls through as if it were absent.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::settings::layer::{Layer, OverrideValue, SessionOverrides};
use crate::settings::schema::{FieldSpec, SettingsSchema};
use crate::settings::value::{FieldPath, SettingValue};

/// Tracks which layer a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "layer", content = "name", rename_all = "lowercase")]
pub enum LayerSource {
    /// Value from session overrides
    Session,
    /// Value from the named context layer
    Context(String),
    /// Value from the base layer
    Base,
    /// Schema factory default
    Default,
}

impl std::fmt::Display for LayerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerSource::Session => write!(f, "session"),
            LayerSource::Context(name) => write!(f, "context:{}", name),
            LayerSource::Base => write!(f, "base"),
            LayerSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: LayerSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: LayerSource) -> Self {
        Self { value, source }
    }
}

/// Read-only merge of all layers for one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfiguration {
    context: String,
    fields: BTreeMap<FieldPath, Resolved<SettingValue>>,
}

impl EffectiveConfiguration {
    /// Context this configuration was resolved for.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Get the effective value of a field.
    pub fn get(&self, path: &str) -> Option<&SettingValue> {
        self.fields.get(path).map(|r| &r.value)
    }

    /// Get the effective value together with its source.
    pub fn resolved(&self, path: &str) -> Option<&Resolved<SettingValue>> {
        self.fields.get(path)
    }

    /// Get the source of a field's effective value.
    pub fn source(&self, path: &str) -> Option<&LayerSource> {
        self.fields.get(path).map(|r| &r.source)
    }

    /// Get a boolean field.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(SettingValue::as_bool)
    }

    /// Get an integer field.
    pub fn get_integer(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(SettingValue::as_integer)
    }

    /// Get a float field.
    pub fn get_float(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(SettingValue::as_float)
    }

    /// Get a text field.
    pub fn get_text(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(SettingValue::as_text)
    }

    /// Iterate over all effective fields in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &SettingValue)> {
        self.fields.iter().map(|(path, r)| (path, &r.value))
    }

    /// Number of effective fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the configuration has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Plain `path -> value` view, without sources.
    pub fn values(&self) -> BTreeMap<String, SettingValue> {
        self.fields
            .iter()
            .map(|(path, r)| (path.to_string(), r.value.clone()))
            .collect()
    }
}

fn from_layer(spec: &FieldSpec, layer: &Layer) -> Option<SettingValue> {
    layer.get(spec.path.as_str()).and_then(|v| v.coerce(spec.kind))
}

fn base_or_default(spec: &FieldSpec, base: &Layer) -> Resolved<SettingValue> {
    match from_layer(spec, base) {
        Some(value) => Resolved::new(value, LayerSource::Base),
        None => Resolved::new(spec.default.clone(), LayerSource::Default),
    }
}

/// Resolve one field through the layer stack.
pub fn resolve_field(
    spec: &FieldSpec,
    base: &Layer,
    context: Option<(&str, &Layer)>,
    overrides: &SessionOverrides,
) -> Resolved<SettingValue> {
    match overrides.get(spec.path.as_str()) {
        Some(OverrideValue::Unset) => return base_or_default(spec, base),
        Some(OverrideValue::Value(value)) => {
            if let Some(value) = value.coerce(spec.kind) {
                return Resolved::new(value, LayerSource::Session);
            }
        }
        None => {}
    }

    if let Some((name, layer)) = context {
        if let Some(value) = from_layer(spec, layer) {
            return Resolved::new(value, LayerSource::Context(name.to_string()));
        }
    }

    base_or_default(spec, base)
}

/// Compute the effective configuration for `context_name`.
///
/// Pure and deterministic: identical inputs produce identical output.
pub fn resolve(
    schema: &SettingsSchema,
    base: &Layer,
    context_name: &str,
    context: Option<&Layer>,
    overrides: &SessionOverrides,
) -> EffectiveConfiguration {
    let context = context.map(|layer| (context_name, layer));
    let fields = schema
        .fields()
        .map(|spec| {
            (
                spec.path.clone(),
                resolve_field(spec, base, context, overrides),
            )
        })
        .collect();

    EffectiveConfiguration {
        context: context_name.to_string(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::value::ValueKind;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    fn schema() -> SettingsSchema {
        SettingsSchema::new()
            .field("gridSpacing", ValueKind::Integer, 20)
            .unwrap()
            .field("lineWidth", ValueKind::Float, 1.0)
            .unwrap()
            .field("snapToGrid", ValueKind::Bool, true)
            .unwrap()
    }

    fn layer(entries: &[(&str, SettingValue)]) -> Layer {
        entries
            .iter()
            .map(|(p, v)| (path(p), v.clone()))
            .collect()
    }

    // ==================== LayerSource Tests ====================

    #[test]
    fn test_layer_source_display() {
        assert_eq!(format!("{}", LayerSource::Session), "session");
        assert_eq!(
            format!("{}", LayerSource::Context("preview".to_string())),
            "context:preview"
        );
        assert_eq!(format!("{}", LayerSource::Base), "base");
        assert_eq!(format!("{}", LayerSource::Default), "default");
    }

    // ==================== Resolution Tests ====================

    #[test]
    fn test_resolve_defaults_only() {
        let eff = resolve(&schema(), &Layer::new(), "normal", None, &SessionOverrides::new());

        assert_eq!(eff.context(), "normal");
        assert_eq!(eff.len(), 3);
        assert_eq!(eff.get_integer("gridSpacing"), Some(20));
        assert_eq!(eff.source("gridSpacing"), Some(&LayerSource::Default));
    }

    #[test]
    fn test_resolve_base_over_default() {
        let base = layer(&[("gridSpacing", 8.into())]);
        let eff = resolve(&schema(), &base, "normal", None, &SessionOverrides::new());

        assert_eq!(eff.get_integer("gridSpacing"), Some(8));
        assert_eq!(eff.source("gridSpacing"), Some(&LayerSource::Base));
        assert_eq!(eff.source("lineWidth"), Some(&LayerSource::Default));
    }

    #[test]
    fn test_resolve_context_over_base() {
        let base = layer(&[("gridSpacing", 8.into()), ("lineWidth", 2.0.into())]);
        let ctx = layer(&[("gridSpacing", 10.into())]);
        let eff = resolve(&schema(), &base, "normal", Some(&ctx), &SessionOverrides::new());

        assert_eq!(eff.get_integer("gridSpacing"), Some(10));
        assert_eq!(
            eff.source("gridSpacing"),
            Some(&LayerSource::Context("normal".to_string()))
        );
        // Not overridden by the context layer
        assert_eq!(eff.get_float("lineWidth"), Some(2.0));
        assert_eq!(eff.source("lineWidth"), Some(&LayerSource::Base));
    }

    #[test]
    fn test_resolve_session_over_context() {
        let base = layer(&[("gridSpacing", 8.into())]);
        let ctx = layer(&[("gridSpacing", 10.into())]);
        let overrides = SessionOverrides::new().with_value(path("gridSpacing"), 3);
        let eff = resolve(&schema(), &base, "normal", Some(&ctx), &overrides);

        assert_eq!(eff.get_integer("gridSpacing"), Some(3));
        assert_eq!(eff.source("gridSpacing"), Some(&LayerSource::Session));
    }

    #[test]
    fn test_unset_reverts_to_base_ignoring_context() {
        let base = layer(&[("gridSpacing", 8.into())]);
        let ctx = layer(&[("gridSpacing", 10.into())]);
        let overrides = SessionOverrides::new().with_unset(path("gridSpacing"));
        let eff = resolve(&schema(), &base, "normal", Some(&ctx), &overrides);

        assert_eq!(eff.get_integer("gridSpacing"), Some(8));
        assert_eq!(eff.source("gridSpacing"), Some(&LayerSource::Base));
        // The context layer keeps its own value
        assert_eq!(ctx.get("gridSpacing"), Some(&SettingValue::Integer(10)));
    }

    #[test]
    fn test_unset_without_base_value_uses_default() {
        let ctx = layer(&[("gridSpacing", 10.into())]);
        let overrides = SessionOverrides::new().with_unset(path("gridSpacing"));
        let eff = resolve(&schema(), &Layer::new(), "normal", Some(&ctx), &overrides);

        assert_eq!(eff.get_integer("gridSpacing"), Some(20));
        assert_eq!(eff.source("gridSpacing"), Some(&LayerSource::Default));
    }

    #[test]
    fn test_falsy_values_do_not_fall_through() {
        let base = layer(&[("snapToGrid", true.into())]);
        let ctx = layer(&[("snapToGrid", false.into()), ("gridSpacing", 0.into())]);
        let eff = resolve(&schema(), &base, "normal", Some(&ctx), &SessionOverrides::new());

        assert_eq!(eff.get_bool("snapToGrid"), Some(false));
        assert_eq!(eff.get_integer("gridSpacing"), Some(0));
    }

    #[test]
    fn test_mismatched_kind_falls_through() {
        let base = layer(&[("gridSpacing", 8.into())]);
        let ctx = layer(&[("gridSpacing", "wide".into())]);
        let eff = resolve(&schema(), &base, "normal", Some(&ctx), &SessionOverrides::new());

        assert_eq!(eff.get_integer("gridSpacing"), Some(8));
    }

    #[test]
    fn test_integer_widens_for_float_field() {
        let base = layer(&[("lineWidth", 3.into())]);
        let eff = resolve(&schema(), &base, "normal", None, &SessionOverrides::new());

        assert_eq!(eff.get("lineWidth"), Some(&SettingValue::Float(3.0)));
    }

    #[test]
    fn test_unknown_fields_not_in_output() {
        let base = layer(&[("futureField", "x".into())]);
        let eff = resolve(&schema(), &base, "normal", None, &SessionOverrides::new());

        assert!(eff.get("futureField").is_none());
        assert_eq!(eff.len(), 3);
    }

    #[test]
    fn test_values_view() {
        let eff = resolve(&schema(), &Layer::new(), "normal", None, &SessionOverrides::new());
        let values = eff.values();
        assert_eq!(values.get("gridSpacing"), Some(&SettingValue::Integer(20)));
    }
}
