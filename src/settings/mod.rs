//! Settings data model and resolution.
//!
//! - [`value`]: typed values and field paths
//! - [`layer`]: base/context layers and session overrides
//! - [`schema`]: known fields, factory defaults, constraints
//! - [`defaults`]: the built-in schema
//! - [`resolver`]: the pure layer merge producing an [`EffectiveConfiguration`]

pub mod defaults;
pub mod layer;
pub mod resolver;
pub mod schema;
pub mod value;

pub use defaults::{NORMAL_CONTEXT, PREVIEW_CONTEXT, builtin_schema};
pub use layer::{Layer, OverrideValue, SessionOverrides};
pub use resolver::{EffectiveConfiguration, LayerSource, Resolved, resolve, resolve_field};
pub use schema::{Constraint, FieldSpec, LayerReport, SettingsSchema, validate_context_name};
pub use value::{FieldPath, SettingValue, ValueKind};
