//! Built-in factory defaults for a canvas/drawing tool.
//!
//! Hosts with their own field set build a [`SettingsSchema`] directly and pass
//! it to the engine builder; this one is used when none is given.

use crate::Result;
use crate::settings::schema::{Constraint, SettingsSchema};
use crate::settings::value::{SettingValue, ValueKind};

/// Context used for regular editing.
pub const NORMAL_CONTEXT: &str = "normal";

/// Context used while previewing output.
pub const PREVIEW_CONTEXT: &str = "preview";

/// Units accepted by the `units` field.
pub const UNITS: [&str; 4] = ["mm", "cm", "m", "in"];

/// Build the built-in schema.
pub fn builtin_schema() -> Result<SettingsSchema> {
    SettingsSchema::new()
        // Grid
        .field("gridSpacing", ValueKind::Integer, 20)?
        .constrain("gridSpacing", Constraint::Range { min: 1.0, max: 500.0 })?
        .field("showGrid", ValueKind::Bool, true)?
        .field("snapToGrid", ValueKind::Bool, true)?
        // Strokes
        .field("lineWidth", ValueKind::Float, 1.0)?
        .constrain("lineWidth", Constraint::Range { min: 0.1, max: 50.0 })?
        .field("strokeColor", ValueKind::Text, "#000000")?
        .constrain("strokeColor", Constraint::NonEmpty)?
        .field("fillColor", ValueKind::Text, "#ffffff")?
        .constrain("fillColor", Constraint::NonEmpty)?
        // Canvas
        .field("canvas.background", ValueKind::Text, "#fafafa")?
        .field("canvas.zoom", ValueKind::Float, 1.0)?
        .constrain("canvas.zoom", Constraint::Range { min: 0.05, max: 32.0 })?
        .field("showRulers", ValueKind::Bool, true)?
        .field("units", ValueKind::Text, "mm")?
        .constrain(
            "units",
            Constraint::OneOf(UNITS.iter().map(|u| u.to_string()).collect()),
        )?
        // Text
        .field("fontFamily", ValueKind::Text, "sans-serif")?
        .field("fontSize", ValueKind::Float, 12.0)?
        .constrain("fontSize", Constraint::Range { min: 4.0, max: 288.0 })?
        .field("labelLayers", ValueKind::List, Vec::<SettingValue>::new())?
        .context(NORMAL_CONTEXT)?
        .context(PREVIEW_CONTEXT)
}
