use crate::{CanvasId, WidgetDefId, WidgetId, WidgetManifest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One placed occurrence of a widget definition on a canvas.
///
/// `state` is opaque to the host; its shape belongs to the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetInstance {
    pub id: WidgetId,
    pub widget_def_id: WidgetDefId,
    pub canvas_id: CanvasId,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i64,
    #[serde(default = "empty_state")]
    pub state: Value,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn empty_state() -> Value {
    Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

fn default_opacity() -> f64 {
    1.0
}

impl WidgetInstance {
    /// Creates an instance at the origin sized from the manifest's defaults.
    pub fn from_manifest(
        id: impl Into<WidgetId>,
        canvas_id: CanvasId,
        manifest: &WidgetManifest,
    ) -> Self {
        Self {
            id: id.into(),
            widget_def_id: manifest.id.clone(),
            canvas_id,
            x: 0.0,
            y: 0.0,
            width: manifest.size.default_width,
            height: manifest.size.default_height,
            rotation: 0.0,
            z_index: 0,
            state: empty_state(),
            visible: true,
            locked: false,
            opacity: 1.0,
        }
    }

    /// Sets the position.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Replaces the initial state.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }
}
