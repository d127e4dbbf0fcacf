use crate::{CanvasId, PipelineConnection, WidgetId, WidgetInstance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persisted form of a canvas: placed instances in order plus the
/// pipeline connections between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    pub canvas_id: CanvasId,
    #[serde(default)]
    pub instances: Vec<WidgetInstance>,
    #[serde(default)]
    pub connections: Vec<PipelineConnection>,
    /// Generated guest code of placed instances that do not run their
    /// manifest entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub generated_code: BTreeMap<WidgetId, String>,
}

impl CanvasSnapshot {
    pub fn empty(canvas_id: CanvasId) -> Self {
        Self {
            canvas_id,
            instances: Vec::new(),
            connections: Vec::new(),
            generated_code: BTreeMap::new(),
        }
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
