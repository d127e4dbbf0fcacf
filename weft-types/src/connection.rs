use crate::{ConnectionId, WidgetId};
use serde::{Deserialize, Serialize};

/// A directed edge from one widget's output port to another widget's input
/// port. Validity is enforced by the pipeline graph, not by this record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineConnection {
    pub id: ConnectionId,
    pub source_widget_id: WidgetId,
    pub source_port: String,
    pub target_widget_id: WidgetId,
    pub target_port: String,
}

impl PipelineConnection {
    pub fn new(
        source_widget_id: WidgetId,
        source_port: impl Into<String>,
        target_widget_id: WidgetId,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            source_widget_id,
            source_port: source_port.into(),
            target_widget_id,
            target_port: target_port.into(),
        }
    }

    /// True if both connections join the same ports, regardless of id.
    pub fn same_endpoints(&self, other: &PipelineConnection) -> bool {
        self.source_widget_id == other.source_widget_id
            && self.source_port == other.source_port
            && self.target_widget_id == other.target_widget_id
            && self.target_port == other.target_port
    }

    /// True if either endpoint belongs to `widget_id`.
    pub fn touches(&self, widget_id: &WidgetId) -> bool {
        &self.source_widget_id == widget_id || &self.target_widget_id == widget_id
    }
}
