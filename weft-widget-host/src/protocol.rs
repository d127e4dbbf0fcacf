//! Messages exchanged across the isolation boundary.
//!
//! Both directions are plain JSON objects tagged by `type`. Wasm guests
//! receive [`HostMessage`] bytes through `weft_on_message` and send
//! [`GuestMessage`] bytes through the `weft.post` import.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_types::WidgetId;

/// Host → widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// First message after mount.
    Init {
        instance_id: WidgetId,
        state: Value,
        width: f64,
        height: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset_base_url: Option<String>,
        #[serde(default)]
        debug: bool,
    },
    Resize {
        width: f64,
        height: f64,
    },
    /// Merged into the widget's own state before the widget sees it.
    /// A `seq` is echoed back in the acknowledging `state_changed`.
    SetState {
        patch: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    /// A bus event targeted at this widget.
    Event {
        kind: String,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_widget_id: Option<WidgetId>,
    },
}

/// Widget → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuestMessage {
    Output {
        port: String,
        #[serde(default)]
        value: Value,
    },
    /// Full replacement of the widget's state. `ack` is set only by the
    /// sandbox when acknowledging a sequenced host push.
    StateChanged {
        state: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    /// Partial update, merged into the current state.
    SetState { patch: Value },
    EmitEvent {
        event_type: String,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<WidgetId>,
    },
    /// Dock/undock/remove/save-preset requests for an orchestration layer.
    Intent { action: String, child_id: WidgetId },
    DebugLog { message: String },
}
