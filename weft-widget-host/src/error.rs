//! Error types for the widget host.

use thiserror::Error;
use weft_types::{WidgetDefId, WidgetId};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("no manifest registered for widget definition '{0}'")]
    MissingManifest(WidgetDefId),

    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] weft_types::Error),

    #[error("instance '{widget_id}' references '{expected}' but manifest is '{found}'")]
    ManifestMismatch {
        widget_id: WidgetId,
        expected: WidgetDefId,
        found: WidgetDefId,
    },

    #[error("widget definition '{0}' is native and cannot be sandboxed")]
    NotSandboxed(WidgetDefId),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("mount target for widget '{0}' is missing or disposed")]
    MountTargetMissing(WidgetId),

    #[error("sandbox for widget '{0}' has been destroyed")]
    AlreadyDestroyed(WidgetId),

    #[error("no async runtime available to mount widget '{0}'")]
    NoRuntime(WidgetId),

    #[error("failed to load guest for '{def_id}': {message}")]
    GuestLoad { def_id: WidgetDefId, message: String },

    #[error("wasm compilation error: {0}")]
    Compilation(#[from] wasmtime::Error),

    #[error("permission denied: widget '{widget_id}' lacks '{permission}'")]
    PermissionDenied {
        widget_id: WidgetId,
        permission: String,
    },

    #[error("widget '{widget_id}' does not declare output port '{port}'")]
    UndeclaredPort { widget_id: WidgetId, port: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("message channel to widget '{0}' is closed")]
    ChannelClosed(WidgetId),

    #[error("failed to start sandbox thread: {0}")]
    Spawn(#[from] std::io::Error),
}
