use thiserror::Error;
use weft_types::{CanvasId, WidgetDefId, WidgetId};
use weft_widget_host::SandboxError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("invalid data: {0}")]
    Types(#[from] weft_types::Error),

    #[error("widget not on canvas: {0}")]
    UnknownWidget(WidgetId),

    #[error("no manifest registered for '{0}'")]
    UnknownManifest(WidgetDefId),

    #[error("widget already on canvas: {0}")]
    DuplicateInstance(WidgetId),

    #[error("widget is not mounted: {0}")]
    NotMounted(WidgetId),

    #[error("'{child}' is not docked in '{container}'")]
    ChildNotDocked { container: WidgetId, child: WidgetId },

    #[error("invalid dock operation: {0}")]
    InvalidDock(String),

    #[error("snapshot belongs to canvas '{found}', expected '{expected}'")]
    CanvasMismatch { expected: CanvasId, found: CanvasId },

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
