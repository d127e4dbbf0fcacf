//! Canvas runtime for Weft.
//!
//! Ties the bus, the widget sandbox host and the data model together for
//! one canvas:
//! - [`RuntimeContext`] reconciles placed instances with live sandboxes and
//!   persists their state
//! - [`PipelineGraph`] validates port-to-port connections and
//!   [`PipelineRouter`] delivers output values along them
//! - the dock manager moves widgets in and out of container widgets
//! - [`HostConfig`] loads `weft.toml`
//!
//! All dependencies are passed in through [`RuntimeDeps`]; nothing here is
//! global.

mod config;
mod context;
mod dock;
mod error;
mod pipeline;
mod registry;
mod store;

pub use config::{BusConfig, HostConfig, SandboxSettings};
pub use context::{MountedWidget, ReconcileReport, RuntimeContext, RuntimeDeps};
pub use dock::{ChildDescriptor, IntentOutcome, WidgetIntent, DOCK_GAP};
pub use error::{RuntimeError, RuntimeResult};
pub use pipeline::{
    derive_ports, ConnectionDrag, PipelineGraph, PipelineRouter, Port, SandboxDirectory,
};
pub use registry::ManifestRegistry;
pub use store::{CanvasStore, FileCanvasStore, InMemoryCanvasStore, InMemoryStateStore, StateStore};
