//! Core type definitions for Weft.
//!
//! This crate defines the plain, serializable records shared by every layer
//! of the widget substrate:
//! - Widget, canvas, connection and event identifiers
//! - Widget manifests with typed ports and decoded capabilities
//! - Widget instances and their geometry
//! - Pipeline connections between ports
//! - Cross-context event metadata used for relay loop prevention
//! - Canvas snapshots exchanged with the persistence layer
//!
//! Nothing here executes widget code or touches the event bus.

mod capability;
mod connection;
mod event;
mod ids;
mod instance;
mod manifest;
mod snapshot;

pub use capability::{Capability, CapabilityDomain};
pub use connection::PipelineConnection;
pub use event::{EventId, EventMetadata, EventOrigin, OriginId};
pub use ids::{CanvasId, ConnectionId, WidgetDefId, WidgetId};
pub use instance::WidgetInstance;
pub use manifest::{
    DataType, PortDirection, PortSpec, SizeHints, WidgetIo, WidgetKind, WidgetManifest,
};
pub use snapshot::CanvasSnapshot;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or validating core records.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid capability '{0}': expected 'domain.subtype'")]
    InvalidCapability(String),

    #[error("unknown capability domain '{0}'")]
    UnknownCapabilityDomain(String),

    #[error("manifest '{manifest_id}' is invalid: {reason}")]
    InvalidManifest { manifest_id: String, reason: String },
}
