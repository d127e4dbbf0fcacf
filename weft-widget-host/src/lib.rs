//! Wasmtime-based widget host for Weft.
//!
//! Runs each widget instance behind its own isolation boundary: a dedicated
//! OS thread with its own message loop, optionally backed by a
//! `wasmtime::Store` with a memory ceiling and a per-call fuel budget. The
//! host and the widget exchange validated, by-value JSON messages only.
//!
//! Widget code sees a capability-scoped [`GuestApi`]; everything it sends
//! back is turned into event bus traffic by a pump task on the host side.

mod container;
mod error;
mod guest;
mod limits;
mod payload;
mod permissions;
mod policy;
mod protocol;
mod sandbox;
mod wasm_guest;

pub use container::WidgetContainer;
pub use error::SandboxError;
pub use guest::{
    GuestApi, GuestFactory, GuestFault, GuestLoader, HostLoader, NativeGuestRegistry, WidgetGuest,
};
pub use limits::{GuestMemoryLimiter, SandboxLimits};
pub use payload::PayloadLimits;
pub use permissions::{Permission, PermissionSet, PermissionTier};
pub use policy::{PolicyConfig, PolicyMode, WidgetPolicy};
pub use protocol::{GuestMessage, HostMessage};
pub use sandbox::{SandboxConfig, SandboxHandle, SandboxPhase, WidgetSandbox};
pub use wasm_guest::{WasmEngine, WasmGuest, WasmGuestLoader};
