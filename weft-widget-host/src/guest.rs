//! The guest side of the isolation boundary.
//!
//! A [`WidgetGuest`] runs on its sandbox thread and only ever sees a
//! [`GuestApi`]. Everything the API sends leaves the thread as an owned
//! [`GuestMessage`]; nothing on the host is reachable from here.

use crate::error::SandboxError;
use crate::limits::SandboxLimits;
use crate::payload::{merge_patch, PayloadLimits};
use crate::permissions::{Permission, PermissionSet};
use crate::protocol::{GuestMessage, HostMessage};
use crate::wasm_guest::WasmGuestLoader;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use weft_types::{PortDirection, WidgetDefId, WidgetId, WidgetManifest};

/// Why a guest stopped. Faults never leave the sandbox thread except as a
/// log line.
#[derive(Debug, Error)]
pub enum GuestFault {
    #[error("guest failed to start: {0}")]
    Instantiate(String),

    #[error("guest trapped: {0}")]
    Trap(String),

    #[error("guest exhausted its fuel budget")]
    OutOfFuel,

    #[error("guest broke the message protocol: {0}")]
    Protocol(String),

    #[error("{0}")]
    Failed(String),
}

/// Widget code hosted inside a sandbox.
pub trait WidgetGuest {
    /// Handles one host message. Returning an error stops the sandbox loop.
    fn on_message(&mut self, message: &HostMessage, api: &mut GuestApi) -> Result<(), GuestFault>;

    /// Called once when the sandbox is torn down normally.
    fn dispose(&mut self) {}
}

/// Prepared guest code, instantiated on the sandbox thread at mount time.
pub trait GuestFactory: Send {
    fn instantiate(self: Box<Self>, widget_id: &WidgetId) -> Result<Box<dyn WidgetGuest>, GuestFault>;
}

/// Resolves a manifest (or generated code) to a [`GuestFactory`]. Runs at
/// sandbox construction; must not execute widget code.
pub trait GuestLoader: Send + Sync {
    fn prepare(
        &self,
        manifest: &WidgetManifest,
        generated_code: Option<&str>,
        limits: &SandboxLimits,
    ) -> Result<Box<dyn GuestFactory>, SandboxError>;
}

// ================================================================
// GuestApi
// ================================================================

/// Capability-scoped API handed to widget code.
pub struct GuestApi {
    widget_id: WidgetId,
    manifest: Arc<WidgetManifest>,
    permissions: PermissionSet,
    state: Value,
    width: f64,
    height: f64,
    asset_base_url: Option<String>,
    debug_enabled: bool,
    payload_limits: PayloadLimits,
    outbox: mpsc::UnboundedSender<GuestMessage>,
}

pub(crate) struct GuestApiParts {
    pub widget_id: WidgetId,
    pub manifest: Arc<WidgetManifest>,
    pub permissions: PermissionSet,
    pub asset_base_url: Option<String>,
    pub debug_enabled: bool,
    pub payload_limits: PayloadLimits,
}

impl GuestApi {
    pub(crate) fn new(parts: GuestApiParts, outbox: mpsc::UnboundedSender<GuestMessage>) -> Self {
        Self {
            widget_id: parts.widget_id,
            manifest: parts.manifest,
            permissions: parts.permissions,
            state: Value::Object(Default::default()),
            width: 0.0,
            height: 0.0,
            asset_base_url: parts.asset_base_url,
            debug_enabled: parts.debug_enabled,
            payload_limits: parts.payload_limits,
            outbox,
        }
    }

    pub fn widget_id(&self) -> &WidgetId {
        &self.widget_id
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled
    }

    /// Merges `patch` into the widget's state and reports the new state to
    /// the host.
    pub fn set_state(&mut self, patch: Value) -> Result<(), SandboxError> {
        self.check_permission(Permission::State)?;
        self.payload_limits.check_patch(&patch)?;
        let mut next = self.state.clone();
        merge_patch(&mut next, &patch);
        self.replace_state(next)
    }

    /// Replaces the widget's state wholesale.
    pub fn replace_state(&mut self, state: Value) -> Result<(), SandboxError> {
        self.check_permission(Permission::State)?;
        self.payload_limits.check(&state)?;
        self.state = state;
        self.send(GuestMessage::StateChanged {
            state: self.state.clone(),
            ack: None,
        })
    }

    /// Publishes `value` on a declared output port.
    pub fn output(&mut self, port: &str, value: Value) -> Result<(), SandboxError> {
        self.check_permission(Permission::Output)?;
        if self.manifest.port(PortDirection::Output, port).is_none() {
            return Err(SandboxError::UndeclaredPort {
                widget_id: self.widget_id.clone(),
                port: port.to_string(),
            });
        }
        self.payload_limits.check(&value)?;
        self.send(GuestMessage::Output {
            port: port.to_string(),
            value,
        })
    }

    /// Emits a widget-defined event on the bus.
    pub fn emit_event(
        &mut self,
        event_type: &str,
        payload: Value,
        target: Option<WidgetId>,
    ) -> Result<(), SandboxError> {
        self.check_permission(Permission::EventsEmit)?;
        self.payload_limits.check(&payload)?;
        self.send(GuestMessage::EmitEvent {
            event_type: event_type.to_string(),
            payload,
            target,
        })
    }

    /// Requests a dock/undock/remove/save-preset action on a child.
    pub fn intent(&mut self, action: &str, child_id: WidgetId) -> Result<(), SandboxError> {
        self.check_permission(Permission::Intent)?;
        self.send(GuestMessage::Intent {
            action: action.to_string(),
            child_id,
        })
    }

    /// Resolves an asset path against the configured base URL.
    pub fn asset_url(&self, path: &str) -> Result<String, SandboxError> {
        self.check_permission(Permission::AssetsRead)?;
        if path.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(SandboxError::InvalidPayload(format!(
                "asset path '{path}' escapes the asset root"
            )));
        }
        let base = self.asset_base_url.as_deref().unwrap_or_default();
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    /// Forwards a log line to the host when debugging is enabled.
    pub fn debug_log(&mut self, message: &str) -> Result<(), SandboxError> {
        self.check_permission(Permission::DebugLog)?;
        if !self.debug_enabled {
            return Ok(());
        }
        self.send(GuestMessage::DebugLog {
            message: message.to_string(),
        })
    }

    pub fn check_permission(&self, permission: Permission) -> Result<(), SandboxError> {
        if self.permissions.is_granted(permission) {
            Ok(())
        } else {
            Err(SandboxError::PermissionDenied {
                widget_id: self.widget_id.clone(),
                permission: permission.name().to_string(),
            })
        }
    }

    /// Applies a host message to the API's view before the guest sees it.
    pub(crate) fn apply_host(&mut self, message: &HostMessage) {
        match message {
            HostMessage::Init {
                state,
                width,
                height,
                ..
            } => {
                self.state = state.clone();
                self.width = *width;
                self.height = *height;
            }
            HostMessage::Resize { width, height } => {
                self.width = *width;
                self.height = *height;
            }
            HostMessage::SetState { patch, .. } => merge_patch(&mut self.state, patch),
            HostMessage::Event { .. } => {}
        }
    }

    /// Reports the current state after a host `set_state` was applied,
    /// echoing the push's sequence number.
    pub(crate) fn acknowledge_state(&mut self, seq: Option<u64>) {
        let state = self.state.clone();
        if let Err(e) = self.send(GuestMessage::StateChanged { state, ack: seq }) {
            debug!(widget_id = %self.widget_id, error = %e, "State acknowledgement not delivered");
        }
    }

    /// Decodes and applies a raw message posted by guest code. Anything
    /// malformed, oversized or not permitted is dropped with a warning.
    pub(crate) fn accept_raw(&mut self, bytes: &[u8]) {
        if let Err(e) = self.payload_limits.check_len(bytes.len()) {
            warn!(widget_id = %self.widget_id, error = %e, "Dropping oversized guest message");
            return;
        }
        let message: GuestMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(widget_id = %self.widget_id, error = %e, "Dropping malformed guest message");
                return;
            }
        };
        if let Err(e) = self.accept(message) {
            warn!(widget_id = %self.widget_id, error = %e, "Dropping guest message");
        }
    }

    pub(crate) fn accept(&mut self, message: GuestMessage) -> Result<(), SandboxError> {
        match message {
            GuestMessage::Output { port, value } => self.output(&port, value),
            // Guest code cannot acknowledge host pushes.
            GuestMessage::StateChanged { state, .. } => self.replace_state(state),
            GuestMessage::SetState { patch } => self.set_state(patch),
            GuestMessage::EmitEvent {
                event_type,
                payload,
                target,
            } => self.emit_event(&event_type, payload, target),
            GuestMessage::Intent { action, child_id } => self.intent(&action, child_id),
            GuestMessage::DebugLog { message } => self.debug_log(&message),
        }
    }

    fn send(&self, message: GuestMessage) -> Result<(), SandboxError> {
        self.outbox
            .send(message)
            .map_err(|_| SandboxError::ChannelClosed(self.widget_id.clone()))
    }
}

// ================================================================
// Native guests
// ================================================================

type NativeConstructor = Arc<dyn Fn() -> Box<dyn WidgetGuest> + Send + Sync>;

/// Guests implemented in Rust and registered by widget definition id.
#[derive(Default, Clone)]
pub struct NativeGuestRegistry {
    constructors: Arc<RwLock<HashMap<WidgetDefId, NativeConstructor>>>,
}

impl NativeGuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, def_id: impl Into<WidgetDefId>, constructor: F)
    where
        F: Fn() -> Box<dyn WidgetGuest> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(def_id.into(), Arc::new(constructor));
    }

    pub fn contains(&self, def_id: &WidgetDefId) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(def_id)
    }

    fn constructor(&self, def_id: &WidgetDefId) -> Option<NativeConstructor> {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(def_id)
            .cloned()
    }
}

struct NativeFactory {
    constructor: NativeConstructor,
}

impl GuestFactory for NativeFactory {
    fn instantiate(self: Box<Self>, _widget_id: &WidgetId) -> Result<Box<dyn WidgetGuest>, GuestFault> {
        Ok((self.constructor)())
    }
}

impl GuestLoader for NativeGuestRegistry {
    fn prepare(
        &self,
        manifest: &WidgetManifest,
        _generated_code: Option<&str>,
        _limits: &SandboxLimits,
    ) -> Result<Box<dyn GuestFactory>, SandboxError> {
        let constructor = self
            .constructor(&manifest.id)
            .ok_or_else(|| SandboxError::GuestLoad {
                def_id: manifest.id.clone(),
                message: "no native guest registered".into(),
            })?;
        Ok(Box::new(NativeFactory { constructor }))
    }
}

/// Prefers a registered native guest, otherwise compiles the wasm entry.
pub struct HostLoader {
    native: NativeGuestRegistry,
    wasm: WasmGuestLoader,
}

impl HostLoader {
    pub fn new(native: NativeGuestRegistry, wasm: WasmGuestLoader) -> Self {
        Self { native, wasm }
    }

    pub fn native(&self) -> &NativeGuestRegistry {
        &self.native
    }
}

impl GuestLoader for HostLoader {
    fn prepare(
        &self,
        manifest: &WidgetManifest,
        generated_code: Option<&str>,
        limits: &SandboxLimits,
    ) -> Result<Box<dyn GuestFactory>, SandboxError> {
        if generated_code.is_none() && self.native.contains(&manifest.id) {
            return self.native.prepare(manifest, None, limits);
        }
        self.wasm.prepare(manifest, generated_code, limits)
    }
}
