//! Individual widget sandbox: one isolation boundary per widget instance.
//!
//! A `WidgetSandbox` is built from a [`SandboxConfig`] without running any
//! widget code. `mount` claims a host-side [`WidgetContainer`], starts the
//! guest on its own OS thread and spawns a pump task that turns guest
//! messages into bus events. `destroy` tears everything down and may be
//! called any number of times.

use crate::container::WidgetContainer;
use crate::error::SandboxError;
use crate::guest::{GuestApi, GuestApiParts, GuestFactory, GuestLoader, WidgetGuest};
use crate::limits::SandboxLimits;
use crate::payload::PayloadLimits;
use crate::permissions::{Permission, PermissionSet};
use crate::policy::WidgetPolicy;
use crate::protocol::{GuestMessage, HostMessage};
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use weft_bus::{BusEvent, EventBus, EventKind, EventScope, Subscription, Topic};
use weft_types::{WidgetId, WidgetInstance, WidgetManifest};

/// Lifecycle of a sandbox. `Destroyed` is reachable from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPhase {
    Unmounted,
    Mounting,
    Mounted,
    Destroyed,
}

/// Everything needed to build one sandbox.
#[derive(Clone)]
pub struct SandboxConfig {
    pub widget_instance: WidgetInstance,
    pub manifest: Option<Arc<WidgetManifest>>,
    pub asset_base_url: Option<String>,
    pub debug_enabled: bool,
    /// User-authored guest code compiled instead of the manifest entry.
    pub generated_code: Option<String>,
    /// Attribution for debug logs only.
    pub creator_id: Option<String>,
    pub limits: SandboxLimits,
    pub policy: Arc<WidgetPolicy>,
}

impl SandboxConfig {
    pub fn new(widget_instance: WidgetInstance, manifest: Option<Arc<WidgetManifest>>) -> Self {
        Self {
            widget_instance,
            manifest,
            asset_base_url: None,
            debug_enabled: false,
            generated_code: None,
            creator_id: None,
            limits: SandboxLimits::default(),
            policy: Arc::new(WidgetPolicy::unrestricted()),
        }
    }
}

pub(crate) enum Inbound {
    Message(HostMessage),
    Shutdown,
}

fn lock_phase(phase: &Mutex<SandboxPhase>) -> std::sync::MutexGuard<'_, SandboxPhase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable sender for host → widget messages.
///
/// Messages sent before mount are queued and delivered after `Init`.
#[derive(Clone)]
pub struct SandboxHandle {
    widget_id: WidgetId,
    inbox: mpsc::UnboundedSender<Inbound>,
    phase: Arc<Mutex<SandboxPhase>>,
    payload_limits: PayloadLimits,
}

impl SandboxHandle {
    pub fn widget_id(&self) -> &WidgetId {
        &self.widget_id
    }

    pub fn phase(&self) -> SandboxPhase {
        *lock_phase(&self.phase)
    }

    /// Merges `patch` into the widget's state. The patch must be a JSON
    /// object within the payload limits.
    pub fn set_state(&self, patch: Value) -> Result<(), SandboxError> {
        self.payload_limits.check_patch(&patch)?;
        self.send(HostMessage::SetState { patch, seq: None })
    }

    /// Like [`SandboxHandle::set_state`], but the widget's acknowledging
    /// `widget:stateChanged` carries `seq` in [`BusEvent::ack`].
    pub fn push_state(&self, patch: Value, seq: u64) -> Result<(), SandboxError> {
        self.payload_limits.check_patch(&patch)?;
        self.send(HostMessage::SetState {
            patch,
            seq: Some(seq),
        })
    }

    pub fn resize(&self, width: f64, height: f64) -> Result<(), SandboxError> {
        self.send(HostMessage::Resize { width, height })
    }

    fn send(&self, message: HostMessage) -> Result<(), SandboxError> {
        if self.phase() == SandboxPhase::Destroyed {
            return Err(SandboxError::AlreadyDestroyed(self.widget_id.clone()));
        }
        debug!(widget_id = %self.widget_id, message = ?message, "Host message queued");
        self.inbox
            .send(Inbound::Message(message))
            .map_err(|_| SandboxError::ChannelClosed(self.widget_id.clone()))
    }
}

/// Live pieces of a mounted sandbox.
struct Running {
    container: Arc<WidgetContainer>,
    pump: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

/// One widget instance behind an isolation boundary.
pub struct WidgetSandbox {
    widget_id: WidgetId,
    manifest: Arc<WidgetManifest>,
    instance: WidgetInstance,
    asset_base_url: Option<String>,
    debug_enabled: bool,
    creator_id: Option<String>,
    limits: SandboxLimits,
    permissions: PermissionSet,
    bus: Arc<EventBus>,
    phase: Arc<Mutex<SandboxPhase>>,
    factory: Option<Box<dyn GuestFactory>>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    guest_alive: Arc<AtomicBool>,
    running: Option<Running>,
}

impl WidgetSandbox {
    /// Validates the configuration and prepares the guest. No widget code
    /// runs until [`WidgetSandbox::mount`].
    pub fn from_config(
        config: SandboxConfig,
        bus: Arc<EventBus>,
        loader: &dyn GuestLoader,
    ) -> Result<Self, SandboxError> {
        let instance = config.widget_instance;
        let manifest = config
            .manifest
            .ok_or_else(|| SandboxError::MissingManifest(instance.widget_def_id.clone()))?;
        manifest.validate()?;
        if manifest.id != instance.widget_def_id {
            return Err(SandboxError::ManifestMismatch {
                widget_id: instance.id.clone(),
                expected: instance.widget_def_id.clone(),
                found: manifest.id.clone(),
            });
        }
        if !manifest.is_sandboxed() {
            return Err(SandboxError::NotSandboxed(manifest.id.clone()));
        }
        if !config.policy.is_widget_allowed(&manifest.id) {
            warn!(widget_id = %instance.id, widget = %manifest.id, "Widget blocked by policy");
            return Err(SandboxError::PolicyDenied(format!(
                "widget '{}' is not allowed",
                manifest.id
            )));
        }

        let permissions = PermissionSet::for_manifest(&manifest, &config.policy);
        let factory = loader.prepare(&manifest, config.generated_code.as_deref(), &config.limits)?;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        info!(
            widget_id = %instance.id,
            widget = %manifest.id,
            version = %manifest.version,
            "Sandbox created"
        );

        Ok(Self {
            widget_id: instance.id.clone(),
            manifest,
            instance,
            asset_base_url: config.asset_base_url,
            debug_enabled: config.debug_enabled,
            creator_id: config.creator_id,
            limits: config.limits,
            permissions,
            bus,
            phase: Arc::new(Mutex::new(SandboxPhase::Unmounted)),
            factory: Some(factory),
            inbox_tx,
            inbox_rx: Some(inbox_rx),
            guest_alive: Arc::new(AtomicBool::new(false)),
            running: None,
        })
    }

    pub fn widget_id(&self) -> &WidgetId {
        &self.widget_id
    }

    pub fn manifest(&self) -> &Arc<WidgetManifest> {
        &self.manifest
    }

    pub fn phase(&self) -> SandboxPhase {
        *lock_phase(&self.phase)
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// True while the guest thread's message loop is running.
    pub fn is_guest_running(&self) -> bool {
        self.guest_alive.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> SandboxHandle {
        SandboxHandle {
            widget_id: self.widget_id.clone(),
            inbox: self.inbox_tx.clone(),
            phase: Arc::clone(&self.phase),
            payload_limits: self.limits.payload,
        }
    }

    /// Attaches the sandbox to `target` and starts the guest.
    ///
    /// A target that already embeds a context, or a sandbox that is already
    /// mounting or mounted, makes this a no-op. A disposed target is a
    /// configuration error.
    pub fn mount(&mut self, target: &Arc<WidgetContainer>) -> Result<(), SandboxError> {
        match self.phase() {
            SandboxPhase::Destroyed => {
                return Err(SandboxError::AlreadyDestroyed(self.widget_id.clone()));
            }
            SandboxPhase::Mounting | SandboxPhase::Mounted => {
                debug!(widget_id = %self.widget_id, "Mount ignored: already mounted");
                return Ok(());
            }
            SandboxPhase::Unmounted => {}
        }
        if target.is_disposed() {
            return Err(SandboxError::MountTargetMissing(self.widget_id.clone()));
        }
        if target.has_embedded_context() || !target.try_embed() {
            debug!(widget_id = %self.widget_id, "Mount ignored: target already embeds a context");
            return Ok(());
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            target.release();
            return Err(SandboxError::NoRuntime(self.widget_id.clone()));
        };
        let (Some(factory), Some(inbox_rx)) = (self.factory.take(), self.inbox_rx.take()) else {
            target.release();
            return Err(SandboxError::AlreadyDestroyed(self.widget_id.clone()));
        };

        *lock_phase(&self.phase) = SandboxPhase::Mounting;

        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let api = GuestApi::new(
            GuestApiParts {
                widget_id: self.widget_id.clone(),
                manifest: Arc::clone(&self.manifest),
                permissions: self.permissions.clone(),
                asset_base_url: self.asset_base_url.clone(),
                debug_enabled: self.debug_enabled,
                payload_limits: self.limits.payload,
            },
            outbox_tx,
        );
        let init = HostMessage::Init {
            instance_id: self.widget_id.clone(),
            state: self.instance.state.clone(),
            width: self.instance.width,
            height: self.instance.height,
            asset_base_url: self.asset_base_url.clone(),
            debug: self.debug_enabled,
        };
        let thread = GuestThread {
            widget_id: self.widget_id.clone(),
            factory,
            api,
            inbox: inbox_rx,
            phase: Arc::clone(&self.phase),
            alive: Arc::clone(&self.guest_alive),
            init,
        };

        self.guest_alive.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name(format!("weft-widget-{}", self.widget_id))
            .spawn(move || thread.run());
        if let Err(e) = spawned {
            self.guest_alive.store(false, Ordering::Release);
            *lock_phase(&self.phase) = SandboxPhase::Destroyed;
            target.release();
            return Err(SandboxError::Spawn(e));
        }

        let pump = runtime.spawn(pump_guest_messages(
            self.widget_id.clone(),
            self.creator_id.clone(),
            Arc::clone(&self.bus),
            outbox_rx,
        ));
        let subscription = self
            .permissions
            .is_granted(Permission::EventsListen)
            .then(|| self.forward_targeted_events());

        self.running = Some(Running {
            container: Arc::clone(target),
            pump: Some(pump),
            subscription,
        });
        self.bus.emit(
            BusEvent::new(EventKind::WidgetMounted, json!({}))
                .from_widget(self.widget_id.clone())
                .with_scope(EventScope::Widget),
        );
        info!(widget_id = %self.widget_id, "Sandbox mounted");
        Ok(())
    }

    /// Delivers bus events addressed to this widget across the boundary.
    fn forward_targeted_events(&self) -> Subscription {
        let widget_id = self.widget_id.clone();
        let inbox = self.inbox_tx.clone();
        self.bus.on(Topic::All, move |event| {
            if event.target_widget_id.as_ref() != Some(&widget_id)
                || event.source_widget_id.as_ref() == Some(&widget_id)
            {
                return Ok(());
            }
            inbox
                .send(Inbound::Message(HostMessage::Event {
                    kind: event.kind.to_string(),
                    payload: event.payload.clone(),
                    source_widget_id: event.source_widget_id.clone(),
                }))
                .map_err(|_| anyhow::anyhow!("sandbox {widget_id} no longer accepts events"))
        })
    }

    /// Tears down the boundary. Safe to call any number of times.
    pub fn destroy(&mut self) {
        {
            let mut phase = lock_phase(&self.phase);
            if *phase == SandboxPhase::Destroyed {
                return;
            }
            *phase = SandboxPhase::Destroyed;
        }
        let _ = self.inbox_tx.send(Inbound::Shutdown);
        self.factory = None;
        self.inbox_rx = None;

        if let Some(mut running) = self.running.take() {
            if let Some(subscription) = running.subscription.take() {
                subscription.unsubscribe();
            }
            if let Some(pump) = running.pump.take() {
                pump.abort();
            }
            running.container.release();
            self.bus.emit(
                BusEvent::new(EventKind::WidgetDestroyed, json!({}))
                    .from_widget(self.widget_id.clone())
                    .with_scope(EventScope::Widget),
            );
        }
        info!(widget_id = %self.widget_id, "Sandbox destroyed");
    }
}

impl Drop for WidgetSandbox {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Turns guest messages into bus traffic on the host side.
async fn pump_guest_messages(
    widget_id: WidgetId,
    creator_id: Option<String>,
    bus: Arc<EventBus>,
    mut outbox: mpsc::UnboundedReceiver<GuestMessage>,
) {
    while let Some(message) = outbox.recv().await {
        match message {
            GuestMessage::Output { port, value } => {
                bus.emit(BusEvent::widget_output(widget_id.clone(), &port, value));
            }
            GuestMessage::StateChanged { state, ack } => {
                let mut event = BusEvent::state_changed(widget_id.clone(), state);
                event.ack = ack;
                bus.emit(event);
            }
            GuestMessage::EmitEvent {
                event_type,
                payload,
                target,
            } => {
                let kind = EventKind::custom(&event_type);
                if !matches!(kind, EventKind::Custom(_)) {
                    warn!(widget_id = %widget_id, kind = %kind, "Widget may not emit built-in event kinds");
                    continue;
                }
                let scope = if target.is_some() {
                    EventScope::Widget
                } else {
                    EventScope::Canvas
                };
                let mut event = BusEvent::new(kind, payload)
                    .from_widget(widget_id.clone())
                    .with_scope(scope);
                event.target_widget_id = target;
                bus.emit(event);
            }
            GuestMessage::Intent { action, child_id } => {
                bus.emit(
                    BusEvent::new(
                        EventKind::WidgetOutput,
                        json!({ "action": action, "child_id": child_id }),
                    )
                    .from_widget(widget_id.clone()),
                );
            }
            GuestMessage::DebugLog { message } => {
                debug!(
                    widget_id = %widget_id,
                    creator_id = creator_id.as_deref().unwrap_or("unknown"),
                    "[widget] {message}"
                );
            }
            GuestMessage::SetState { .. } => {
                // Merged on the guest side before reaching the outbox.
                debug!(widget_id = %widget_id, "Unexpected raw set_state in outbox");
            }
        }
    }
    debug!(widget_id = %widget_id, "Guest outbox closed");
}

/// Owned state moved onto the sandbox thread.
struct GuestThread {
    widget_id: WidgetId,
    factory: Box<dyn GuestFactory>,
    api: GuestApi,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    phase: Arc<Mutex<SandboxPhase>>,
    alive: Arc<AtomicBool>,
    init: HostMessage,
}

struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GuestThread {
    fn run(self) {
        let GuestThread {
            widget_id,
            factory,
            mut api,
            mut inbox,
            phase,
            alive,
            init,
        } = self;
        let _alive = AliveGuard(alive);

        let mut guest = match catch_unwind(AssertUnwindSafe(|| factory.instantiate(&widget_id))) {
            Ok(Ok(guest)) => guest,
            Ok(Err(fault)) => {
                warn!(widget_id = %widget_id, error = %fault, "Widget failed to start");
                return;
            }
            Err(_) => {
                warn!(widget_id = %widget_id, "Widget panicked while starting");
                return;
            }
        };

        {
            let mut phase = lock_phase(&phase);
            if *phase == SandboxPhase::Destroyed {
                drop(phase);
                debug!(widget_id = %widget_id, "Destroyed while mounting; disposing guest");
                dispose(&widget_id, guest.as_mut());
                return;
            }
            *phase = SandboxPhase::Mounted;
        }

        if !deliver(&widget_id, guest.as_mut(), &mut api, &init) {
            return;
        }
        while let Some(inbound) = inbox.blocking_recv() {
            match inbound {
                Inbound::Shutdown => break,
                Inbound::Message(message) => {
                    if !deliver(&widget_id, guest.as_mut(), &mut api, &message) {
                        return;
                    }
                }
            }
        }
        dispose(&widget_id, guest.as_mut());
        debug!(widget_id = %widget_id, "Sandbox loop finished");
    }
}

/// Runs one message through the guest. Returns false if the guest faulted.
fn deliver(
    widget_id: &WidgetId,
    guest: &mut dyn WidgetGuest,
    api: &mut GuestApi,
    message: &HostMessage,
) -> bool {
    api.apply_host(message);
    match catch_unwind(AssertUnwindSafe(|| guest.on_message(message, api))) {
        Ok(Ok(())) => {
            if let HostMessage::SetState { seq, .. } = message {
                api.acknowledge_state(*seq);
            }
            true
        }
        Ok(Err(fault)) => {
            warn!(widget_id = %widget_id, error = %fault, "Widget faulted; sandbox loop stopped");
            false
        }
        Err(_) => {
            warn!(widget_id = %widget_id, "Widget panicked; sandbox loop stopped");
            false
        }
    }
}

fn dispose(widget_id: &WidgetId, guest: &mut dyn WidgetGuest) {
    if catch_unwind(AssertUnwindSafe(|| guest.dispose())).is_err() {
        warn!(widget_id = %widget_id, "Widget panicked during dispose");
    }
}
