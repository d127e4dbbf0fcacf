//! Canvas runtime: owns the free-floating instances, their sandboxes and
//! the pipeline graph, and keeps the three in step.

use crate::config::HostConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::pipeline::{
    derive_ports, ConnectionDrag, PipelineGraph, PipelineRouter, Port, SandboxDirectory,
};
use crate::registry::ManifestRegistry;
use crate::store::{CanvasStore, StateStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use weft_bus::{BusEvent, EventBus, EventKind, Subscription};
use weft_types::{
    CanvasId, CanvasSnapshot, ConnectionId, PipelineConnection, PortDirection, WidgetId,
    WidgetInstance,
};
use weft_widget_host::{
    GuestLoader, SandboxConfig, SandboxHandle, WidgetContainer, WidgetPolicy, WidgetSandbox,
};

/// Everything a context needs from its surroundings.
pub struct RuntimeDeps {
    pub bus: Arc<EventBus>,
    pub state_store: Arc<dyn StateStore>,
    pub manifests: Arc<ManifestRegistry>,
    pub loader: Arc<dyn GuestLoader>,
    pub config: HostConfig,
}

/// A live sandboxed instance and the container it is mounted into.
pub struct MountedWidget {
    sandbox: WidgetSandbox,
    container: Arc<WidgetContainer>,
}

impl MountedWidget {
    pub fn sandbox(&self) -> &WidgetSandbox {
        &self.sandbox
    }

    pub fn container(&self) -> &Arc<WidgetContainer> {
        &self.container
    }

    pub fn handle(&self) -> SandboxHandle {
        self.sandbox.handle()
    }
}

/// Outcome of one [`RuntimeContext::reconcile`] pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub mounted: Vec<WidgetId>,
    pub destroyed: Vec<WidgetId>,
    /// Native-kind instances, which are rendered by the host and never mounted.
    pub native: Vec<WidgetId>,
    pub failed: Vec<(WidgetId, String)>,
}

impl ReconcileReport {
    /// True if the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.mounted.is_empty() && self.destroyed.is_empty() && self.failed.is_empty()
    }
}

enum Prepared {
    Sandbox(WidgetSandbox),
    Native,
}

pub(crate) type PendingAcks = Arc<Mutex<HashMap<WidgetId, u64>>>;

pub struct RuntimeContext {
    pub(crate) canvas_id: CanvasId,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) state_store: Arc<dyn StateStore>,
    pub(crate) manifests: Arc<ManifestRegistry>,
    loader: Arc<dyn GuestLoader>,
    config: HostConfig,
    policy: Arc<WidgetPolicy>,
    creator_id: Option<String>,
    pub(crate) generated_code: HashMap<WidgetId, String>,
    pub(crate) instances: Vec<WidgetInstance>,
    pub(crate) mounted: HashMap<WidgetId, MountedWidget>,
    directory: SandboxDirectory,
    pub(crate) graph: PipelineGraph,
    router: PipelineRouter,
    /// Latest unacknowledged push sequence per container.
    pub(crate) pending_acks: PendingAcks,
    pub(crate) push_seq: u64,
    state_subscription: Subscription,
}

impl RuntimeContext {
    pub fn new(canvas_id: CanvasId, deps: RuntimeDeps) -> Self {
        let RuntimeDeps {
            bus,
            state_store,
            manifests,
            loader,
            config,
        } = deps;
        let directory = SandboxDirectory::default();
        let router = PipelineRouter::attach(&bus, Arc::clone(&directory));
        let pending_acks = PendingAcks::default();

        let store = Arc::clone(&state_store);
        let pending = Arc::clone(&pending_acks);
        let live = Arc::clone(&directory);
        let state_subscription = bus.on(EventKind::WidgetStateChanged, move |event| {
            let Some(widget_id) = event.source_widget_id.as_ref() else {
                return Ok(());
            };
            if !live
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(widget_id)
            {
                debug!(widget_id = %widget_id, "Ignoring state from a widget that is not placed");
                return Ok(());
            }
            let Some(state) = accept_state(event, store.as_ref(), &pending) else {
                return Ok(());
            };
            store
                .save(widget_id, state)
                .map_err(|e| anyhow::anyhow!("failed to persist state of {widget_id}: {e}"))
        });

        info!(canvas_id = %canvas_id, "Runtime context created");
        Self {
            canvas_id,
            bus,
            state_store,
            manifests,
            loader,
            policy: Arc::new(config.widget_policy()),
            config,
            push_seq: 0,
            creator_id: None,
            generated_code: HashMap::new(),
            instances: Vec::new(),
            mounted: HashMap::new(),
            directory,
            graph: PipelineGraph::new(),
            router,
            pending_acks,
            state_subscription,
        }
    }

    /// Attributes widget debug logs to `creator_id`.
    pub fn with_creator(mut self, creator_id: impl Into<String>) -> Self {
        self.creator_id = Some(creator_id.into());
        self
    }

    /// Applies a standalone policy file in place of the `[policy]` table.
    /// Takes effect for sandboxes built from now on.
    pub fn with_policy_file(mut self, path: &Path) -> Self {
        let policy = WidgetPolicy::load_from(path);
        self.config.policy = policy.config().clone();
        self.policy = Arc::new(policy);
        self
    }

    pub fn canvas_id(&self) -> &CanvasId {
        &self.canvas_id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Compiles `code` instead of the manifest entry the next time this
    /// instance is mounted.
    pub fn set_generated_code(&mut self, widget_id: WidgetId, code: impl Into<String>) {
        self.generated_code.insert(widget_id, code.into());
    }

    pub fn generated_code(&self, widget_id: &WidgetId) -> Option<&str> {
        self.generated_code.get(widget_id).map(String::as_str)
    }

    // ================================================================
    // Reconciliation
    // ================================================================

    /// Brings the mounted set in line with the instance list.
    ///
    /// Existing mounts are kept, stale ones destroyed, new sandboxed
    /// instances built and then mounted after one scheduler turn.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let desired: HashSet<&WidgetId> = self.instances.iter().map(|i| &i.id).collect();
        let stale: Vec<WidgetId> = self
            .mounted
            .keys()
            .filter(|id| !desired.contains(id))
            .cloned()
            .collect();
        for id in stale {
            self.unmount(&id);
            report.destroyed.push(id);
        }

        let mut pending = Vec::new();
        for instance in &self.instances {
            if self.mounted.contains_key(&instance.id) {
                continue;
            }
            match self.prepare(instance) {
                Ok(Prepared::Sandbox(sandbox)) => {
                    let container = Arc::new(WidgetContainer::new(instance.id.clone()));
                    pending.push((instance.id.clone(), sandbox, container));
                }
                Ok(Prepared::Native) => report.native.push(instance.id.clone()),
                Err(e) => {
                    warn!(widget_id = %instance.id, "Failed to build sandbox: {}", e);
                    report.failed.push((instance.id.clone(), e.to_string()));
                }
            }
        }

        // Containers exist before anything is attached to them.
        tokio::task::yield_now().await;

        for (id, mut sandbox, container) in pending {
            // Listed before the guest starts so its first state report lands.
            self.directory
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), sandbox.handle());
            match sandbox.mount(&container) {
                Ok(()) => {
                    self.mounted
                        .insert(id.clone(), MountedWidget { sandbox, container });
                    report.mounted.push(id);
                }
                Err(e) => {
                    warn!(widget_id = %id, "Failed to mount sandbox: {}", e);
                    self.directory
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                    sandbox.destroy();
                    container.dispose();
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        if !report.is_noop() {
            info!(
                canvas_id = %self.canvas_id,
                mounted = report.mounted.len(),
                destroyed = report.destroyed.len(),
                failed = report.failed.len(),
                "Canvas reconciled"
            );
        }
        report
    }

    fn prepare(&self, instance: &WidgetInstance) -> RuntimeResult<Prepared> {
        let manifest = self
            .manifests
            .get(&instance.widget_def_id)
            .ok_or_else(|| RuntimeError::UnknownManifest(instance.widget_def_id.clone()))?;
        if !manifest.is_sandboxed() {
            return Ok(Prepared::Native);
        }
        let mut live = instance.clone();
        live.state = self.live_state(instance);

        let mut config = SandboxConfig::new(live, Some(manifest));
        config.asset_base_url = self.config.asset_base_for(instance.widget_def_id.as_str());
        config.debug_enabled = self.config.sandbox.debug;
        config.generated_code = self.generated_code.get(&instance.id).cloned();
        config.creator_id = self.creator_id.clone();
        config.limits = self.config.limits();
        config.policy = Arc::clone(&self.policy);

        let sandbox = WidgetSandbox::from_config(config, Arc::clone(&self.bus), self.loader.as_ref())?;
        Ok(Prepared::Sandbox(sandbox))
    }

    fn unmount(&mut self, widget_id: &WidgetId) {
        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(widget_id);
        if let Some(MountedWidget {
            mut sandbox,
            container,
        }) = self.mounted.remove(widget_id)
        {
            sandbox.destroy();
            container.dispose();
        }
        // A report raced ahead of the teardown; drop it with the widget.
        if self.instance(widget_id).is_none() {
            self.forget_state(widget_id);
        }
    }

    /// Latest known state: the store's copy if any, else the instance's.
    pub(crate) fn live_state(&self, instance: &WidgetInstance) -> Value {
        match self.state_store.load(&instance.id) {
            Ok(Some(state)) => state,
            Ok(None) => instance.state.clone(),
            Err(e) => {
                warn!(widget_id = %instance.id, "Failed to load state: {}", e);
                instance.state.clone()
            }
        }
    }

    // ================================================================
    // Instances
    // ================================================================

    pub fn instances(&self) -> &[WidgetInstance] {
        &self.instances
    }

    pub fn instance(&self, widget_id: &WidgetId) -> Option<&WidgetInstance> {
        self.instances.iter().find(|i| &i.id == widget_id)
    }

    pub(crate) fn instance_mut(&mut self, widget_id: &WidgetId) -> Option<&mut WidgetInstance> {
        self.instances.iter_mut().find(|i| &i.id == widget_id)
    }

    pub fn mounted(&self, widget_id: &WidgetId) -> Option<&MountedWidget> {
        self.mounted.get(widget_id)
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.len()
    }

    pub fn handle(&self, widget_id: &WidgetId) -> Option<SandboxHandle> {
        self.mounted.get(widget_id).map(MountedWidget::handle)
    }

    /// Places an instance on the canvas. It is mounted on the next reconcile.
    pub fn add_instance(&mut self, instance: WidgetInstance) -> RuntimeResult<()> {
        if self.instance(&instance.id).is_some() {
            return Err(RuntimeError::DuplicateInstance(instance.id));
        }
        debug!(widget_id = %instance.id, widget = %instance.widget_def_id, "Instance added");
        // Re-placed before its old sandbox was torn down.
        if let Some(mounted) = self.mounted.get(&instance.id) {
            self.directory
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(instance.id.clone(), mounted.handle());
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Takes an instance off the canvas along with its connections. Its
    /// sandbox is destroyed on the next reconcile.
    pub fn remove_instance(&mut self, widget_id: &WidgetId) -> RuntimeResult<WidgetInstance> {
        let index = self
            .instances
            .iter()
            .position(|i| &i.id == widget_id)
            .ok_or_else(|| RuntimeError::UnknownWidget(widget_id.clone()))?;
        let instance = self.instances.remove(index);
        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(widget_id);
        self.drop_connections(widget_id);
        self.forget_state(widget_id);
        self.generated_code.remove(widget_id);
        debug!(widget_id = %widget_id, "Instance removed");
        Ok(instance)
    }

    /// Moves or resizes an instance. A size change is pushed to its sandbox.
    pub fn update_geometry(
        &mut self,
        widget_id: &WidgetId,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> RuntimeResult<()> {
        let instance = self
            .instance_mut(widget_id)
            .ok_or_else(|| RuntimeError::UnknownWidget(widget_id.clone()))?;
        let resized = instance.width != width || instance.height != height;
        instance.x = x;
        instance.y = y;
        instance.width = width;
        instance.height = height;
        if resized && let Some(mounted) = self.mounted.get(widget_id) {
            mounted.handle().resize(width, height)?;
        }
        Ok(())
    }

    pub(crate) fn forget_state(&self, widget_id: &WidgetId) {
        if let Err(e) = self.state_store.remove(widget_id) {
            warn!(widget_id = %widget_id, "Failed to drop state: {}", e);
        }
        self.pending_acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(widget_id);
    }

    // ================================================================
    // Pipeline
    // ================================================================

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Ports of a free-floating instance, derived from its manifest.
    pub fn ports(&self, widget_id: &WidgetId) -> Vec<Port> {
        self.instance(widget_id)
            .and_then(|instance| {
                self.manifests
                    .get(&instance.widget_def_id)
                    .map(|manifest| derive_ports(instance, &manifest))
            })
            .unwrap_or_default()
    }

    pub fn port(&self, widget_id: &WidgetId, direction: PortDirection, port_id: &str) -> Option<Port> {
        self.ports(widget_id)
            .into_iter()
            .find(|p| p.direction == direction && p.port_id == port_id)
    }

    /// Connects `source.source_port` to `target.target_port` if valid.
    pub fn connect(
        &mut self,
        source: &WidgetId,
        source_port: &str,
        target: &WidgetId,
        target_port: &str,
    ) -> Option<PipelineConnection> {
        let source = self.port(source, PortDirection::Output, source_port)?;
        let target = self.port(target, PortDirection::Input, target_port)?;
        let connection = self.graph.connect(&source, &target)?;
        self.graph_changed(EventKind::ConnectionAdded, &connection);
        Some(connection)
    }

    pub fn begin_drag(&self, widget_id: &WidgetId, port_id: &str) -> Option<ConnectionDrag> {
        ConnectionDrag::begin(self.port(widget_id, PortDirection::Output, port_id)?)
    }

    /// Finishes a drag over `target`, connecting only if valid now. Both
    /// ends must be ports of instances on this canvas.
    pub fn release_drag(&mut self, drag: ConnectionDrag, target: &Port) -> Option<PipelineConnection> {
        let source = drag.source();
        let source = self.port(&source.widget_id, source.direction, &source.port_id)?;
        let target = self.port(&target.widget_id, target.direction, &target.port_id)?;
        let connection = ConnectionDrag::begin(source)?.release(&target, &mut self.graph)?;
        self.graph_changed(EventKind::ConnectionAdded, &connection);
        Some(connection)
    }

    pub fn disconnect(&mut self, id: &ConnectionId) -> Option<PipelineConnection> {
        let connection = self.graph.disconnect(id)?;
        self.graph_changed(EventKind::ConnectionRemoved, &connection);
        Some(connection)
    }

    pub(crate) fn drop_connections(&mut self, widget_id: &WidgetId) {
        for connection in self.graph.remove_widget(widget_id) {
            self.graph_changed(EventKind::ConnectionRemoved, &connection);
        }
    }

    fn graph_changed(&self, kind: EventKind, connection: &PipelineConnection) {
        self.router.update(&self.graph);
        let payload = serde_json::to_value(connection).unwrap_or(Value::Null);
        self.bus.emit(BusEvent::new(kind, payload));
    }

    // ================================================================
    // Persistence
    // ================================================================

    /// Instances with their live state, plus connections.
    pub fn snapshot(&self) -> CanvasSnapshot {
        let instances = self
            .instances
            .iter()
            .map(|instance| {
                let mut instance = instance.clone();
                instance.state = self.live_state(&instance);
                instance
            })
            .collect();
        let generated_code = self
            .generated_code
            .iter()
            .filter(|(id, _)| self.instance(id).is_some())
            .map(|(id, code)| (id.clone(), code.clone()))
            .collect();
        CanvasSnapshot {
            canvas_id: self.canvas_id.clone(),
            instances,
            connections: self.graph.connections().to_vec(),
            generated_code,
        }
    }

    /// Replaces the instance list and graph with a persisted canvas.
    ///
    /// Connections are revalidated against the current manifests; invalid
    /// ones are dropped. Returns how many were dropped. Call
    /// [`RuntimeContext::reconcile`] afterwards to mount.
    pub fn load_snapshot(&mut self, snapshot: CanvasSnapshot) -> RuntimeResult<usize> {
        if snapshot.canvas_id != self.canvas_id {
            return Err(RuntimeError::CanvasMismatch {
                expected: self.canvas_id.clone(),
                found: snapshot.canvas_id,
            });
        }
        for instance in &snapshot.instances {
            self.state_store.save(&instance.id, instance.state.clone())?;
        }
        self.instances = snapshot.instances;
        self.generated_code = snapshot.generated_code.into_iter().collect();

        self.graph.clear();
        let mut dropped = 0;
        for connection in snapshot.connections {
            let source = self.port(
                &connection.source_widget_id,
                PortDirection::Output,
                &connection.source_port,
            );
            let target = self.port(
                &connection.target_widget_id,
                PortDirection::Input,
                &connection.target_port,
            );
            let restored = match (source, target) {
                (Some(source), Some(target)) => {
                    self.graph.restore(connection.clone(), &source, &target)
                }
                _ => false,
            };
            if !restored {
                warn!(connection_id = %connection.id, "Dropping invalid connection from snapshot");
                dropped += 1;
            }
        }
        self.router.update(&self.graph);
        info!(
            canvas_id = %self.canvas_id,
            instances = self.instances.len(),
            connections = self.graph.len(),
            dropped,
            "Snapshot loaded"
        );
        Ok(dropped)
    }

    pub fn persist(&self, store: &dyn CanvasStore) -> RuntimeResult<()> {
        store.save(&self.snapshot())
    }

    /// Loads this canvas from `store`. Returns false if nothing was stored.
    pub fn restore(&mut self, store: &dyn CanvasStore) -> RuntimeResult<bool> {
        match store.load(&self.canvas_id)? {
            Some(snapshot) => {
                self.load_snapshot(snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Destroys every sandbox. Instances and connections are kept.
    pub fn shutdown(&mut self) {
        let ids: Vec<WidgetId> = self.mounted.keys().cloned().collect();
        for id in &ids {
            self.unmount(id);
        }
        info!(canvas_id = %self.canvas_id, destroyed = ids.len(), "Runtime context shut down");
    }
}

/// Decides what a `widget:stateChanged` writes to the store. While a dock
/// push is unacknowledged only an ack for it (or a later push) is taken
/// whole; anything else keeps the pushed `children`.
fn accept_state(event: &BusEvent, store: &dyn StateStore, pending: &PendingAcks) -> Option<Value> {
    let widget_id = event.source_widget_id.as_ref()?;
    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(&awaited) = pending.get(widget_id) else {
        return Some(event.payload.clone());
    };
    if event.ack.is_some_and(|seq| seq >= awaited) {
        pending.remove(widget_id);
        debug!(widget_id = %widget_id, seq = awaited, "Container state acknowledged");
        return Some(event.payload.clone());
    }

    let Value::Object(mut state) = event.payload.clone() else {
        debug!(widget_id = %widget_id, "Ignoring non-object state while a push is pending");
        return None;
    };
    let pushed = match store.load(widget_id) {
        Ok(stored) => stored.and_then(|s| s.get("children").cloned()),
        Err(e) => {
            warn!(widget_id = %widget_id, "Failed to load pushed state: {}", e);
            return None;
        }
    };
    match pushed {
        Some(children) => state.insert("children".to_string(), children),
        None => state.remove("children"),
    };
    debug!(widget_id = %widget_id, awaited, ack = ?event.ack, "Kept pushed children over unacknowledged state");
    Some(Value::Object(state))
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        self.state_subscription.unsubscribe();
        self.router.detach();
    }
}
