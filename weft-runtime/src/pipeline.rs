//! Typed port graph between widgets and the subscriber that routes values
//! along it.
//!
//! Ports are derived from manifests and never persisted. A connection always
//! runs from an output port of one widget to a compatible input port of a
//! different widget; anything else is refused without side effects.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};
use weft_bus::{BusEvent, EventBus, EventKind, Subscription};
use weft_types::{
    Capability, ConnectionId, DataType, PipelineConnection, PortDirection, WidgetId,
    WidgetInstance, WidgetManifest,
};
use weft_widget_host::SandboxHandle;

/// Live sandbox handles by widget id, shared with the router.
pub type SandboxDirectory = Arc<RwLock<HashMap<WidgetId, SandboxHandle>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub widget_id: WidgetId,
    pub port_id: String,
    pub direction: PortDirection,
    pub data_type: DataType,
    pub capability: Option<Capability>,
}

/// One port per manifest input and output, inputs first.
pub fn derive_ports(instance: &WidgetInstance, manifest: &WidgetManifest) -> Vec<Port> {
    let inputs = manifest
        .io
        .inputs
        .iter()
        .map(|spec| (PortDirection::Input, spec));
    let outputs = manifest
        .io
        .outputs
        .iter()
        .map(|spec| (PortDirection::Output, spec));
    inputs
        .chain(outputs)
        .map(|(direction, spec)| Port {
            widget_id: instance.id.clone(),
            port_id: spec.id.clone(),
            direction,
            data_type: spec.data_type,
            capability: spec.capability.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    connections: Vec<PipelineConnection>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> &[PipelineConnection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_valid_connection(&self, source: &Port, target: &Port) -> bool {
        if source.widget_id == target.widget_id {
            return false;
        }
        if source.direction != PortDirection::Output || target.direction != PortDirection::Input {
            return false;
        }
        if !source.data_type.is_compatible_with(target.data_type) {
            return false;
        }
        !self.connections.iter().any(|c| {
            c.source_widget_id == source.widget_id
                && c.source_port == source.port_id
                && c.target_widget_id == target.widget_id
                && c.target_port == target.port_id
        })
    }

    /// Adds a connection if it is valid. Invalid requests are refused silently.
    pub fn connect(&mut self, source: &Port, target: &Port) -> Option<PipelineConnection> {
        if !self.is_valid_connection(source, target) {
            debug!(
                source = %source.widget_id,
                source_port = %source.port_id,
                target = %target.widget_id,
                target_port = %target.port_id,
                "Connection refused"
            );
            return None;
        }
        let connection = PipelineConnection::new(
            source.widget_id.clone(),
            &source.port_id,
            target.widget_id.clone(),
            &target.port_id,
        );
        self.connections.push(connection.clone());
        Some(connection)
    }

    /// Re-admits a persisted connection, keeping its id, if its endpoints
    /// are the given ports and it is still valid.
    pub fn restore(&mut self, connection: PipelineConnection, source: &Port, target: &Port) -> bool {
        let endpoints_match = connection.source_widget_id == source.widget_id
            && connection.source_port == source.port_id
            && connection.target_widget_id == target.widget_id
            && connection.target_port == target.port_id;
        if !endpoints_match
            || !self.is_valid_connection(source, target)
            || self.connections.iter().any(|c| c.id == connection.id)
        {
            return false;
        }
        self.connections.push(connection);
        true
    }

    pub fn disconnect(&mut self, id: &ConnectionId) -> Option<PipelineConnection> {
        let index = self.connections.iter().position(|c| &c.id == id)?;
        Some(self.connections.remove(index))
    }

    /// Drops every connection touching `widget_id` and returns them.
    pub fn remove_widget(&mut self, widget_id: &WidgetId) -> Vec<PipelineConnection> {
        let (removed, kept) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.touches(widget_id));
        self.connections = kept;
        removed
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}

/// An in-progress connection gesture started from an output port.
#[derive(Debug, Clone)]
pub struct ConnectionDrag {
    source: Port,
}

impl ConnectionDrag {
    /// Starts a drag. Only output ports can start one.
    pub fn begin(source: Port) -> Option<Self> {
        (source.direction == PortDirection::Output).then_some(Self { source })
    }

    pub fn source(&self) -> &Port {
        &self.source
    }

    /// Whether releasing over `target` would connect. No side effects.
    pub fn hover(&self, target: &Port, graph: &PipelineGraph) -> bool {
        graph.is_valid_connection(&self.source, target)
    }

    /// Ends the drag over `target`, connecting only if valid right now.
    pub fn release(self, target: &Port, graph: &mut PipelineGraph) -> Option<PipelineConnection> {
        graph.connect(&self.source, target)
    }

    pub fn cancel(self) {}
}

type RoutingTable = HashMap<(WidgetId, String), Vec<(WidgetId, String)>>;

/// Forwards `widget:output` values along pipeline connections.
///
/// Holds its own routing table, replaced wholesale by [`PipelineRouter::update`]
/// whenever the graph changes.
pub struct PipelineRouter {
    table: Arc<RwLock<RoutingTable>>,
    subscription: Subscription,
}

impl PipelineRouter {
    pub fn attach(bus: &EventBus, directory: SandboxDirectory) -> Self {
        let table: Arc<RwLock<RoutingTable>> = Arc::default();
        let routes = Arc::clone(&table);
        let subscription = bus.on(EventKind::WidgetOutput, move |event| {
            route(event, &routes, &directory);
            Ok(())
        });
        Self {
            table,
            subscription,
        }
    }

    pub fn update(&self, graph: &PipelineGraph) {
        let mut table = RoutingTable::new();
        for c in graph.connections() {
            table
                .entry((c.source_widget_id.clone(), c.source_port.clone()))
                .or_default()
                .push((c.target_widget_id.clone(), c.target_port.clone()));
        }
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    /// Number of distinct (widget, output port) sources with routes.
    pub fn route_count(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }
}

fn route(event: &BusEvent, table: &RwLock<RoutingTable>, directory: &SandboxDirectory) {
    let (Some(source), Some(port)) = (event.source_widget_id.as_ref(), event.output_port()) else {
        return;
    };
    let Some(targets) = table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(source.clone(), port.to_string()))
        .cloned()
    else {
        return;
    };
    let value = event.output_value().cloned().unwrap_or(Value::Null);
    let directory = directory.read().unwrap_or_else(PoisonError::into_inner);
    for (target, target_port) in targets {
        let Some(handle) = directory.get(&target) else {
            debug!(source = %source, target = %target, "Route target has no live sandbox");
            continue;
        };
        let mut patch = Map::new();
        patch.insert(target_port.clone(), value.clone());
        match handle.set_state(Value::Object(patch)) {
            Ok(()) => debug!(
                source = %source,
                port = %port,
                target = %target,
                target_port = %target_port,
                "Routed output"
            ),
            Err(e) => warn!(target = %target, "Failed to route output: {}", e),
        }
    }
}
