//! Container widgets that hold other widgets.
//!
//! A docked child lives only as a [`ChildDescriptor`] inside the container's
//! `state.children`. That array belongs to the container: entries are found,
//! added and removed by `id` and everything else in it is left as found.
//! Every change is pushed to the container sandbox before any collection is
//! touched, so a failed push leaves the canvas unchanged. Each push carries a
//! sequence number; the container's state is authoritative again only once a
//! `widget:stateChanged` acknowledges that push or a later one.

use crate::context::RuntimeContext;
use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::PoisonError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use weft_bus::{BusEvent, EventKind, Subscription};
use weft_types::{WidgetDefId, WidgetId, WidgetInstance};

/// Horizontal gap between a container and a child undocked beside it.
pub const DOCK_GAP: f64 = 20.0;

/// A docked child as stored in its container's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildDescriptor {
    pub id: WidgetId,
    pub name: String,
    pub widget_def_id: WidgetDefId,
    /// The instance as it was when docked; rebuilt from on undock.
    pub saved_instance: WidgetInstance,
    /// Generated guest code the child runs instead of its manifest entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
}

/// A container's request concerning one of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetIntent {
    Dock(WidgetId),
    Undock(WidgetId),
    Remove(WidgetId),
    SavePreset(WidgetId),
}

impl WidgetIntent {
    pub fn parse(action: &str, child_id: WidgetId) -> Option<Self> {
        match action {
            "dock" => Some(Self::Dock(child_id)),
            "undock" => Some(Self::Undock(child_id)),
            "remove" => Some(Self::Remove(child_id)),
            "save_preset" => Some(Self::SavePreset(child_id)),
            _ => None,
        }
    }

    /// Reads an intent from a `widget:output` event carrying
    /// `{action, child_id}`. Returns the emitting container with it.
    pub fn from_event(event: &BusEvent) -> Option<(WidgetId, Self)> {
        if event.kind != EventKind::WidgetOutput {
            return None;
        }
        let container = event.source_widget_id.clone()?;
        let action = event.payload.get("action")?.as_str()?;
        let child_id = event.payload.get("child_id")?.as_str()?;
        Some((container, Self::parse(action, WidgetId::from(child_id))?))
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Dock(_) => "dock",
            Self::Undock(_) => "undock",
            Self::Remove(_) => "remove",
            Self::SavePreset(_) => "save_preset",
        }
    }

    pub fn child_id(&self) -> &WidgetId {
        match self {
            Self::Dock(id) | Self::Undock(id) | Self::Remove(id) | Self::SavePreset(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntentOutcome {
    Docked,
    Undocked(WidgetInstance),
    Removed,
    /// Descriptor handed to whatever layer saves presets.
    Preset(ChildDescriptor),
}

fn child_entries(state: &Value) -> Vec<Value> {
    state
        .get("children")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn is_entry_for(entry: &Value, child_id: &WidgetId) -> bool {
    entry.get("id").and_then(Value::as_str) == Some(child_id.as_str())
}

fn children_in(container_id: &WidgetId, state: &Value) -> Vec<ChildDescriptor> {
    let Some(items) = state.get("children").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(child) => Some(child),
            Err(e) => {
                warn!(container = %container_id, "Ignoring malformed child entry: {}", e);
                None
            }
        })
        .collect()
}

impl RuntimeContext {
    /// Children currently docked in `container_id`.
    pub fn children(&self, container_id: &WidgetId) -> Vec<ChildDescriptor> {
        self.instance(container_id)
            .map(|container| children_in(container_id, &self.live_state(container)))
            .unwrap_or_default()
    }

    /// True once the container has acknowledged the last pushed state.
    pub fn is_state_settled(&self, container_id: &WidgetId) -> bool {
        !self
            .pending_acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(container_id)
    }

    /// Moves a free-floating child into a container.
    pub fn dock(&mut self, container_id: &WidgetId, child_id: &WidgetId) -> RuntimeResult<()> {
        if container_id == child_id {
            return Err(RuntimeError::InvalidDock(format!(
                "'{container_id}' cannot be docked into itself"
            )));
        }
        let container = self
            .instance(container_id)
            .ok_or_else(|| RuntimeError::UnknownWidget(container_id.clone()))?;
        let child = self
            .instance(child_id)
            .ok_or_else(|| RuntimeError::UnknownWidget(child_id.clone()))?;

        let mut saved_instance = child.clone();
        saved_instance.state = self.live_state(child);
        let name = self
            .manifests
            .get(&child.widget_def_id)
            .map(|m| m.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| child.widget_def_id.to_string());
        let descriptor = ChildDescriptor {
            id: child_id.clone(),
            name,
            widget_def_id: child.widget_def_id.clone(),
            saved_instance,
            generated: self.generated_code.get(child_id).cloned(),
        };

        let mut entries = child_entries(&self.live_state(container));
        entries.retain(|entry| !is_entry_for(entry, child_id));
        entries.push(serde_json::to_value(&descriptor)?);

        self.push_children(container_id, entries)?;
        self.instances.retain(|i| &i.id != child_id);
        self.generated_code.remove(child_id);
        info!(container = %container_id, child = %child_id, "Widget docked");
        Ok(())
    }

    /// Takes a child out of a container and places it beside it, above
    /// every other instance.
    pub fn undock(
        &mut self,
        container_id: &WidgetId,
        child_id: &WidgetId,
    ) -> RuntimeResult<WidgetInstance> {
        if self.instance(child_id).is_some() {
            return Err(RuntimeError::DuplicateInstance(child_id.clone()));
        }
        let (descriptor, remaining) = self.take_child(container_id, child_id)?;
        let container = self
            .instance(container_id)
            .ok_or_else(|| RuntimeError::UnknownWidget(container_id.clone()))?;
        let x = container.x + container.width + DOCK_GAP;
        let y = container.y;
        let z_index = self.instances.iter().map(|i| i.z_index).max().unwrap_or(0) + 1;

        self.push_children(container_id, remaining)?;

        let ChildDescriptor {
            saved_instance: mut instance,
            generated,
            ..
        } = descriptor;
        if let Some(code) = generated {
            self.generated_code.insert(child_id.clone(), code);
        }
        instance.canvas_id = self.canvas_id.clone();
        instance.x = x;
        instance.y = y;
        instance.z_index = z_index;
        if let Err(e) = self.state_store.save(&instance.id, instance.state.clone()) {
            warn!(widget_id = %instance.id, "Failed to seed undocked state: {}", e);
        }
        self.instances.push(instance.clone());
        info!(container = %container_id, child = %child_id, "Widget undocked");
        Ok(instance)
    }

    /// Deletes a docked child without placing it back on the canvas.
    pub fn remove_child(&mut self, container_id: &WidgetId, child_id: &WidgetId) -> RuntimeResult<()> {
        let (_, remaining) = self.take_child(container_id, child_id)?;
        self.push_children(container_id, remaining)?;
        self.drop_connections(child_id);
        self.forget_state(child_id);
        self.generated_code.remove(child_id);
        info!(container = %container_id, child = %child_id, "Docked widget removed");
        Ok(())
    }

    pub fn apply_intent(
        &mut self,
        container_id: &WidgetId,
        intent: &WidgetIntent,
    ) -> RuntimeResult<IntentOutcome> {
        debug!(container = %container_id, action = intent.action(), child = %intent.child_id(), "Applying intent");
        match intent {
            WidgetIntent::Dock(child) => {
                self.dock(container_id, child)?;
                Ok(IntentOutcome::Docked)
            }
            WidgetIntent::Undock(child) => {
                self.undock(container_id, child).map(IntentOutcome::Undocked)
            }
            WidgetIntent::Remove(child) => {
                self.remove_child(container_id, child)?;
                Ok(IntentOutcome::Removed)
            }
            WidgetIntent::SavePreset(child) => {
                let docked = self
                    .children(container_id)
                    .into_iter()
                    .find(|c| &c.id == child);
                docked
                    .map(IntentOutcome::Preset)
                    .ok_or_else(|| RuntimeError::ChildNotDocked {
                        container: container_id.clone(),
                        child: child.clone(),
                    })
            }
        }
    }

    /// Streams intents emitted by any widget on the bus. The caller applies
    /// them with [`RuntimeContext::apply_intent`].
    pub fn subscribe_intents(&self) -> (Subscription, mpsc::UnboundedReceiver<(WidgetId, WidgetIntent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.bus.on(EventKind::WidgetOutput, move |event| {
            if let Some(intent) = WidgetIntent::from_event(event) {
                tx.send(intent)
                    .map_err(|_| anyhow::anyhow!("intent receiver dropped"))?;
            }
            Ok(())
        });
        (subscription, rx)
    }

    fn take_child(
        &self,
        container_id: &WidgetId,
        child_id: &WidgetId,
    ) -> RuntimeResult<(ChildDescriptor, Vec<Value>)> {
        let container = self
            .instance(container_id)
            .ok_or_else(|| RuntimeError::UnknownWidget(container_id.clone()))?;
        let mut entries = child_entries(&self.live_state(container));
        let index = entries
            .iter()
            .position(|entry| is_entry_for(entry, child_id))
            .ok_or_else(|| RuntimeError::ChildNotDocked {
                container: container_id.clone(),
                child: child_id.clone(),
            })?;
        let descriptor = serde_json::from_value(entries[index].clone()).map_err(|e| {
            RuntimeError::InvalidDock(format!(
                "entry for '{child_id}' in '{container_id}' is not a docked child: {e}"
            ))
        })?;
        entries.remove(index);
        Ok((descriptor, entries))
    }

    /// Sends the new `children` array to the container under a fresh
    /// sequence number, pending until the container acknowledges it, and
    /// records it in the store and the instance.
    fn push_children(&mut self, container_id: &WidgetId, entries: Vec<Value>) -> RuntimeResult<()> {
        let handle = self
            .handle(container_id)
            .ok_or_else(|| RuntimeError::NotMounted(container_id.clone()))?;
        let children = Value::Array(entries);
        self.push_seq += 1;
        let seq = self.push_seq;

        // Pending before sending, so the ack cannot overtake it.
        let previous = self
            .pending_acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container_id.clone(), seq);
        if let Err(e) = handle.push_state(json!({ "children": children.clone() }), seq) {
            let mut pending = self.pending_acks.lock().unwrap_or_else(PoisonError::into_inner);
            match previous {
                Some(awaited) => pending.insert(container_id.clone(), awaited),
                None => pending.remove(container_id),
            };
            return Err(e.into());
        }
        debug!(container = %container_id, seq, "Children pushed");

        let Some(container) = self.instances.iter().find(|i| &i.id == container_id) else {
            return Ok(());
        };
        let mut state = match self.live_state(container) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        state.insert("children".to_string(), children);
        let state = Value::Object(state);
        if let Err(e) = self.state_store.save(container_id, state.clone()) {
            warn!(container = %container_id, "Failed to record pushed state: {}", e);
        }
        if let Some(container) = self.instance_mut(container_id) {
            container.state = state;
        }
        Ok(())
    }
}
