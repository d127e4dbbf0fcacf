#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weft_bus::EventBus;
use weft_runtime::{HostConfig, InMemoryStateStore, ManifestRegistry, RuntimeContext, RuntimeDeps};
use weft_types::{CanvasId, WidgetId, WidgetInstance, WidgetManifest};
use weft_widget_host::{GuestApi, GuestFault, HostMessage, NativeGuestRegistry, WidgetGuest};

pub const WAIT: Duration = Duration::from_secs(5);

pub type MessageLog = Arc<Mutex<HashMap<WidgetId, Vec<HostMessage>>>>;

/// Test widget. Records what it receives; a `set_state` patch with `emit`
/// outputs that value on `value`, one with `intent` raises that intent.
struct Scripted {
    log: MessageLog,
    widget_id: Option<WidgetId>,
}

impl WidgetGuest for Scripted {
    fn on_message(&mut self, message: &HostMessage, api: &mut GuestApi) -> Result<(), GuestFault> {
        let widget_id = self.widget_id.get_or_insert_with(|| api.widget_id().clone()).clone();
        self.log
            .lock()
            .unwrap()
            .entry(widget_id)
            .or_default()
            .push(message.clone());

        if let HostMessage::SetState { patch, .. } = message {
            if let Some(value) = patch.get("emit") {
                api.output("value", value.clone())
                    .map_err(|e| GuestFault::Failed(e.to_string()))?;
            }
            if let Some(intent) = patch.get("intent") {
                let action = intent["action"].as_str().unwrap_or_default();
                let child = intent["child_id"].as_str().unwrap_or_default();
                api.intent(action, WidgetId::from(child))
                    .map_err(|e| GuestFault::Failed(e.to_string()))?;
            }
        }
        Ok(())
    }
}

pub struct Harness {
    pub ctx: RuntimeContext,
    pub bus: Arc<EventBus>,
    pub store: Arc<InMemoryStateStore>,
    pub log: MessageLog,
    pub constructed: Arc<AtomicUsize>,
}

pub fn manifests() -> Arc<ManifestRegistry> {
    let registry = ManifestRegistry::new();
    for text in [
        r#"{ "id": "calc", "version": "1.0.0", "name": "Calculator", "entry": "calc.wasm",
             "io": { "inputs": [{ "id": "amount", "data_type": "number" }],
                     "outputs": [{ "id": "value", "data_type": "number" },
                                 { "id": "text", "data_type": "string" }] },
             "size": { "default_width": 200, "default_height": 120 } }"#,
        r#"{ "id": "dock", "version": "1.0.0", "name": "Dock", "entry": "dock.wasm",
             "size": { "default_width": 400, "default_height": 300 } }"#,
        r#"{ "id": "label", "version": "1.0.0", "kind": "native" }"#,
    ] {
        registry.register(WidgetManifest::from_json(text).unwrap()).unwrap();
    }
    Arc::new(registry)
}

pub fn harness() -> Harness {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(InMemoryStateStore::new());
    let log: MessageLog = Arc::default();
    let constructed = Arc::new(AtomicUsize::new(0));

    let loader = NativeGuestRegistry::new();
    for def in ["calc", "dock"] {
        let log = Arc::clone(&log);
        let constructed = Arc::clone(&constructed);
        loader.register(def, move || {
            constructed.fetch_add(1, Ordering::SeqCst);
            Box::new(Scripted {
                log: Arc::clone(&log),
                widget_id: None,
            }) as Box<dyn WidgetGuest>
        });
    }

    let ctx = RuntimeContext::new(
        CanvasId::from("canvas"),
        RuntimeDeps {
            bus: Arc::clone(&bus),
            state_store: store.clone(),
            manifests: manifests(),
            loader: Arc::new(loader),
            config: HostConfig::default(),
        },
    );
    Harness {
        ctx,
        bus,
        store,
        log,
        constructed,
    }
}

pub fn instance(id: &str, def: &str) -> WidgetInstance {
    let registry = manifests();
    let manifest = registry.get(&def.into()).unwrap_or_else(|| {
        Arc::new(
            WidgetManifest::from_json(&format!(
                r#"{{ "id": "{def}", "version": "1", "entry": "{def}.wasm" }}"#
            ))
            .unwrap(),
        )
    });
    WidgetInstance::from_manifest(id, CanvasId::from("canvas"), &manifest)
}

pub fn messages(log: &MessageLog, id: &str) -> Vec<HostMessage> {
    log.lock()
        .unwrap()
        .get(&WidgetId::from(id))
        .cloned()
        .unwrap_or_default()
}

/// Set-state patches delivered to `id`, in order.
pub fn patches(log: &MessageLog, id: &str) -> Vec<Value> {
    messages(log, id)
        .into_iter()
        .filter_map(|m| match m {
            HostMessage::SetState { patch, .. } => Some(patch),
            _ => None,
        })
        .collect()
}

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn emit_patch(value: Value) -> Value {
    json!({ "emit": value })
}
