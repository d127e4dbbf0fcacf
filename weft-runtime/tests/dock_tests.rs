mod common;

use common::{eventually, harness, instance, patches, Harness, WAIT};
use pretty_assertions::assert_eq;
use serde_json::json;
use weft_bus::BusEvent;
use weft_runtime::{
    ChildDescriptor, CanvasStore, InMemoryCanvasStore, IntentOutcome, RuntimeError, StateStore,
    WidgetIntent, DOCK_GAP,
};
use weft_types::{CanvasId, WidgetId};

fn dock() -> WidgetId {
    WidgetId::from("dock-1")
}

fn counter() -> WidgetId {
    WidgetId::from("counter-1")
}

/// A mounted dock at (100, 50) and a free-floating calculator with state.
async fn canvas() -> Harness {
    let mut h = harness();
    h.ctx
        .add_instance(instance("dock-1", "dock").at(100.0, 50.0))
        .unwrap();
    let mut child = instance("counter-1", "calc").at(700.0, 400.0);
    child.width = 260.0;
    child.height = 180.0;
    child.z_index = 3;
    h.ctx.add_instance(child.with_state(json!({"count": 5}))).unwrap();
    h.ctx.reconcile().await;
    h
}

#[tokio::test]
async fn dock_moves_child_into_container_state() {
    let mut h = canvas().await;
    h.ctx.dock(&dock(), &counter()).unwrap();

    assert!(h.ctx.instance(&counter()).is_none());
    let children = h.ctx.children(&dock());
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, counter());
    assert_eq!(children[0].name, "Calculator");
    assert_eq!(children[0].saved_instance.state, json!({"count": 5}));
    assert_eq!(children[0].generated, None);

    eventually("children pushed", || {
        patches(&h.log, "dock-1")
            .iter()
            .any(|p| p["children"][0]["id"] == json!("counter-1"))
    })
    .await;
    eventually("container acknowledged", || h.ctx.is_state_settled(&dock())).await;

    // Docked child's sandbox goes away on the next pass.
    let report = h.ctx.reconcile().await;
    assert_eq!(report.destroyed, vec![counter()]);
}

#[tokio::test]
async fn dock_then_undock_round_trips_the_child() {
    let mut h = canvas().await;
    let before = h.ctx.instance(&counter()).unwrap().clone();
    h.ctx.dock(&dock(), &counter()).unwrap();
    h.ctx.reconcile().await;

    let restored = h.ctx.undock(&dock(), &counter()).unwrap();
    assert_eq!(restored.widget_def_id, before.widget_def_id);
    assert_eq!(restored.state, before.state);
    assert_eq!(restored.width, before.width);
    assert_eq!(restored.height, before.height);

    let container = h.ctx.instance(&dock()).unwrap();
    assert_eq!(restored.x, container.x + container.width + DOCK_GAP);
    assert_eq!(restored.y, container.y);
    let top = h
        .ctx
        .instances()
        .iter()
        .filter(|i| i.id != counter())
        .map(|i| i.z_index)
        .max()
        .unwrap();
    assert!(restored.z_index > top);

    assert!(h.ctx.children(&dock()).is_empty());
    assert_eq!(h.ctx.instance(&counter()), Some(&restored));
    assert_eq!(h.ctx.reconcile().await.mounted, vec![counter()]);
}

#[tokio::test]
async fn remove_child_does_not_recreate_it() {
    let mut h = canvas().await;
    h.ctx.dock(&dock(), &counter()).unwrap();
    h.ctx.remove_child(&dock(), &counter()).unwrap();

    assert!(h.ctx.children(&dock()).is_empty());
    assert!(h.ctx.instance(&counter()).is_none());
    assert_eq!(h.store.load(&counter()).unwrap(), None);
    assert!(matches!(
        h.ctx.undock(&dock(), &counter()),
        Err(RuntimeError::ChildNotDocked { .. })
    ));
}

#[tokio::test]
async fn failed_push_leaves_canvas_unchanged() {
    let mut h = harness();
    h.ctx.add_instance(instance("dock-1", "dock")).unwrap();
    h.ctx.add_instance(instance("counter-1", "calc")).unwrap();
    // Never reconciled, so the container has no sandbox to push to.
    assert!(matches!(
        h.ctx.dock(&dock(), &counter()),
        Err(RuntimeError::NotMounted(_))
    ));
    assert!(h.ctx.instance(&counter()).is_some());
    assert!(h.ctx.children(&dock()).is_empty());
}

#[tokio::test]
async fn child_is_never_both_docked_and_free() {
    let mut h = canvas().await;
    assert!(matches!(
        h.ctx.dock(&dock(), &dock()),
        Err(RuntimeError::InvalidDock(_))
    ));
    h.ctx.dock(&dock(), &counter()).unwrap();
    assert!(matches!(
        h.ctx.dock(&dock(), &counter()),
        Err(RuntimeError::UnknownWidget(_))
    ));

    let undocked = h.ctx.undock(&dock(), &counter()).unwrap();
    assert!(matches!(
        h.ctx.undock(&dock(), &undocked.id),
        Err(RuntimeError::DuplicateInstance(_))
    ));
    assert_eq!(
        h.ctx.instances().iter().filter(|i| i.id == counter()).count(),
        1
    );
}

#[tokio::test]
async fn intents_raised_by_the_container_are_applied() {
    let mut h = canvas().await;
    let (_subscription, mut intents) = h.ctx.subscribe_intents();
    h.ctx.dock(&dock(), &counter()).unwrap();

    h.ctx
        .handle(&dock())
        .unwrap()
        .set_state(json!({"intent": {"action": "undock", "child_id": "counter-1"}}))
        .unwrap();
    let (container, intent) = tokio::time::timeout(WAIT, intents.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(container, dock());
    assert_eq!(intent, WidgetIntent::Undock(counter()));

    match h.ctx.apply_intent(&container, &intent).unwrap() {
        IntentOutcome::Undocked(instance) => assert_eq!(instance.id, counter()),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(h.ctx.instance(&counter()).is_some());
}

#[tokio::test]
async fn save_preset_returns_descriptor() {
    let mut h = canvas().await;
    h.ctx.dock(&dock(), &counter()).unwrap();
    match h
        .ctx
        .apply_intent(&dock(), &WidgetIntent::SavePreset(counter()))
        .unwrap()
    {
        IntentOutcome::Preset(descriptor) => {
            assert_eq!(descriptor.widget_def_id.as_str(), "calc");
            assert_eq!(descriptor.saved_instance.state, json!({"count": 5}));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    // Preset does not change the container.
    assert_eq!(h.ctx.children(&dock()).len(), 1);
}

// ── Acknowledgement ordering ──────────────────────────────────────

#[tokio::test]
async fn state_reported_before_the_ack_does_not_undo_a_dock() {
    let mut h = canvas().await;
    h.ctx.dock(&dock(), &counter()).unwrap();
    assert!(!h.ctx.is_state_settled(&dock()));

    // Queued by the container before it saw the push. On a current-thread
    // runtime the real ack cannot be pumped until this test yields.
    h.bus
        .emit(BusEvent::state_changed(dock(), json!({"children": []})).acknowledging(0));
    h.bus.emit(BusEvent::state_changed(dock(), json!({"title": "Tools"})));

    assert!(!h.ctx.is_state_settled(&dock()));
    assert_eq!(h.ctx.children(&dock()).len(), 1);
    let stored = h.store.load(&dock()).unwrap().unwrap();
    assert_eq!(stored["title"], json!("Tools"));
    assert_eq!(stored["children"][0]["id"], json!("counter-1"));
    assert!(h.ctx.instance(&counter()).is_none());

    eventually("container acknowledged", || h.ctx.is_state_settled(&dock())).await;
    assert_eq!(h.ctx.children(&dock())[0].id, counter());

    let store = InMemoryCanvasStore::new();
    h.ctx.persist(&store).unwrap();
    let saved = store.load(&CanvasId::from("canvas")).unwrap().unwrap();
    assert_eq!(saved.instances.len(), 1);
    assert_eq!(saved.instances[0].state["children"][0]["id"], json!("counter-1"));
}

#[tokio::test]
async fn only_the_latest_push_settles_the_container() {
    let mut h = canvas().await;
    h.ctx.add_instance(instance("counter-2", "calc")).unwrap();
    h.ctx.dock(&dock(), &counter()).unwrap();
    eventually("first push acknowledged", || h.ctx.is_state_settled(&dock())).await;

    h.ctx.dock(&dock(), &WidgetId::from("counter-2")).unwrap();
    // An ack replayed from the first push.
    h.bus.emit(
        BusEvent::state_changed(dock(), json!({"children": [{"id": "counter-1"}]})).acknowledging(1),
    );
    assert!(!h.ctx.is_state_settled(&dock()));
    assert_eq!(h.ctx.children(&dock()).len(), 2);

    eventually("second push acknowledged", || h.ctx.is_state_settled(&dock())).await;
    assert_eq!(h.ctx.children(&dock()).len(), 2);
}

// ── Container-owned entries ───────────────────────────────────────

#[tokio::test]
async fn container_authored_entries_survive_dock_and_undock() {
    let mut h = harness();
    let parked = ChildDescriptor {
        id: WidgetId::from("counter-0"),
        name: "Calculator".into(),
        widget_def_id: "calc".into(),
        saved_instance: instance("counter-0", "calc"),
        generated: None,
    };
    let mut parked = serde_json::to_value(parked).unwrap();
    parked["slot"] = json!(3);
    h.ctx
        .add_instance(instance("dock-1", "dock").with_state(json!({
            "children": [parked, {"id": "inline-note", "text": "hi"}]
        })))
        .unwrap();
    h.ctx.add_instance(instance("counter-1", "calc")).unwrap();
    h.ctx.reconcile().await;

    h.ctx.dock(&dock(), &counter()).unwrap();
    let stored = h.store.load(&dock()).unwrap().unwrap();
    let entries = stored["children"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["slot"], json!(3));
    assert_eq!(entries[1], json!({"id": "inline-note", "text": "hi"}));
    assert_eq!(entries[2]["id"], json!("counter-1"));

    let restored = h.ctx.undock(&dock(), &WidgetId::from("counter-0")).unwrap();
    assert_eq!(restored.widget_def_id.as_str(), "calc");
    let stored = h.store.load(&dock()).unwrap().unwrap();
    assert_eq!(
        stored["children"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].clone())
            .collect::<Vec<_>>(),
        vec![json!("inline-note"), json!("counter-1")]
    );

    assert!(matches!(
        h.ctx.undock(&dock(), &WidgetId::from("inline-note")),
        Err(RuntimeError::InvalidDock(_))
    ));
    assert_eq!(h.ctx.children(&dock()).len(), 1);
}

// ── Generated widgets ─────────────────────────────────────────────

const GENERATED: &str = "(module)";

#[tokio::test]
async fn generated_code_travels_with_a_docked_child() {
    let mut h = canvas().await;
    h.ctx.set_generated_code(counter(), GENERATED);
    h.ctx.dock(&dock(), &counter()).unwrap();

    assert_eq!(h.ctx.children(&dock())[0].generated.as_deref(), Some(GENERATED));
    assert_eq!(h.ctx.generated_code(&counter()), None);

    // Persisted while docked, restored into a fresh runtime.
    let store = InMemoryCanvasStore::new();
    h.ctx.persist(&store).unwrap();
    let mut restored = harness();
    assert!(restored.ctx.restore(&store).unwrap());
    restored.ctx.reconcile().await;

    restored.ctx.undock(&dock(), &counter()).unwrap();
    assert_eq!(restored.ctx.generated_code(&counter()), Some(GENERATED));
}

#[tokio::test]
async fn generated_code_of_placed_instances_is_persisted() {
    let mut h = harness();
    h.ctx.add_instance(instance("counter-1", "calc")).unwrap();
    h.ctx.add_instance(instance("counter-2", "calc")).unwrap();
    h.ctx.set_generated_code(counter(), GENERATED);

    let store = InMemoryCanvasStore::new();
    h.ctx.persist(&store).unwrap();
    let saved = store.load(&CanvasId::from("canvas")).unwrap().unwrap();
    assert_eq!(saved.generated_code.len(), 1);

    let mut restored = harness();
    restored.ctx.restore(&store).unwrap();
    assert_eq!(restored.ctx.generated_code(&counter()), Some(GENERATED));
    assert_eq!(restored.ctx.generated_code(&WidgetId::from("counter-2")), None);
}
