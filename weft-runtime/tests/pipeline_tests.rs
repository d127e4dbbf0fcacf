mod common;

use common::{emit_patch, eventually, harness, instance, patches};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weft_bus::EventKind;
use weft_runtime::{Port, StateStore};
use weft_types::{DataType, PortDirection, WidgetId};

fn a() -> WidgetId {
    WidgetId::from("a")
}

fn b() -> WidgetId {
    WidgetId::from("b")
}

#[tokio::test]
async fn output_value_is_routed_to_connected_input() {
    let mut h = harness();
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    h.ctx.add_instance(instance("b", "calc")).unwrap();
    h.ctx.reconcile().await;
    assert!(h.ctx.connect(&a(), "value", &b(), "amount").is_some());

    h.ctx.handle(&a()).unwrap().set_state(emit_patch(json!(42))).unwrap();

    eventually("routed value", || patches(&h.log, "b").contains(&json!({"amount": 42}))).await;
    eventually("target state persisted", || {
        h.store
            .load(&b())
            .unwrap()
            .is_some_and(|state| state["amount"] == json!(42))
    })
    .await;
}

#[tokio::test]
async fn self_connection_is_refused() {
    let mut h = harness();
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    assert!(h.ctx.connect(&a(), "value", &a(), "amount").is_none());
    assert!(h.ctx.graph().is_empty());
}

#[tokio::test]
async fn type_mismatch_and_unknown_ports_are_refused() {
    let mut h = harness();
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    h.ctx.add_instance(instance("b", "calc")).unwrap();
    assert!(h.ctx.connect(&a(), "text", &b(), "amount").is_none());
    assert!(h.ctx.connect(&a(), "missing", &b(), "amount").is_none());
    assert!(h.ctx.connect(&a(), "amount", &b(), "value").is_none());
    assert!(h.ctx.graph().is_empty());
}

#[tokio::test]
async fn graph_changes_are_announced() {
    let mut h = harness();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    h.bus.on(weft_bus::Topic::All, move |e| {
        if matches!(e.kind, EventKind::ConnectionAdded | EventKind::ConnectionRemoved) {
            sink.lock().unwrap().push(e.kind.clone());
        }
        Ok(())
    });
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    h.ctx.add_instance(instance("b", "calc")).unwrap();
    let connection = h.ctx.connect(&a(), "value", &b(), "amount").unwrap();
    h.ctx.disconnect(&connection.id).unwrap();
    assert!(h.ctx.disconnect(&connection.id).is_none());

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![EventKind::ConnectionAdded, EventKind::ConnectionRemoved]
    );
}

#[tokio::test]
async fn disconnected_outputs_are_not_routed() {
    let mut h = harness();
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    h.ctx.add_instance(instance("b", "calc")).unwrap();
    h.ctx.reconcile().await;
    let connection = h.ctx.connect(&a(), "value", &b(), "amount").unwrap();
    h.ctx.disconnect(&connection.id);

    h.ctx.handle(&a()).unwrap().set_state(emit_patch(json!(1))).unwrap();
    eventually("source emitted", || !patches(&h.log, "a").is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(patches(&h.log, "b").is_empty());
}

#[tokio::test]
async fn removing_a_widget_drops_its_connections() {
    let mut h = harness();
    for id in ["a", "b", "c"] {
        h.ctx.add_instance(instance(id, "calc")).unwrap();
    }
    h.ctx.connect(&a(), "value", &b(), "amount").unwrap();
    h.ctx.connect(&b(), "value", &WidgetId::from("c"), "amount").unwrap();
    h.ctx.remove_instance(&b()).unwrap();
    assert!(h.ctx.graph().is_empty());
}

#[tokio::test]
async fn drag_connects_only_on_valid_release() {
    let mut h = harness();
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    h.ctx.add_instance(instance("b", "calc")).unwrap();
    assert!(h.ctx.begin_drag(&a(), "amount").is_none());

    let target = h.ctx.port(&b(), PortDirection::Input, "amount").unwrap();
    let own_input = h.ctx.port(&a(), PortDirection::Input, "amount").unwrap();

    let drag = h.ctx.begin_drag(&a(), "value").unwrap();
    assert!(!drag.hover(&own_input, h.ctx.graph()));
    assert!(h.ctx.release_drag(drag, &own_input).is_none());

    let drag = h.ctx.begin_drag(&a(), "value").unwrap();
    assert!(drag.hover(&target, h.ctx.graph()));
    assert!(h.ctx.graph().is_empty());
    let connection = h.ctx.release_drag(drag, &target).unwrap();
    assert_eq!(connection.source_port, "value");
    assert_eq!(h.ctx.graph().len(), 1);
}

#[tokio::test]
async fn drag_release_onto_a_port_of_no_placed_widget_is_refused() {
    let mut h = harness();
    h.ctx.add_instance(instance("a", "calc")).unwrap();
    let ghost = Port {
        widget_id: WidgetId::from("ghost"),
        port_id: "amount".into(),
        direction: PortDirection::Input,
        data_type: DataType::Number,
        capability: None,
    };
    let drag = h.ctx.begin_drag(&a(), "value").unwrap();
    assert!(h.ctx.release_drag(drag, &ghost).is_none());

    // A port the widget's manifest does not declare.
    h.ctx.add_instance(instance("b", "calc")).unwrap();
    let undeclared = Port {
        widget_id: b(),
        port_id: "total".into(),
        ..ghost
    };
    let drag = h.ctx.begin_drag(&a(), "value").unwrap();
    assert!(h.ctx.release_drag(drag, &undeclared).is_none());
    assert!(h.ctx.graph().is_empty());
}
