use pretty_assertions::assert_eq;
use proptest::prelude::*;
use weft_types::{
    CanvasId, CanvasSnapshot, EventMetadata, OriginId, PipelineConnection, WidgetId,
};

// ── EventMetadata ─────────────────────────────────────────────────

#[test]
fn originate_starts_at_zero_hops() {
    let origin = OriginId::from("tab-a");
    let meta = EventMetadata::originate(&origin);
    assert_eq!(meta.hop_count, 0);
    assert!(meta.seen_by.is_empty());
    assert_eq!(meta.origin.session_id.as_deref(), Some("tab-a"));
    assert!(meta.origin_timestamp_ms > 0);
}

#[test]
fn record_hop_appends_origin_once() {
    let a = OriginId::from("a");
    let mut meta = EventMetadata::originate(&a);
    meta.record_hop(&a);
    meta.record_hop(&a);
    assert_eq!(meta.seen_by, vec![a.clone()]);
    assert_eq!(meta.hop_count, 2);
    assert!(meta.has_seen(&a));
    assert!(!meta.has_seen(&OriginId::from("b")));
}

#[test]
fn metadata_serde_roundtrip() {
    let mut meta = EventMetadata::originate(&OriginId::from("a"));
    meta.record_hop(&OriginId::from("a"));
    let json = serde_json::to_string(&meta).unwrap();
    let parsed: EventMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, meta);
}

proptest! {
    #[test]
    fn seen_by_preserves_visiting_order(names in prop::collection::vec("[a-z]{1,6}", 1..12)) {
        let mut meta = EventMetadata::originate(&OriginId::from("root"));
        for n in &names {
            meta.record_hop(&OriginId::from(n.as_str()));
        }
        prop_assert_eq!(meta.hop_count as usize, names.len());
        let mut expected: Vec<OriginId> = Vec::new();
        for n in &names {
            let o = OriginId::from(n.as_str());
            if !expected.contains(&o) {
                expected.push(o);
            }
        }
        prop_assert_eq!(meta.seen_by, expected);
    }
}

// ── PipelineConnection ────────────────────────────────────────────

#[test]
fn same_endpoints_ignores_id() {
    let a = PipelineConnection::new(WidgetId::from("a"), "value", WidgetId::from("b"), "amount");
    let b = PipelineConnection::new(WidgetId::from("a"), "value", WidgetId::from("b"), "amount");
    assert_ne!(a.id, b.id);
    assert!(a.same_endpoints(&b));
    assert!(a.touches(&WidgetId::from("b")));
    assert!(!a.touches(&WidgetId::from("c")));
}

// ── CanvasSnapshot ────────────────────────────────────────────────

#[test]
fn snapshot_json_roundtrip() {
    let mut snap = CanvasSnapshot::empty(CanvasId::from("main"));
    snap.connections.push(PipelineConnection::new(
        WidgetId::from("a"),
        "value",
        WidgetId::from("b"),
        "amount",
    ));
    let text = snap.to_json_pretty().unwrap();
    let parsed = CanvasSnapshot::from_json(&text).unwrap();
    assert_eq!(parsed, snap);
}

#[test]
fn snapshot_missing_collections_default_empty() {
    let snap = CanvasSnapshot::from_json(r#"{ "canvas_id": "main" }"#).unwrap();
    assert!(snap.instances.is_empty());
    assert!(snap.connections.is_empty());
}
