use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use weft_bus::{
    spawn_inbound, BusEvent, ChannelRelay, EventBus, EventKind, EventScope, LocalRelay, Topic,
};
use weft_types::{EventMetadata, OriginId};

fn counting(bus: &EventBus) -> Arc<Mutex<usize>> {
    let count = Arc::new(Mutex::new(0));
    let c = Arc::clone(&count);
    bus.on(Topic::All, move |_| {
        *c.lock().unwrap() += 1;
        Ok(())
    });
    count
}

fn linked_pair() -> (Arc<EventBus>, Arc<EventBus>) {
    let a = Arc::new(EventBus::with_origin(OriginId::from("tab-a"), 16));
    let b = Arc::new(EventBus::with_origin(OriginId::from("tab-b"), 16));
    a.add_relay(Arc::new(LocalRelay::new(&b)));
    b.add_relay(Arc::new(LocalRelay::new(&a)));
    (a, b)
}

// ── Loop prevention ───────────────────────────────────────────────

#[test]
fn global_event_crosses_once_and_does_not_echo() {
    let (a, b) = linked_pair();
    let on_a = counting(&a);
    let on_b = counting(&b);

    a.emit(BusEvent::new(EventKind::custom("theme:changed"), json!({"dark": true}))
        .with_scope(EventScope::Global));

    assert_eq!(*on_a.lock().unwrap(), 1);
    assert_eq!(*on_b.lock().unwrap(), 1);
}

#[test]
fn canvas_event_stays_local() {
    let (a, b) = linked_pair();
    let on_a = counting(&a);
    let on_b = counting(&b);

    a.emit(BusEvent::new(EventKind::custom("x"), json!(null)));

    assert_eq!(*on_a.lock().unwrap(), 1);
    assert_eq!(*on_b.lock().unwrap(), 0);
}

#[test]
fn three_context_ring_terminates() {
    let a = Arc::new(EventBus::with_origin(OriginId::from("a"), 16));
    let b = Arc::new(EventBus::with_origin(OriginId::from("b"), 16));
    let c = Arc::new(EventBus::with_origin(OriginId::from("c"), 16));
    a.add_relay(Arc::new(LocalRelay::new(&b)));
    b.add_relay(Arc::new(LocalRelay::new(&c)));
    c.add_relay(Arc::new(LocalRelay::new(&a)));
    let counts = [counting(&a), counting(&b), counting(&c)];

    a.emit(BusEvent::new(EventKind::custom("x"), json!(1)).with_scope(EventScope::User));

    for count in counts {
        assert_eq!(*count.lock().unwrap(), 1);
    }
}

#[test]
fn hop_limit_stops_long_chains() {
    let buses: Vec<Arc<EventBus>> = (0..6)
        .map(|i| Arc::new(EventBus::with_origin(OriginId::from(format!("n{i}")), 3)))
        .collect();
    for pair in buses.windows(2) {
        pair[0].add_relay(Arc::new(LocalRelay::new(&pair[1])));
    }
    let counts: Vec<_> = buses.iter().map(|b| counting(b)).collect();

    buses[0].emit(BusEvent::new(EventKind::custom("x"), json!(1)).with_scope(EventScope::Global));

    let delivered: Vec<usize> = counts.iter().map(|c| *c.lock().unwrap()).collect();
    assert_eq!(delivered, vec![1, 1, 1, 1, 0, 0]);
}

proptest! {
    #[test]
    fn event_seen_by_local_origin_is_dropped_for_any_hop_count(hops in 0u32..10_000) {
        let bus = EventBus::with_origin(OriginId::from("local"), 16);
        let count = counting(&bus);

        let mut meta = EventMetadata::originate(&OriginId::from("remote"));
        meta.seen_by.push(OriginId::from("remote"));
        meta.seen_by.push(OriginId::from("local"));
        meta.hop_count = hops;
        let mut event = BusEvent::new(EventKind::custom("x"), json!(null)).with_scope(EventScope::Global);
        event.metadata = Some(meta);

        bus.receive(event.clone());
        bus.emit(event);
        prop_assert_eq!(*count.lock().unwrap(), 0);
    }
}

// ── Channel relay ─────────────────────────────────────────────────

#[tokio::test]
async fn channel_relay_delivers_to_remote_bus() {
    let a = Arc::new(EventBus::with_origin(OriginId::from("a"), 16));
    let b = Arc::new(EventBus::with_origin(OriginId::from("b"), 16));
    let (tx, rx) = mpsc::unbounded_channel();
    a.add_relay(Arc::new(ChannelRelay::new(tx)));
    let inbound = spawn_inbound(Arc::clone(&b), rx);

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    b.on(EventKind::custom("sync"), move |e| {
        let _ = seen_tx.send(e.metadata.clone());
        Ok(())
    });

    a.emit(BusEvent::new(EventKind::custom("sync"), json!({})).with_scope(EventScope::User));

    let meta = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(meta.hop_count, 1);
    assert_eq!(meta.seen_by, vec![OriginId::from("a")]);

    drop(a);
    tokio::time::timeout(Duration::from_secs(2), inbound)
        .await
        .unwrap()
        .unwrap();
}
