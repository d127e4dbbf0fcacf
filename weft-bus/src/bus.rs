//! The event bus itself: subscription table, dispatch and hop bookkeeping.

use crate::event::{BusEvent, EventKind};
use crate::relay::Relay;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, warn};
use weft_types::{EventMetadata, OriginId};

/// Hop ceiling applied when none is configured.
pub const DEFAULT_MAX_HOPS: u32 = 16;

/// A subscriber callback.
///
/// Errors are logged by the bus and never reach the emitter.
pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// What a handler listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event (`*`).
    All,
    Kind(EventKind),
}

impl Topic {
    fn matches(&self, kind: &EventKind) -> bool {
        match self {
            Topic::All => true,
            Topic::Kind(k) => k == kind,
        }
    }
}

impl From<EventKind> for Topic {
    fn from(kind: EventKind) -> Self {
        Topic::Kind(kind)
    }
}

/// Identifier of one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

type HandlerTable = RwLock<Vec<Entry>>;

/// Handle returned by [`EventBus::on`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    table: Weak<HandlerTable>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the handler. Calling it more than once, or after the bus is
    /// gone, does nothing.
    pub fn unsubscribe(&self) {
        if let Some(table) = self.table.upgrade() {
            remove_entry(&table, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn remove_entry(table: &HandlerTable, id: SubscriptionId) -> bool {
    let mut entries = table.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|e| e.id != id);
    entries.len() != before
}

/// Synchronous publish/subscribe bus for one execution context.
pub struct EventBus {
    origin: OriginId,
    max_hops: u32,
    next_id: AtomicU64,
    handlers: Arc<HandlerTable>,
    relays: RwLock<Vec<Arc<dyn Relay>>>,
}

impl EventBus {
    /// Creates a bus with a freshly generated origin.
    pub fn new() -> Self {
        Self::with_origin(OriginId::generate(), DEFAULT_MAX_HOPS)
    }

    pub fn with_origin(origin: OriginId, max_hops: u32) -> Self {
        Self {
            origin,
            max_hops,
            next_id: AtomicU64::new(1),
            handlers: Arc::new(RwLock::new(Vec::new())),
            relays: RwLock::new(Vec::new()),
        }
    }

    pub fn origin(&self) -> &OriginId {
        &self.origin
    }

    pub fn max_hops(&self) -> u32 {
        self.max_hops
    }

    /// Registers `handler` for `topic`. Several handlers may share a topic;
    /// they run in registration order.
    pub fn on<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = topic.into();
        debug!(subscription = id.0, topic = ?topic, "Handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                topic,
                handler: Arc::new(handler),
            });
        Subscription {
            id,
            table: Arc::downgrade(&self.handlers),
        }
    }

    /// Removes a handler by id. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        remove_entry(&self.handlers, id)
    }

    /// Number of handlers that would receive an event of `kind`.
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.topic.matches(kind))
            .count()
    }

    /// Adds a cooperating context that receives relayed events.
    pub fn add_relay(&self, relay: Arc<dyn Relay>) {
        self.relays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(relay);
    }

    /// Publishes an event emitted in this context.
    ///
    /// Relayed scopes get fresh metadata when they carry none. Delivery to
    /// local handlers is synchronous and in registration order.
    pub fn emit(&self, mut event: BusEvent) {
        if self.already_seen(&event) {
            return;
        }
        if event.scope.is_relayed() && event.metadata.is_none() {
            event.metadata = Some(EventMetadata::originate(&self.origin));
        }
        self.dispatch(&event);
        if event.scope.is_relayed() {
            self.relay_out(event);
        }
    }

    /// Inbound path for events relayed from another context.
    pub fn receive(&self, event: BusEvent) {
        if self.already_seen(&event) {
            return;
        }
        self.dispatch(&event);
        if event.scope.is_relayed() {
            self.relay_out(event);
        }
    }

    fn already_seen(&self, event: &BusEvent) -> bool {
        let seen = event
            .metadata
            .as_ref()
            .is_some_and(|m| m.has_seen(&self.origin));
        if seen {
            debug!(kind = %event.kind, origin = %self.origin, "Dropping event already seen by this context");
        }
        seen
    }

    fn dispatch(&self, event: &BusEvent) {
        // Snapshot so handlers can (un)subscribe without affecting this delivery.
        let targets: Vec<(SubscriptionId, Handler)> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.topic.matches(&event.kind))
            .map(|e| (e.id, Arc::clone(&e.handler)))
            .collect();

        for (id, handler) in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(kind = %event.kind, subscription = id.0, error = %e, "Event handler error, continuing");
                }
                Err(panic) => {
                    warn!(
                        kind = %event.kind,
                        subscription = id.0,
                        panic = panic_message(panic.as_ref()),
                        "Event handler panicked, continuing"
                    );
                }
            }
        }
    }

    /// Stamps this context onto the event and hands it to every relay.
    pub(crate) fn prepare_for_relay(&self, mut event: BusEvent) -> Option<BusEvent> {
        let meta = event
            .metadata
            .get_or_insert_with(|| EventMetadata::originate(&self.origin));
        meta.record_hop(&self.origin);
        if meta.hop_count > self.max_hops {
            warn!(
                kind = %event.kind,
                event_id = %meta.event_id,
                hop_count = meta.hop_count,
                max_hops = self.max_hops,
                "Dropping relayed event: hop limit exceeded"
            );
            return None;
        }
        Some(event)
    }

    fn relay_out(&self, event: BusEvent) {
        let relays: Vec<Arc<dyn Relay>> = self
            .relays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if relays.is_empty() {
            return;
        }
        let Some(event) = self.prepare_for_relay(event) else {
            return;
        };
        for relay in relays {
            if let Err(e) = relay.forward(&event) {
                warn!(kind = %event.kind, error = %e, "Relay failed to forward event");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
