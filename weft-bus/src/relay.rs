//! Forwarding events between cooperating bus contexts.

use crate::bus::EventBus;
use crate::event::BusEvent;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Carries relayed events to another context.
///
/// The bus has already stamped its origin onto the event's metadata before
/// calling [`Relay::forward`].
pub trait Relay: Send + Sync {
    fn forward(&self, event: &BusEvent) -> anyhow::Result<()>;
}

/// Delivers directly into another in-process bus.
pub struct LocalRelay {
    target: Weak<EventBus>,
}

impl LocalRelay {
    pub fn new(target: &Arc<EventBus>) -> Self {
        Self {
            target: Arc::downgrade(target),
        }
    }
}

impl Relay for LocalRelay {
    fn forward(&self, event: &BusEvent) -> anyhow::Result<()> {
        let target = self
            .target
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("target bus has been dropped"))?;
        target.receive(event.clone());
        Ok(())
    }
}

/// Sends relayed events over an unbounded channel, e.g. to a transport task.
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<BusEvent>,
}

impl ChannelRelay {
    pub fn new(tx: mpsc::UnboundedSender<BusEvent>) -> Self {
        Self { tx }
    }
}

impl Relay for ChannelRelay {
    fn forward(&self, event: &BusEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("relay channel closed"))
    }
}

/// Feeds every event arriving on `rx` into `bus.receive` until the channel
/// closes.
pub fn spawn_inbound(bus: Arc<EventBus>, mut rx: mpsc::UnboundedReceiver<BusEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            bus.receive(event);
        }
        debug!(origin = %bus.origin(), "Inbound relay channel closed");
    })
}
