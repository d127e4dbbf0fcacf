//! Event bus for Weft.
//!
//! A synchronous, in-process publish/subscribe bus keyed by [`EventKind`].
//! Events scoped to the user or globally are also forwarded to cooperating
//! bus contexts through a [`Relay`]; each hop is recorded in the event's
//! metadata so that no context ever processes the same event twice.
//!
//! Handler failures are contained: an error or panic raised by one handler is
//! logged and delivery continues with the next.

mod bus;
mod event;
mod relay;

pub use bus::{EventBus, Handler, Subscription, SubscriptionId, Topic, DEFAULT_MAX_HOPS};
pub use event::{BusEvent, EventKind, EventScope};
pub use relay::{spawn_inbound, ChannelRelay, LocalRelay, Relay};
