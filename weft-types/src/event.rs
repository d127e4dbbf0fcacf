//! Metadata attached to events that cross execution contexts.
//!
//! Every bus context has an [`OriginId`]. When an event leaves a context its
//! origin is appended to `seen_by` and `hop_count` is incremented; a context
//! drops any event whose `seen_by` already names it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Names one bus context (a tab, a device, a session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    /// Generates a fresh, unique origin.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OriginId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OriginId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where an event was first emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Cross-context bookkeeping carried by relayed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: EventId,
    #[serde(default)]
    pub origin: EventOrigin,
    /// Contexts that have already processed this event, in visiting order.
    #[serde(default)]
    pub seen_by: Vec<OriginId>,
    #[serde(default)]
    pub hop_count: u32,
    pub origin_timestamp_ms: i64,
}

impl EventMetadata {
    /// Fresh metadata for an event first emitted by `session_id`.
    pub fn originate(session_id: &OriginId) -> Self {
        Self {
            event_id: EventId::new(),
            origin: EventOrigin {
                session_id: Some(session_id.to_string()),
                ..EventOrigin::default()
            },
            seen_by: Vec::new(),
            hop_count: 0,
            origin_timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn has_seen(&self, origin: &OriginId) -> bool {
        self.seen_by.contains(origin)
    }

    /// Records that `origin` processed the event and is forwarding it.
    pub fn record_hop(&mut self, origin: &OriginId) {
        if !self.has_seen(origin) {
            self.seen_by.push(origin.clone());
        }
        self.hop_count = self.hop_count.saturating_add(1);
    }
}
