use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use weft_types::{EventMetadata, WidgetId};

/// The kind of a bus event.
///
/// Built-in kinds have fixed wire names; anything else a widget emits is
/// carried as [`EventKind::Custom`]. Parsing a built-in name always yields
/// the built-in variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    WidgetOutput,
    WidgetStateChanged,
    WidgetMounted,
    WidgetDestroyed,
    ConnectionAdded,
    ConnectionRemoved,
    Custom(String),
}

impl EventKind {
    /// Builds a kind from a widget-supplied name.
    pub fn custom(name: &str) -> Self {
        match name.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::WidgetOutput => "widget:output",
            Self::WidgetStateChanged => "widget:stateChanged",
            Self::WidgetMounted => "widget:mounted",
            Self::WidgetDestroyed => "widget:destroyed",
            Self::ConnectionAdded => "connection:added",
            Self::ConnectionRemoved => "connection:removed",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "widget:output" => Self::WidgetOutput,
            "widget:stateChanged" => Self::WidgetStateChanged,
            "widget:mounted" => Self::WidgetMounted,
            "widget:destroyed" => Self::WidgetDestroyed,
            "connection:added" => Self::ConnectionAdded,
            "connection:removed" => Self::ConnectionRemoved,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::custom(&raw))
    }
}

/// How far an event travels.
///
/// `Widget` and `Canvas` events stay on the local bus; `User` and `Global`
/// events are relayed to cooperating contexts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Widget,
    #[default]
    Canvas,
    User,
    Global,
}

impl EventScope {
    pub fn is_relayed(self) -> bool {
        matches!(self, Self::User | Self::Global)
    }
}

/// A message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub scope: EventScope,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_widget_id: Option<WidgetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_widget_id: Option<WidgetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
    /// On `widget:stateChanged`, the sequence number of the host push this
    /// state acknowledges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl BusEvent {
    /// A canvas-scoped event with no source or target.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            scope: EventScope::Canvas,
            payload,
            source_widget_id: None,
            target_widget_id: None,
            metadata: None,
            ack: None,
        }
    }

    /// `widget:output` from `source` on `port`.
    pub fn widget_output(source: WidgetId, port: &str, value: Value) -> Self {
        Self::new(
            EventKind::WidgetOutput,
            serde_json::json!({ "port": port, "value": value }),
        )
        .from_widget(source)
    }

    /// `widget:stateChanged` carrying the widget's full state.
    pub fn state_changed(source: WidgetId, state: Value) -> Self {
        Self::new(EventKind::WidgetStateChanged, state).from_widget(source)
    }

    #[must_use]
    pub fn with_scope(mut self, scope: EventScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn from_widget(mut self, source: WidgetId) -> Self {
        self.source_widget_id = Some(source);
        self
    }

    #[must_use]
    pub fn acknowledging(mut self, seq: u64) -> Self {
        self.ack = Some(seq);
        self
    }

    #[must_use]
    pub fn to_widget(mut self, target: WidgetId) -> Self {
        self.target_widget_id = Some(target);
        self
    }

    /// For `widget:output` events, the output port name.
    pub fn output_port(&self) -> Option<&str> {
        self.payload.get("port").and_then(Value::as_str)
    }

    /// For `widget:output` events, the emitted value.
    pub fn output_value(&self) -> Option<&Value> {
        self.payload.get("value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_roundtrip() {
        for kind in [
            EventKind::WidgetOutput,
            EventKind::WidgetStateChanged,
            EventKind::WidgetMounted,
            EventKind::WidgetDestroyed,
            EventKind::ConnectionAdded,
            EventKind::ConnectionRemoved,
        ] {
            assert_eq!(EventKind::custom(kind.as_str()), kind);
        }
    }

    #[test]
    fn custom_name_never_shadows_builtin() {
        assert_eq!(EventKind::custom("widget:output"), EventKind::WidgetOutput);
        assert_eq!(
            EventKind::custom("weather:update"),
            EventKind::Custom("weather:update".into())
        );
    }

    #[test]
    fn kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&EventKind::WidgetStateChanged).unwrap();
        assert_eq!(json, "\"widget:stateChanged\"");
    }

    #[test]
    fn output_accessors() {
        let e = BusEvent::widget_output(WidgetId::from("a"), "value", serde_json::json!(42));
        assert_eq!(e.kind, EventKind::WidgetOutput);
        assert_eq!(e.output_port(), Some("value"));
        assert_eq!(e.output_value(), Some(&serde_json::json!(42)));
        assert_eq!(e.source_widget_id, Some(WidgetId::from("a")));
    }

    #[test]
    fn only_user_and_global_are_relayed() {
        assert!(!EventScope::Widget.is_relayed());
        assert!(!EventScope::Canvas.is_relayed());
        assert!(EventScope::User.is_relayed());
        assert!(EventScope::Global.is_relayed());
    }
}
