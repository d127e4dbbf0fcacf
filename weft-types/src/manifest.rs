//! Widget manifests: identity, kind, typed ports, size hints and capabilities.

use crate::{Capability, Error, Result, WidgetDefId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a widget definition executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    /// Untrusted code that runs inside a sandbox.
    #[default]
    Sandboxed,
    /// Host-provided widget rendered directly; never mounted in a sandbox.
    Native,
}

/// Data carried across a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
    Event,
    Trigger,
}

impl DataType {
    /// Two port types are compatible if either is `Any` or they are equal.
    pub fn is_compatible_with(self, other: DataType) -> bool {
        self == DataType::Any || other == DataType::Any || self == other
    }
}

/// Whether a port receives or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// One declared port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub id: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
}

impl PortSpec {
    pub fn new(id: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            data_type,
            label: None,
            capability: None,
        }
    }
}

/// Declared inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetIo {
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
}

/// Default and minimum widget dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeHints {
    #[serde(default = "default_width")]
    pub default_width: f64,
    #[serde(default = "default_height")]
    pub default_height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<f64>,
}

fn default_width() -> f64 {
    240.0
}

fn default_height() -> f64 {
    160.0
}

impl Default for SizeHints {
    fn default() -> Self {
        Self {
            default_width: default_width(),
            default_height: default_height(),
            min_width: None,
            min_height: None,
        }
    }
}

/// Static description of a widget definition.
///
/// Manifests are immutable once loaded; the runtime shares them behind `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetManifest {
    pub id: WidgetDefId,
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: WidgetKind,
    /// Guest module path relative to the asset base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(default)]
    pub io: WidgetIo,
    #[serde(default)]
    pub size: SizeHints,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl WidgetManifest {
    /// Parses and validates a manifest from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parses and validates a manifest from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks the structural rules every manifest must satisfy.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidManifest {
            manifest_id: self.id.to_string(),
            reason,
        };

        if self.id.as_str().trim().is_empty() {
            return Err(invalid("id must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("version must not be empty".into()));
        }
        if self.kind == WidgetKind::Sandboxed
            && self.entry.as_deref().is_none_or(|e| e.trim().is_empty())
        {
            return Err(invalid("sandboxed widgets require an entry".into()));
        }

        for (direction, ports) in [("input", &self.io.inputs), ("output", &self.io.outputs)] {
            let mut seen = HashSet::new();
            for port in ports {
                if port.id.trim().is_empty() {
                    return Err(invalid(format!("{direction} port id must not be empty")));
                }
                if !seen.insert(port.id.as_str()) {
                    return Err(invalid(format!("duplicate {direction} port '{}'", port.id)));
                }
            }
        }

        let size = &self.size;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(size.default_width) || !positive(size.default_height) {
            return Err(invalid("default size must be positive".into()));
        }
        if size.min_width.is_some_and(|v| !positive(v))
            || size.min_height.is_some_and(|v| !positive(v))
        {
            return Err(invalid("minimum size must be positive".into()));
        }

        Ok(())
    }

    /// Looks up a port by direction and id.
    pub fn port(&self, direction: PortDirection, id: &str) -> Option<&PortSpec> {
        let ports = match direction {
            PortDirection::Input => &self.io.inputs,
            PortDirection::Output => &self.io.outputs,
        };
        ports.iter().find(|p| p.id == id)
    }

    /// Returns true if the manifest declares the capability.
    pub fn declares(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_sandboxed(&self) -> bool {
        self.kind == WidgetKind::Sandboxed
    }
}
