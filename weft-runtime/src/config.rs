//! Host configuration loaded from `weft.toml`.
//!
//! ```toml
//! [bus]
//! max_hops = 16
//!
//! [sandbox]
//! max_memory_bytes = 33554432
//! fuel_per_call = 500000000
//! max_payload_bytes = 262144
//! max_payload_depth = 32
//! asset_base_url = "https://assets.example/widgets"
//! debug = false
//!
//! [policy]
//! mode = "denylist"
//! widgets = ["crypto-miner"]
//! denied_capabilities = ["events.listen"]
//! ```
//!
//! Every key is optional.

use crate::error::RuntimeResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use weft_bus::DEFAULT_MAX_HOPS;
use weft_widget_host::{PayloadLimits, PolicyConfig, SandboxLimits, WidgetPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bus: BusConfig,
    pub sandbox: SandboxSettings,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub max_hops: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub max_memory_bytes: usize,
    pub fuel_per_call: u64,
    pub max_payload_bytes: usize,
    pub max_payload_depth: usize,
    /// Base URL for widget assets; each widget gets `<base>/<widget_def_id>`.
    pub asset_base_url: Option<String>,
    pub debug: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let limits = SandboxLimits::untrusted();
        Self {
            max_memory_bytes: limits.max_memory_bytes,
            fuel_per_call: limits.fuel_per_call,
            max_payload_bytes: limits.payload.max_bytes,
            max_payload_depth: limits.payload.max_depth,
            asset_base_url: None,
            debug: false,
        }
    }
}

impl HostConfig {
    pub fn from_toml(text: &str) -> RuntimeResult<Self> {
        toml::from_str(text).map_err(|e| weft_types::Error::from(e).into())
    }

    /// Loads `weft.toml`. A missing file yields defaults; a malformed one
    /// falls back to defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No host config at {:?}, using defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(config) => {
                    info!("Loaded host config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse host config {:?}: {}. Using defaults.", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read host config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            max_memory_bytes: self.sandbox.max_memory_bytes,
            fuel_per_call: self.sandbox.fuel_per_call,
            payload: PayloadLimits {
                max_bytes: self.sandbox.max_payload_bytes,
                max_depth: self.sandbox.max_payload_depth,
            },
        }
    }

    pub fn widget_policy(&self) -> WidgetPolicy {
        WidgetPolicy::with_config(self.policy.clone())
    }

    /// Asset base for one widget definition, if a base URL is configured.
    pub fn asset_base_for(&self, widget_def_id: &str) -> Option<String> {
        self.sandbox
            .asset_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), widget_def_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use weft_widget_host::PolicyMode;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(HostConfig::from_toml("").unwrap(), HostConfig::default());
        assert_eq!(HostConfig::default().bus.max_hops, 16);
        assert_eq!(HostConfig::default().limits(), SandboxLimits::untrusted());
    }

    #[test]
    fn parses_all_sections() {
        let config = HostConfig::from_toml(
            r#"
            [bus]
            max_hops = 4

            [sandbox]
            fuel_per_call = 1000
            max_payload_depth = 8
            asset_base_url = "https://assets.example/widgets/"
            debug = true

            [policy]
            mode = "allowlist"
            widgets = ["counter"]
            denied_capabilities = ["assets.read"]
            "#,
        )
        .unwrap();
        assert_eq!(config.bus.max_hops, 4);
        assert_eq!(config.limits().fuel_per_call, 1000);
        assert_eq!(config.limits().payload.max_depth, 8);
        assert_eq!(config.limits().payload.max_bytes, PayloadLimits::default().max_bytes);
        assert!(config.sandbox.debug);
        assert_eq!(config.policy.mode, PolicyMode::Allowlist);
        assert_eq!(
            config.asset_base_for("counter").as_deref(),
            Some("https://assets.example/widgets/counter")
        );
    }

    #[test]
    fn missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load_from(&dir.path().join("weft.toml"));
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(&path, "[bus]\nmax_hops = \"lots\"").unwrap();
        assert_eq!(HostConfig::load_from(&path), HostConfig::default());
    }
}
