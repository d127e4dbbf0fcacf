//! Widget policy: which widget definitions may run and which permissions
//! are withheld regardless of what manifests declare.
//!
//! Read from the `[policy]` table of a TOML file:
//!
//! ```toml
//! [policy]
//! mode = "allowlist"
//! widgets = ["counter", "notes"]
//! denied_capabilities = ["assets.read"]
//! ```

use crate::permissions::Permission;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};
use weft_types::WidgetDefId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only listed widget definitions may be sandboxed.
    Allowlist,
    /// Every widget definition except the listed ones.
    Denylist,
    #[default]
    Unrestricted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Widget definition ids the mode applies to.
    #[serde(default)]
    pub widgets: Vec<String>,
    /// Permission names (e.g. `events.emit`) withheld from every widget.
    #[serde(default)]
    pub denied_capabilities: HashSet<String>,
}

#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: PolicyConfig,
}

/// Enforces policy decisions for sandbox construction.
#[derive(Debug, Clone, Default)]
pub struct WidgetPolicy {
    config: PolicyConfig,
}

impl WidgetPolicy {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Loads policy from a TOML file. A missing file means unrestricted; a
    /// malformed one falls back to unrestricted with a warning.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No policy file found at {:?}, running unrestricted", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<PolicyFile>(&contents) {
                Ok(file) => {
                    info!("Loaded widget policy from {:?}", path);
                    Self::with_config(file.policy)
                }
                Err(e) => {
                    warn!(
                        "Failed to parse policy file {:?}: {}. Falling back to unrestricted mode.",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read policy file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn is_widget_allowed(&self, def_id: &WidgetDefId) -> bool {
        let listed = self.config.widgets.iter().any(|w| w == def_id.as_str());
        match self.config.mode {
            PolicyMode::Unrestricted => true,
            PolicyMode::Allowlist => listed,
            PolicyMode::Denylist => !listed,
        }
    }

    pub fn is_permission_denied(&self, permission: Permission) -> bool {
        self.config.denied_capabilities.contains(permission.name())
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}
