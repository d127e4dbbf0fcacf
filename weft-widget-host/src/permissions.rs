//! Capability-based permission model for widget sandboxes.
//!
//! Two tiers:
//! - Always granted: own state, declared outputs, intents, debug log
//! - Declared: event emit/listen and asset access, only when the manifest
//!   lists the matching capability
//!
//! Policy may deny any permission from either tier.

use crate::policy::WidgetPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;
use weft_types::{Capability, CapabilityDomain, WidgetManifest};

/// Individual permission a widget may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    // Always granted
    State,
    Output,
    Intent,
    DebugLog,

    // Declared
    EventsEmit,
    EventsListen,
    AssetsRead,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::State,
        Permission::Output,
        Permission::Intent,
        Permission::DebugLog,
        Permission::EventsEmit,
        Permission::EventsListen,
        Permission::AssetsRead,
    ];

    pub fn tier(&self) -> PermissionTier {
        match self {
            Self::State | Self::Output | Self::Intent | Self::DebugLog => {
                PermissionTier::AlwaysGranted
            }
            Self::EventsEmit | Self::EventsListen | Self::AssetsRead => PermissionTier::Declared,
        }
    }

    /// Name used in policy files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Output => "output",
            Self::Intent => "intent",
            Self::DebugLog => "debug.log",
            Self::EventsEmit => "events.emit",
            Self::EventsListen => "events.listen",
            Self::AssetsRead => "assets.read",
        }
    }

    /// The manifest capability that unlocks a declared permission.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Self::EventsEmit => Some(Capability::new(CapabilityDomain::Events, "emit")),
            Self::EventsListen => Some(Capability::new(CapabilityDomain::Events, "listen")),
            Self::AssetsRead => Some(Capability::new(CapabilityDomain::Assets, "read")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionTier {
    AlwaysGranted,
    Declared,
}

/// Set of permissions granted to one sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    granted: HashSet<Permission>,
    /// Denied by policy; never granted for the sandbox's lifetime.
    denied: HashSet<Permission>,
}

impl PermissionSet {
    /// Only the always-granted tier.
    pub fn baseline() -> Self {
        let granted = Permission::ALL
            .into_iter()
            .filter(|p| p.tier() == PermissionTier::AlwaysGranted)
            .collect();
        Self {
            granted,
            denied: HashSet::new(),
        }
    }

    /// Every permission (for testing).
    pub fn all_granted() -> Self {
        Self {
            granted: Permission::ALL.into_iter().collect(),
            denied: HashSet::new(),
        }
    }

    /// Resolves the permissions a widget receives from its manifest and the
    /// active policy.
    pub fn for_manifest(manifest: &WidgetManifest, policy: &WidgetPolicy) -> Self {
        let mut set = Self::baseline();
        for permission in Permission::ALL {
            if let Some(cap) = permission.required_capability()
                && manifest.declares(&cap)
            {
                set.grant(permission);
            }
            if policy.is_permission_denied(permission) {
                info!(widget = %manifest.id, permission = permission.name(), "Permission denied by policy");
                set.deny(permission);
            }
        }
        set
    }

    pub fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    pub fn is_denied(&self, permission: Permission) -> bool {
        self.denied.contains(&permission)
    }

    pub fn grant(&mut self, permission: Permission) {
        if !self.denied.contains(&permission) {
            self.granted.insert(permission);
        }
    }

    pub fn deny(&mut self, permission: Permission) {
        self.granted.remove(&permission);
        self.denied.insert(permission);
    }

    pub fn granted_permissions(&self) -> &HashSet<Permission> {
        &self.granted
    }
}
