//! Capability strings decoded into a closed tagged type.
//!
//! Manifests declare capabilities as `"domain.subtype"` strings. They are
//! parsed once when the manifest is loaded; everything downstream matches on
//! [`CapabilityDomain`] instead of re-splitting strings.

use crate::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The domain half of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityDomain {
    Events,
    State,
    Assets,
    Debug,
    Data,
    Ui,
}

impl CapabilityDomain {
    /// Returns the wire name of this domain.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::State => "state",
            Self::Assets => "assets",
            Self::Debug => "debug",
            Self::Data => "data",
            Self::Ui => "ui",
        }
    }
}

impl FromStr for CapabilityDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Self::Events),
            "state" => Ok(Self::State),
            "assets" => Ok(Self::Assets),
            "debug" => Ok(Self::Debug),
            "data" => Ok(Self::Data),
            "ui" => Ok(Self::Ui),
            other => Err(Error::UnknownCapabilityDomain(other.to_string())),
        }
    }
}

/// A decoded `domain.subtype` capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability {
    pub domain: CapabilityDomain,
    pub subtype: String,
}

impl Capability {
    #[must_use]
    pub fn new(domain: CapabilityDomain, subtype: impl Into<String>) -> Self {
        Self {
            domain,
            subtype: subtype.into(),
        }
    }

    /// Parses a `domain.subtype` string.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (domain, subtype) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidCapability(s.to_string()))?;
        if subtype.is_empty() || subtype.contains('.') {
            return Err(Error::InvalidCapability(s.to_string()));
        }
        Ok(Self {
            domain: domain.parse()?,
            subtype: subtype.to_string(),
        })
    }

    /// Returns true if this capability has the given domain and subtype.
    pub fn is(&self, domain: CapabilityDomain, subtype: &str) -> bool {
        self.domain == domain && self.subtype == subtype
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain.as_str(), self.subtype)
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
