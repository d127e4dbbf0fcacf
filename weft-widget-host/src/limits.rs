//! Resource ceilings for a widget guest.

use crate::payload::PayloadLimits;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use wasmtime::ResourceLimiter;

/// Resource limits for one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Linear memory ceiling for wasm guests.
    pub max_memory_bytes: usize,
    /// Fuel granted to each guest call (bounds runaway loops).
    pub fuel_per_call: u64,
    pub payload: PayloadLimits,
}

impl SandboxLimits {
    /// Limits for host-shipped widgets.
    pub fn trusted() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024,
            fuel_per_call: 1_000_000_000,
            payload: PayloadLimits::default(),
        }
    }

    /// Limits for marketplace and user-authored widgets.
    pub fn untrusted() -> Self {
        Self {
            max_memory_bytes: 32 * 1024 * 1024,
            fuel_per_call: 500_000_000,
            payload: PayloadLimits::default(),
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::untrusted()
    }
}

/// Memory limiter that records how much linear memory the guest holds.
pub struct GuestMemoryLimiter {
    max_memory: usize,
    current_memory: AtomicUsize,
    max_tables: usize,
    max_table_elements: usize,
    max_instances: usize,
    max_memories: usize,
}

impl GuestMemoryLimiter {
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            current_memory: AtomicUsize::new(0),
            max_tables: 10,
            max_table_elements: 20_000,
            max_instances: 1,
            max_memories: 1,
        }
    }

    pub fn current_memory_bytes(&self) -> usize {
        self.current_memory.load(Ordering::Relaxed)
    }
}

impl ResourceLimiter for GuestMemoryLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired <= self.max_memory {
            self.current_memory.store(desired, Ordering::Relaxed);
            Ok(true)
        } else {
            debug!(
                current = current,
                desired = desired,
                max = self.max_memory,
                "Guest memory growth denied"
            );
            Ok(false)
        }
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_table_elements)
    }

    fn instances(&self) -> usize {
        self.max_instances
    }

    fn tables(&self) -> usize {
        self.max_tables
    }

    fn memories(&self) -> usize {
        self.max_memories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_is_more_generous() {
        let t = SandboxLimits::trusted();
        let u = SandboxLimits::untrusted();
        assert!(t.max_memory_bytes > u.max_memory_bytes);
        assert!(t.fuel_per_call > u.fuel_per_call);
        assert_eq!(SandboxLimits::default(), u);
    }

    #[test]
    fn limiter_tracks_granted_growth_only() {
        let mut limiter = GuestMemoryLimiter::new(128 * 1024);
        assert!(limiter.memory_growing(0, 64 * 1024, None).unwrap());
        assert_eq!(limiter.current_memory_bytes(), 64 * 1024);
        assert!(!limiter.memory_growing(64 * 1024, 192 * 1024, None).unwrap());
        assert_eq!(limiter.current_memory_bytes(), 64 * 1024);
    }
}
