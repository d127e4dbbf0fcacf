//! Size and shape checks for values crossing the isolation boundary.

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounds applied to every cross-boundary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLimits {
    pub max_bytes: usize,
    pub max_depth: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024,
            max_depth: 32,
        }
    }
}

impl PayloadLimits {
    /// Rejects raw message bytes that exceed the size ceiling.
    pub fn check_len(&self, len: usize) -> Result<(), SandboxError> {
        if len > self.max_bytes {
            return Err(SandboxError::InvalidPayload(format!(
                "{len} bytes exceeds limit of {}",
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// Checks nesting depth and serialized size of a decoded value.
    pub fn check(&self, value: &Value) -> Result<(), SandboxError> {
        let depth = depth_of(value);
        if depth > self.max_depth {
            return Err(SandboxError::InvalidPayload(format!(
                "nesting depth {depth} exceeds limit of {}",
                self.max_depth
            )));
        }
        self.check_len(serde_json::to_vec(value)?.len())
    }

    /// Validates a host-side state patch: it must be a JSON object.
    pub fn check_patch(&self, patch: &Value) -> Result<(), SandboxError> {
        if !patch.is_object() {
            return Err(SandboxError::InvalidPayload(
                "state patch must be a JSON object".into(),
            ));
        }
        self.check(patch)
    }
}

fn depth_of(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

/// Shallow-merges `patch` into `state`. A non-object state is replaced.
pub(crate) fn merge_patch(state: &mut Value, patch: &Value) {
    let Some(patch) = patch.as_object() else {
        return;
    };
    if !state.is_object() {
        *state = Value::Object(Default::default());
    }
    if let Some(target) = state.as_object_mut() {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(depth: usize) -> Value {
        let mut v = json!(1);
        for _ in 0..depth {
            v = json!([v]);
        }
        v
    }

    #[test]
    fn depth_counts_containers() {
        assert_eq!(depth_of(&json!(1)), 0);
        assert_eq!(depth_of(&json!({"a": [1]})), 2);
        assert_eq!(depth_of(&nested(5)), 5);
    }

    #[test]
    fn rejects_deep_values() {
        let limits = PayloadLimits {
            max_bytes: 1024,
            max_depth: 4,
        };
        assert!(limits.check(&nested(4)).is_ok());
        assert!(matches!(
            limits.check(&nested(5)),
            Err(SandboxError::InvalidPayload(_))
        ));
    }

    #[test]
    fn rejects_large_values() {
        let limits = PayloadLimits {
            max_bytes: 16,
            max_depth: 8,
        };
        assert!(limits.check(&json!("short")).is_ok());
        assert!(limits.check(&json!("a string well past sixteen bytes")).is_err());
    }

    #[test]
    fn patch_must_be_object() {
        let limits = PayloadLimits::default();
        assert!(limits.check_patch(&json!({"amount": 1})).is_ok());
        assert!(limits.check_patch(&json!([1, 2])).is_err());
        assert!(limits.check_patch(&json!(3)).is_err());
    }

    #[test]
    fn merge_is_shallow() {
        let mut state = json!({"a": 1, "nested": {"x": 1}});
        merge_patch(&mut state, &json!({"b": 2, "nested": {"y": 2}}));
        assert_eq!(state, json!({"a": 1, "b": 2, "nested": {"y": 2}}));
    }

    #[test]
    fn merge_replaces_non_object_state() {
        let mut state = json!(null);
        merge_patch(&mut state, &json!({"a": 1}));
        assert_eq!(state, json!({"a": 1}));
    }
}
