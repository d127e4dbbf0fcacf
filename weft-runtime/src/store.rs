//! Persistence seams: per-widget state and whole-canvas snapshots.
//!
//! Backends live outside this crate. The in-memory stores back tests and the
//! headless host; `FileCanvasStore` keeps one pretty-printed JSON snapshot per
//! canvas in a directory.

use crate::error::{RuntimeError, RuntimeResult};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use weft_types::{CanvasId, CanvasSnapshot, WidgetId};

/// Latest serialized state of each widget instance.
pub trait StateStore: Send + Sync {
    fn load(&self, widget_id: &WidgetId) -> RuntimeResult<Option<Value>>;

    fn save(&self, widget_id: &WidgetId, state: Value) -> RuntimeResult<()>;

    fn remove(&self, widget_id: &WidgetId) -> RuntimeResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<WidgetId, Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self, widget_id: &WidgetId) -> RuntimeResult<Option<Value>> {
        Ok(self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(widget_id)
            .cloned())
    }

    fn save(&self, widget_id: &WidgetId, state: Value) -> RuntimeResult<()> {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(widget_id.clone(), state);
        Ok(())
    }

    fn remove(&self, widget_id: &WidgetId) -> RuntimeResult<()> {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(widget_id);
        Ok(())
    }
}

/// Whole-canvas persistence.
pub trait CanvasStore: Send + Sync {
    fn load(&self, canvas_id: &CanvasId) -> RuntimeResult<Option<CanvasSnapshot>>;

    fn save(&self, snapshot: &CanvasSnapshot) -> RuntimeResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCanvasStore {
    canvases: RwLock<HashMap<CanvasId, CanvasSnapshot>>,
}

impl InMemoryCanvasStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanvasStore for InMemoryCanvasStore {
    fn load(&self, canvas_id: &CanvasId) -> RuntimeResult<Option<CanvasSnapshot>> {
        Ok(self
            .canvases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(canvas_id)
            .cloned())
    }

    fn save(&self, snapshot: &CanvasSnapshot) -> RuntimeResult<()> {
        self.canvases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.canvas_id.clone(), snapshot.clone());
        Ok(())
    }
}

/// Stores each canvas as `<root>/<canvas_id>.json`.
#[derive(Debug, Clone)]
pub struct FileCanvasStore {
    root: PathBuf,
}

impl FileCanvasStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, canvas_id: &CanvasId) -> RuntimeResult<PathBuf> {
        let name = canvas_id.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(RuntimeError::Store(format!("unusable canvas id '{name}'")));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl CanvasStore for FileCanvasStore {
    fn load(&self, canvas_id: &CanvasId) -> RuntimeResult<Option<CanvasSnapshot>> {
        let path = self.path_for(canvas_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let snapshot = CanvasSnapshot::from_json(&text)?;
        debug!(canvas_id = %canvas_id, path = %path.display(), "Canvas loaded");
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &CanvasSnapshot) -> RuntimeResult<()> {
        let path = self.path_for(&snapshot.canvas_id)?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(&path, snapshot.to_json_pretty()?)?;
        debug!(canvas_id = %snapshot.canvas_id, path = %path.display(), "Canvas saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_store_overwrites_and_removes() {
        let store = InMemoryStateStore::new();
        let id = WidgetId::from("a");
        store.save(&id, json!({"n": 1})).unwrap();
        store.save(&id, json!({"n": 2})).unwrap();
        assert_eq!(store.load(&id).unwrap(), Some(json!({"n": 2})));
        store.remove(&id).unwrap();
        assert_eq!(store.load(&id).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_round_trips_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCanvasStore::new(dir.path().join("canvases"));
        let canvas = CanvasId::from("home");
        assert!(store.load(&canvas).unwrap().is_none());

        let snapshot = CanvasSnapshot::empty(canvas.clone());
        store.save(&snapshot).unwrap();
        assert_eq!(store.load(&canvas).unwrap(), Some(snapshot));
    }

    #[test]
    fn file_store_rejects_path_like_ids() {
        let store = FileCanvasStore::new("/tmp");
        assert!(matches!(
            store.save(&CanvasSnapshot::empty(CanvasId::from("../etc"))),
            Err(RuntimeError::Store(_))
        ));
    }
}
