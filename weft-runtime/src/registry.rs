//! Merged map of widget manifests, looked up by definition id.

use crate::error::{RuntimeError, RuntimeResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use weft_types::{WidgetDefId, WidgetManifest};

/// Registry of loaded manifests. Later registrations replace earlier ones
/// with the same id.
#[derive(Debug, Default)]
pub struct ManifestRegistry {
    manifests: RwLock<HashMap<WidgetDefId, Arc<WidgetManifest>>>,
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a manifest.
    pub fn register(&self, manifest: WidgetManifest) -> RuntimeResult<Arc<WidgetManifest>> {
        manifest.validate()?;
        let manifest = Arc::new(manifest);
        let previous = self
            .manifests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manifest.id.clone(), Arc::clone(&manifest));
        if previous.is_some() {
            debug!(widget = %manifest.id, "Manifest replaced");
        }
        info!(widget = %manifest.id, version = %manifest.version, "Manifest registered");
        Ok(manifest)
    }

    pub fn get(&self, id: &WidgetDefId) -> Option<Arc<WidgetManifest>> {
        self.manifests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &WidgetDefId) -> bool {
        self.manifests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.manifests.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<WidgetDefId> {
        let mut ids: Vec<_> = self
            .manifests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Loads every `*.json` and `*.toml` manifest in `dir`.
    ///
    /// Files that fail to parse or validate are skipped with a warning.
    /// Returns the number of manifests registered.
    pub fn load_dir(&self, dir: &Path) -> RuntimeResult<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let parse: fn(&str) -> weft_types::Result<WidgetManifest> =
                match path.extension().and_then(|e| e.to_str()) {
                    Some("json") => WidgetManifest::from_json,
                    Some("toml") => WidgetManifest::from_toml,
                    _ => continue,
                };
            let result = std::fs::read_to_string(&path)
                .map_err(RuntimeError::from)
                .and_then(|text| parse(&text).map_err(RuntimeError::from))
                .and_then(|manifest| self.register(manifest));
            match result {
                Ok(_) => loaded += 1,
                Err(e) => warn!(path = %path.display(), "Skipping manifest: {}", e),
            }
        }
        Ok(loaded)
    }
}
