//! Model catalog: the registry of known models and their load state.
//!
//! Entries live in a sharded concurrent map, so flipping the load flag of one
//! model never waits on readers or writers of an unrelated key.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

use crate::config::ModelSpec;
use crate::types::{ModelDescriptor, ModelKey, ModelKind, Parameters};

/// Registry mapping `name:version` to model metadata.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: DashMap<ModelKey, ModelDescriptor>,
}

impl ModelCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog pre-populated from configuration.
    pub fn from_specs(specs: &[ModelSpec]) -> Self {
        let catalog = Self::new();
        for spec in specs {
            catalog.insert(spec.to_descriptor());
        }
        catalog
    }

    /// Insert or overwrite the descriptor at `name:version`. Last write wins.
    pub fn register(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        kind: ModelKind,
        backend_reference: impl Into<String>,
        default_parameters: Parameters,
    ) {
        self.insert(ModelDescriptor {
            name: name.into(),
            version: version.into(),
            kind,
            description: String::new(),
            backend_reference: backend_reference.into(),
            default_parameters,
            loaded: false,
            load_duration: None,
        });
    }

    /// Insert or overwrite a fully specified descriptor.
    ///
    /// Re-registering a loaded key with the same kind keeps its load state:
    /// the live handle keeps serving until unloaded. A kind change marks the
    /// key unloaded so the next load rebuilds it.
    pub fn insert(&self, mut descriptor: ModelDescriptor) {
        let key = descriptor.key();
        match self.models.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get();
                if previous.loaded && previous.kind == descriptor.kind {
                    descriptor.loaded = true;
                    descriptor.load_duration = previous.load_duration;
                    tracing::warn!(
                        model = %key,
                        "Catalog entry overwritten while loaded; reload to apply"
                    );
                } else if previous.loaded {
                    descriptor.loaded = false;
                    descriptor.load_duration = None;
                    tracing::error!(
                        model = %key,
                        from = %previous.kind,
                        to = %descriptor.kind,
                        "Catalog entry changed kind while loaded; marking unloaded"
                    );
                }
                entry.insert(descriptor);
            }
            Entry::Vacant(entry) => {
                entry.insert(descriptor);
            }
        }
    }

    /// Look up a descriptor. Returns a snapshot; later changes are not reflected.
    pub fn get(&self, key: &ModelKey) -> Option<ModelDescriptor> {
        self.models.get(key).map(|entry| entry.value().clone())
    }

    /// All registered descriptors, each exactly once, sorted by key.
    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        let mut all: Vec<ModelDescriptor> =
            self.models.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        all
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.models.contains_key(key)
    }

    /// Record that a model finished loading. No-op for unknown keys.
    pub fn mark_loaded(&self, key: &ModelKey, duration: Duration) {
        if let Some(mut entry) = self.models.get_mut(key) {
            entry.loaded = true;
            entry.load_duration = Some(duration);
        }
    }

    /// Record that a model was unloaded. No-op for unknown keys.
    pub fn mark_unloaded(&self, key: &ModelKey) {
        if let Some(mut entry) = self.models.get_mut(key) {
            entry.loaded = false;
            entry.load_duration = None;
        }
    }

    /// `name:version` strings of every loaded model, sorted.
    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .models
            .iter()
            .filter(|entry| entry.value().loaded)
            .map(|entry| entry.key().to_string())
            .collect();
        keys.sort();
        keys
    }
}
