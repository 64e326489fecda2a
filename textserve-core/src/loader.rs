//! Model loader: owns live pipeline handles and their lifecycle.
//!
//! Per key the lifecycle is `Unloaded -> Loading -> Loaded -> Unloaded`.
//! Loads and unloads of the same key are serialized by a per-key async mutex,
//! so concurrent requests for a cold model wait for one build instead of each
//! starting their own. Different keys never contend.

use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::catalog::ModelCatalog;
use crate::error::{LoadError, panic_message};
use crate::pipeline::{PipelineFactory, PipelineHandle};
use crate::types::{ModelKey, ModelKind, duration_to_ms};

/// Outcome of a successful [`ModelLoader::try_load`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub key: ModelKey,
    /// Build time; zero when the model was already loaded.
    pub duration: Duration,
    pub already_loaded: bool,
}

/// Brings cataloged models into memory and tears them down.
pub struct ModelLoader {
    catalog: Arc<ModelCatalog>,
    factory: Arc<dyn PipelineFactory>,
    handles: DashMap<ModelKey, PipelineHandle>,
    guards: DashMap<ModelKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("backend", &self.factory.name())
            .field("loaded", &self.handles.len())
            .finish()
    }
}

impl ModelLoader {
    pub fn new(catalog: Arc<ModelCatalog>, factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            catalog,
            factory,
            handles: DashMap::new(),
            guards: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    fn guard(&self, key: &ModelKey) -> Arc<Mutex<()>> {
        Arc::clone(self.guards.entry(key.clone()).or_default().value())
    }

    /// A handle exists for `key` and was built for `kind`.
    fn has_live_handle(&self, key: &ModelKey, kind: ModelKind) -> bool {
        self.handles.get(key).is_some_and(|h| h.kind() == kind)
    }

    /// Load a model, reporting why it failed.
    ///
    /// Idempotent: an already loaded key returns immediately without rebuilding.
    pub async fn try_load(&self, key: &ModelKey) -> Result<LoadReport, LoadError> {
        let descriptor = self
            .catalog
            .get(key)
            .ok_or_else(|| LoadError::NotRegistered { key: key.clone() })?;

        let already = || LoadReport {
            key: key.clone(),
            duration: Duration::ZERO,
            already_loaded: true,
        };
        if self.has_live_handle(key, descriptor.kind) {
            return Ok(already());
        }

        let guard = self.guard(key);
        let _lock = guard.lock().await;
        // Another caller may have finished the build while we waited.
        if self.has_live_handle(key, descriptor.kind) {
            return Ok(already());
        }

        info!(model = %key, kind = %descriptor.kind, backend = self.factory.name(), "Loading model");
        let start = Instant::now();
        let built = AssertUnwindSafe(self.factory.build(&descriptor))
            .catch_unwind()
            .await
            .map_err(|payload| LoadError::Build {
                key: key.clone(),
                message: format!("pipeline build panicked: {}", panic_message(&*payload)),
            })?;
        let handle = built.map_err(|e| LoadError::Build {
            key: key.clone(),
            message: e.to_string(),
        })?;
        let duration = start.elapsed();

        self.handles.insert(key.clone(), handle);
        self.catalog.mark_loaded(key, duration);

        Ok(LoadReport {
            key: key.clone(),
            duration,
            already_loaded: false,
        })
    }

    /// Load a model. Failures are logged and reported as `false`.
    pub async fn load(&self, key: &ModelKey) -> bool {
        match self.try_load(key).await {
            Ok(report) if report.already_loaded => {
                info!(model = %key, "Model already loaded");
                true
            }
            Ok(report) => {
                info!(
                    model = %key,
                    load_time_ms = duration_to_ms(report.duration),
                    "Model loaded successfully"
                );
                true
            }
            Err(e) => {
                error!(model = %key, error = %e, "Failed to load model");
                false
            }
        }
    }

    pub async fn load_model(&self, name: &str, version: &str) -> bool {
        self.load(&ModelKey::new(name, version)).await
    }

    /// Drop the handle for `key`. Returns whether a handle was removed.
    pub async fn unload(&self, key: &ModelKey) -> bool {
        if !self.catalog.contains(key) && !self.handles.contains_key(key) {
            return false;
        }
        let guard = self.guard(key);
        let _lock = guard.lock().await;
        let removed = self.handles.remove(key).is_some();
        self.catalog.mark_unloaded(key);
        if removed {
            info!(model = %key, "Model unloaded");
        }
        removed
    }

    pub async fn unload_model(&self, name: &str, version: &str) -> bool {
        self.unload(&ModelKey::new(name, version)).await
    }

    /// Unload every loaded model. Used at shutdown.
    pub async fn unload_all_models(&self) {
        let keys: Vec<ModelKey> = self.handles.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.unload(&key).await;
        }
    }

    /// The live handle for `key`, if loaded.
    pub fn get(&self, key: &ModelKey) -> Option<PipelineHandle> {
        self.handles.get(key).map(|e| e.value().clone())
    }

    /// Whether `key` has a handle matching its current catalog entry.
    pub fn is_loaded(&self, key: &ModelKey) -> bool {
        self.catalog
            .get(key)
            .is_some_and(|d| d.loaded && self.has_live_handle(key, d.kind))
    }

    pub fn loaded_count(&self) -> usize {
        self.handles.len()
    }
}
