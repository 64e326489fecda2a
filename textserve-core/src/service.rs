//! Inference service: request dispatch and batch orchestration.
//!
//! The service binds requests to loaded models, loading them on demand, runs
//! the kind-specific strategy, and records metrics. Every request ends in an
//! [`InferenceResponse`]; failures are reported, never raised.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::ModelCatalog;
use crate::config::ServeConfig;
use crate::error::{BatchError, ConfigError, ExecutionError, ServeError, panic_message};
use crate::loader::ModelLoader;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::pipeline::{PipelineFactory, factory_from_config};
use crate::strategy::Executor;
use crate::types::{
    InferenceRequest, InferenceResponse, ModelKey, ModelKind, duration_to_ms,
};

/// `model_used` label for responses the dispatcher never produced.
pub const UNKNOWN_MODEL: &str = "unknown";

/// The request-serving core. Construct once and share behind an `Arc`.
#[derive(Debug)]
pub struct InferenceService {
    catalog: Arc<ModelCatalog>,
    loader: ModelLoader,
    metrics: MetricsAggregator,
    executor: Executor,
    default_model: String,
    default_version: String,
    max_batch_size: usize,
}

impl InferenceService {
    /// Build a service around an explicit pipeline factory.
    pub fn new(config: &ServeConfig, factory: Arc<dyn PipelineFactory>) -> Self {
        let catalog = Arc::new(ModelCatalog::from_specs(&config.models.catalog));
        Self {
            loader: ModelLoader::new(Arc::clone(&catalog), factory),
            catalog,
            metrics: MetricsAggregator::new(),
            executor: Executor::new(config.generation.clone()),
            default_model: config.models.default_model.clone(),
            default_version: config.models.default_version.clone(),
            max_batch_size: config.limits.max_batch_size,
        }
    }

    /// Validate the configuration and build a service with its configured backend.
    pub fn from_config(config: &ServeConfig) -> Result<Self, ServeError> {
        config.validate()?;
        let factory = factory_from_config(&config.backend).map_err(|e| ConfigError::Invalid {
            message: format!("backend: {e}"),
        })?;
        Ok(Self::new(config, factory))
    }

    /// Load the default model. A failure is logged; the service stays usable.
    pub async fn initialize(&self) -> bool {
        info!(model = %self.default_model, "Initializing inference service");
        let key = ModelKey::new(&self.default_model, &self.default_version);
        let loaded = self.loader.load(&key).await;
        if loaded {
            info!("Inference service initialized");
        } else {
            warn!(model = %key, "Default model failed to load; serving without it");
        }
        loaded
    }

    /// The key a request resolves to, after applying defaults.
    pub fn resolve_key(&self, request: &InferenceRequest) -> ModelKey {
        ModelKey::new(
            request.model.as_deref().unwrap_or(&self.default_model),
            request.version.as_deref().unwrap_or(&self.default_version),
        )
    }

    /// Process a single inference request.
    pub async fn process_inference(&self, request: InferenceRequest) -> InferenceResponse {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let key = self.resolve_key(&request);
        let label = key.to_string();

        self.metrics.record_accepted(&label);

        let outcome = AssertUnwindSafe(self.run(&key, &request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ExecutionError::Panicked {
                    message: panic_message(&*payload),
                })
            });

        match outcome {
            Ok((kind, result)) => {
                let latency = start.elapsed();
                self.metrics.record_completed(true, duration_to_ms(latency));
                info!(
                    request_id = %request_id,
                    model = %label,
                    latency_ms = duration_to_ms(latency),
                    "Inference completed successfully"
                );
                InferenceResponse::success(request_id, &key, kind, result, latency)
            }
            Err(e) => {
                let latency = start.elapsed();
                self.metrics.record_completed(false, duration_to_ms(latency));
                error!(
                    request_id = %request_id,
                    model = %label,
                    error = %e,
                    latency_ms = duration_to_ms(latency),
                    "Inference failed"
                );
                InferenceResponse::failure(request_id, label, e.to_string(), latency)
            }
        }
    }

    async fn run(
        &self,
        key: &ModelKey,
        request: &InferenceRequest,
    ) -> Result<(ModelKind, String), ExecutionError> {
        let unavailable = || ExecutionError::ModelUnavailable { key: key.clone() };

        if !self.loader.is_loaded(key) && !self.loader.load(key).await {
            return Err(unavailable());
        }
        // The model may have been unloaded between the load and this lookup.
        let handle = self.loader.get(key).ok_or_else(unavailable)?;
        let descriptor = self.catalog.get(key).ok_or_else(unavailable)?;
        if descriptor.kind != handle.kind() {
            return Err(unavailable());
        }

        let mut params = descriptor.default_parameters;
        if let Some(overrides) = &request.parameters {
            for (k, v) in overrides {
                params.insert(k.clone(), v.clone());
            }
        }

        let result = self
            .executor
            .execute(&handle, &request.text, &params)
            .await?;
        Ok((handle.kind(), result))
    }

    /// Process a batch concurrently, one task per request.
    ///
    /// Responses come back in input order. A task that dies outside the
    /// dispatcher yields an `unknown` failure response for its slot only.
    pub async fn process_batch_inference(
        self: &Arc<Self>,
        requests: Vec<InferenceRequest>,
    ) -> Result<Vec<InferenceResponse>, BatchError> {
        if requests.is_empty() {
            return Err(BatchError::Empty);
        }
        if requests.len() > self.max_batch_size {
            return Err(BatchError::TooLarge {
                size: requests.len(),
                max: self.max_batch_size,
            });
        }

        info!(size = requests.len(), "Processing batch");
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let service = Arc::clone(self);
                tokio::spawn(async move { service.process_inference(request).await })
            })
            .collect();

        let responses = futures::future::join_all(tasks)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(response) => response,
                Err(e) => {
                    let message = join_error_message(e);
                    error!(index, error = %message, "Batch item escaped dispatcher");
                    InferenceResponse::failure(Uuid::new_v4(), UNKNOWN_MODEL, message, Duration::ZERO)
                }
            })
            .collect();
        Ok(responses)
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// `name:version` of every loaded model.
    pub fn get_loaded_models(&self) -> Vec<String> {
        self.catalog.loaded_keys()
    }

    pub fn model_loader(&self) -> &ModelLoader {
        &self.loader
    }

    pub fn model_registry(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }
}

fn join_error_message(e: tokio::task::JoinError) -> String {
    if e.is_panic() {
        panic_message(&*e.into_panic())
    } else {
        e.to_string()
    }
}
