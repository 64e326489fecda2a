//! # Textserve Core
//!
//! Core library for the textserve inference service.
//! Provides the model catalog, the model loader, the inference dispatcher and
//! batch orchestrator, request metrics, configuration, and the HTTP gateway.

pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod strategy;
pub mod types;

// Re-export commonly used types at the crate root.
pub use catalog::ModelCatalog;
pub use config::{BackendKind, ServeConfig, load_config, load_validated_config};
pub use error::{BatchError, ConfigError, ExecutionError, LoadError, PipelineError, ServeError};
pub use gateway::{GatewayState, SharedState, gateway_router, run_gateway};
pub use loader::{LoadReport, ModelLoader};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use pipeline::{
    HttpPipelineFactory, MockPipelineFactory, PipelineFactory, PipelineHandle,
    factory_from_config,
};
pub use service::InferenceService;
pub use strategy::Executor;
pub use types::{
    BatchInferenceRequest, InferenceRequest, InferenceResponse, ModelDescriptor, ModelKey,
    ModelKind, Parameters,
};
