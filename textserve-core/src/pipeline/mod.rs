//! Pipeline seam between the dispatcher and the model execution engine.
//!
//! Each model kind has its own pipeline trait with its own input and output
//! contract. A loaded model is a [`PipelineHandle`], a closed sum over those
//! traits, so adding a kind forces every `match` on the handle to be updated.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{BackendConfig, BackendKind};
use crate::error::PipelineError;
use crate::types::{ModelDescriptor, ModelKind, Parameters};

pub use http::HttpPipelineFactory;
pub use mock::MockPipelineFactory;

/// One summarization candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub summary_text: String,
}

/// One classification label with its score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutput {
    pub label: String,
    pub score: f64,
}

/// One generated continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub generated_text: String,
}

#[async_trait]
pub trait SummarizationPipeline: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        params: &Parameters,
    ) -> Result<Vec<SummaryOutput>, PipelineError>;
}

/// Classification takes no parameters.
#[async_trait]
pub trait ClassificationPipeline: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<ClassificationOutput>, PipelineError>;
}

#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &Parameters,
    ) -> Result<Vec<GenerationOutput>, PipelineError>;
}

/// A loaded, invocable model. Cloning shares the underlying pipeline.
#[derive(Clone)]
pub enum PipelineHandle {
    Summarizer(Arc<dyn SummarizationPipeline>),
    Classifier(Arc<dyn ClassificationPipeline>),
    Generator(Arc<dyn GenerationPipeline>),
}

impl PipelineHandle {
    pub fn kind(&self) -> ModelKind {
        match self {
            PipelineHandle::Summarizer(_) => ModelKind::Summarizer,
            PipelineHandle::Classifier(_) => ModelKind::Classifier,
            PipelineHandle::Generator(_) => ModelKind::Generator,
        }
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineHandle").field(&self.kind()).finish()
    }
}

/// Builds pipelines for cataloged models, one procedure per kind.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    async fn build_summarizer(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn SummarizationPipeline>, PipelineError>;

    async fn build_classifier(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn ClassificationPipeline>, PipelineError>;

    async fn build_generator(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>, PipelineError>;

    /// Build the handle matching the descriptor's kind.
    async fn build(&self, descriptor: &ModelDescriptor) -> Result<PipelineHandle, PipelineError> {
        Ok(match descriptor.kind {
            ModelKind::Summarizer => {
                PipelineHandle::Summarizer(self.build_summarizer(descriptor).await?)
            }
            ModelKind::Classifier => {
                PipelineHandle::Classifier(self.build_classifier(descriptor).await?)
            }
            ModelKind::Generator => {
                PipelineHandle::Generator(self.build_generator(descriptor).await?)
            }
        })
    }
}

/// Create the factory selected by configuration.
pub fn factory_from_config(
    config: &BackendConfig,
) -> Result<Arc<dyn PipelineFactory>, PipelineError> {
    Ok(match config.kind {
        BackendKind::Http => Arc::new(HttpPipelineFactory::new(config)?),
        BackendKind::Mock => Arc::new(MockPipelineFactory::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_dispatches_on_kind() {
        let factory = MockPipelineFactory::new();
        for spec in crate::config::default_catalog() {
            let desc = spec.to_descriptor();
            let handle = factory.build(&desc).await.unwrap();
            assert_eq!(handle.kind(), desc.kind);
        }
    }

    #[test]
    fn test_factory_from_config_mock() {
        let config = BackendConfig {
            kind: BackendKind::Mock,
            ..BackendConfig::default()
        };
        let factory = factory_from_config(&config).unwrap();
        assert_eq!(factory.name(), "mock");
    }

    #[test]
    fn test_factory_from_config_http() {
        let factory = factory_from_config(&BackendConfig::default()).unwrap();
        assert_eq!(factory.name(), "http");
    }

    #[test]
    fn test_handle_debug_shows_kind() {
        let handle = PipelineHandle::Classifier(Arc::new(mock::MockClassifier::default()));
        assert_eq!(format!("{handle:?}"), "PipelineHandle(Classifier)");
    }
}
