//! Kind-specific execution strategies.
//!
//! Each pipeline kind has its own input contract and its own way of turning
//! raw pipeline output into the response text. The match on
//! [`PipelineHandle`] is exhaustive, so a new kind cannot be silently ignored.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::config::GenerationConfig;
use crate::error::ExecutionError;
use crate::pipeline::{
    ClassificationPipeline, GenerationPipeline, PipelineHandle, SummarizationPipeline,
};
use crate::types::Parameters;

/// Result text reported when a classifier returns no labels.
pub const CLASSIFICATION_FAILED: &str = "Classification failed";

/// Runs a request text through a loaded pipeline.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    generation: GenerationConfig,
}

impl Executor {
    pub fn new(generation: GenerationConfig) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Invoke the strategy matching the handle's kind.
    pub async fn execute(
        &self,
        handle: &PipelineHandle,
        text: &str,
        params: &Parameters,
    ) -> Result<String, ExecutionError> {
        match handle {
            PipelineHandle::Summarizer(p) => summarize(p, text, params).await,
            PipelineHandle::Classifier(p) => classify(p, text).await,
            PipelineHandle::Generator(p) => self.generate(p, text, params).await,
        }
    }

    /// Generate, retrying once with more randomness if the output is degenerate.
    async fn generate(
        &self,
        pipeline: &Arc<dyn GenerationPipeline>,
        text: &str,
        params: &Parameters,
    ) -> Result<String, ExecutionError> {
        let prompt = match &self.generation.prompt_template {
            Some(template) => template.replace("{text}", text),
            None => text.to_string(),
        };

        let first = first_generated(pipeline.generate(&prompt, params).await?);
        if let Some(output) = first.as_deref()
            && !self.is_degenerate(text, output)
        {
            return Ok(output.to_string());
        }

        let retry_params = self.retry_parameters(params);
        warn!(
            temperature = ?retry_params.get("temperature"),
            "Degenerate generation, retrying with sampling"
        );
        let second = first_generated(pipeline.generate(&prompt, &retry_params).await?);
        match second {
            Some(output) if !self.is_degenerate(text, &output) => Ok(output),
            _ => Err(ExecutionError::DegenerateOutput {
                message: self.generation.failure_message.clone(),
            }),
        }
    }

    /// Raise the temperature and force sampling.
    pub fn retry_parameters(&self, params: &Parameters) -> Parameters {
        let base = params
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(self.generation.default_temperature);
        let mut retry = params.clone();
        retry.insert(
            "temperature".to_string(),
            Value::from(base + self.generation.retry_temperature_increment),
        );
        retry.insert("do_sample".to_string(), Value::Bool(true));
        retry
    }

    /// Output equal to the input (ignoring case and surrounding whitespace), or
    /// shorter than `min_length_ratio` times the input, is degenerate.
    pub fn is_degenerate(&self, input: &str, output: &str) -> bool {
        let input = input.trim();
        let output = output.trim();
        if output.to_lowercase() == input.to_lowercase() {
            return true;
        }
        let input_len = input.chars().count() as f64;
        let output_len = output.chars().count() as f64;
        output_len < input_len * self.generation.min_length_ratio
    }
}

async fn summarize(
    pipeline: &Arc<dyn SummarizationPipeline>,
    text: &str,
    params: &Parameters,
) -> Result<String, ExecutionError> {
    let outputs = pipeline.summarize(text, params).await?;
    Ok(outputs
        .into_iter()
        .next()
        .map(|s| s.summary_text)
        .unwrap_or_default())
}

async fn classify(
    pipeline: &Arc<dyn ClassificationPipeline>,
    text: &str,
) -> Result<String, ExecutionError> {
    let outputs = pipeline.classify(text).await?;
    Ok(match outputs.first() {
        Some(top) => format!(
            "Classification: {} (confidence: {:.3})",
            top.label, top.score
        ),
        None => CLASSIFICATION_FAILED.to_string(),
    })
}

fn first_generated(outputs: Vec<crate::pipeline::GenerationOutput>) -> Option<String> {
    outputs.into_iter().next().map(|g| g.generated_text)
}
