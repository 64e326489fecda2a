//! HTTP pipelines for Hugging Face Inference API compatible endpoints.
//!
//! The descriptor's backend reference is the hub model id. Every call is a
//! `POST {base_url}/models/{id}` with `{"inputs": ..., "parameters": ...}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    ClassificationOutput, ClassificationPipeline, GenerationOutput, GenerationPipeline,
    PipelineFactory, SummarizationPipeline, SummaryOutput,
};
use crate::config::BackendConfig;
use crate::error::PipelineError;
use crate::types::{ModelDescriptor, Parameters};

/// Builds pipelines that call a remote inference endpoint.
#[derive(Debug, Clone)]
pub struct HttpPipelineFactory {
    client: Client,
    base_url: String,
    token: Option<String>,
    probe_on_load: bool,
}

impl HttpPipelineFactory {
    /// Create a factory from configuration.
    ///
    /// The bearer token is read once from the environment variable named by
    /// `config.api_token_env`; an unset or empty variable means no token.
    pub fn new(config: &BackendConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| PipelineError::Request {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        let token = std::env::var(&config.api_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            probe_on_load: config.probe_on_load,
        })
    }

    fn endpoint(&self, descriptor: &ModelDescriptor) -> HttpEndpoint {
        HttpEndpoint {
            client: self.client.clone(),
            url: format!("{}/models/{}", self.base_url, descriptor.backend_reference),
            token: self.token.clone(),
        }
    }

    /// Create the endpoint for a descriptor, probing it first if configured.
    async fn connect(&self, descriptor: &ModelDescriptor) -> Result<HttpEndpoint, PipelineError> {
        let endpoint = self.endpoint(descriptor);
        if self.probe_on_load {
            endpoint.probe().await?;
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl PipelineFactory for HttpPipelineFactory {
    fn name(&self) -> &str {
        "http"
    }

    async fn build_summarizer(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn SummarizationPipeline>, PipelineError> {
        Ok(Arc::new(HttpSummarizer(self.connect(descriptor).await?)))
    }

    async fn build_classifier(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn ClassificationPipeline>, PipelineError> {
        Ok(Arc::new(HttpClassifier(self.connect(descriptor).await?)))
    }

    async fn build_generator(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>, PipelineError> {
        Ok(Arc::new(HttpGenerator(self.connect(descriptor).await?)))
    }
}

/// A single model URL plus the client used to reach it.
#[derive(Debug, Clone)]
struct HttpEndpoint {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpEndpoint {
    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Check that the endpoint answers for this model.
    ///
    /// `405` counts as reachable: some deployments only accept `POST`.
    async fn probe(&self) -> Result<(), PipelineError> {
        debug!(url = %self.url, "Probing inference endpoint");
        let response = self
            .authorize(self.client.get(&self.url))
            .send()
            .await
            .map_err(|e| PipelineError::Request {
                message: format!("Probe failed: {e}"),
            })?;
        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(backend_error(status, &body))
    }

    async fn invoke<T: DeserializeOwned>(&self, body: Value) -> Result<T, PipelineError> {
        debug!(url = %self.url, "Sending inference request");
        let response = self
            .authorize(self.client.post(&self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Request {
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PipelineError::Request {
            message: format!("Failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(backend_error(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| PipelineError::ResponseParse {
            message: format!("Invalid JSON: {e}"),
        })
    }
}

/// Prefer the `error` field of a JSON error body, fall back to the raw text.
fn backend_error(status: StatusCode, body: &str) -> PipelineError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string());
    PipelineError::Backend {
        status: status.as_u16(),
        message,
    }
}

fn request_body(inputs: &str, params: Option<&Parameters>) -> Value {
    let mut body = json!({
        "inputs": inputs,
        "options": { "wait_for_model": true },
    });
    if let Some(params) = params
        && !params.is_empty()
    {
        body["parameters"] = Value::Object(params.clone());
    }
    body
}

struct HttpSummarizer(HttpEndpoint);

#[async_trait]
impl SummarizationPipeline for HttpSummarizer {
    async fn summarize(
        &self,
        text: &str,
        params: &Parameters,
    ) -> Result<Vec<SummaryOutput>, PipelineError> {
        self.0.invoke(request_body(text, Some(params))).await
    }
}

struct HttpClassifier(HttpEndpoint);

#[async_trait]
impl ClassificationPipeline for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<ClassificationOutput>, PipelineError> {
        let raw: Value = self.0.invoke(request_body(text, None)).await?;
        parse_classification(raw)
    }
}

/// Accept `[{label, score}]` and `[[{label, score}]]`, best score first.
fn parse_classification(raw: Value) -> Result<Vec<ClassificationOutput>, PipelineError> {
    let flat = match raw {
        Value::Array(mut outer) if matches!(outer.first(), Some(Value::Array(_))) => {
            outer.swap_remove(0)
        }
        other => other,
    };
    let mut labels: Vec<ClassificationOutput> =
        serde_json::from_value(flat).map_err(|e| PipelineError::ResponseParse {
            message: format!("Unexpected classification shape: {e}"),
        })?;
    labels.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(labels)
}

struct HttpGenerator(HttpEndpoint);

#[async_trait]
impl GenerationPipeline for HttpGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &Parameters,
    ) -> Result<Vec<GenerationOutput>, PipelineError> {
        self.0.invoke(request_body(prompt, Some(params))).await
    }
}
