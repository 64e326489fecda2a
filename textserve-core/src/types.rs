//! Core type definitions for textserve.
//!
//! Defines the data carried between the catalog, the loader, and the
//! dispatcher: model kinds and keys, inference requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Free-form model parameters. Merging is shallow: keys from the
/// request replace keys from the descriptor's defaults.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// The closed set of model behaviours the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Summarizer,
    Classifier,
    Generator,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Summarizer => "summarizer",
            ModelKind::Classifier => "classifier",
            ModelKind::Generator => "generator",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cataloged model. Displays as `name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub name: String,
    pub version: String,
}

impl ModelKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl std::str::FromStr for ModelKey {
    type Err = String;

    /// Splits on the last `:` so model names may themselves contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(ModelKey::new(name, version))
            }
            _ => Err(format!("expected `name:version`, got `{s}`")),
        }
    }
}

/// Catalog entry describing one model at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub description: String,
    /// Opaque identifier of the weights/pipeline the backend should instantiate.
    pub backend_reference: String,
    #[serde(default)]
    pub default_parameters: Parameters,
    #[serde(default)]
    pub loaded: bool,
    #[serde(
        default,
        rename = "load_time_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub load_duration: Option<Duration>,
}

impl ModelDescriptor {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(&self.name, &self.version)
    }
}

/// A single text-processing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

impl InferenceRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters
            .get_or_insert_with(Parameters::new)
            .insert(key.into(), value);
        self
    }

    /// Trim the text in place and check it against the length limit.
    ///
    /// Length is counted in characters, after trimming.
    pub fn validate(&mut self, max_text_len: usize) -> Result<(), String> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            return Err("Text cannot be empty or whitespace only".to_string());
        }
        let len = trimmed.chars().count();
        if len > max_text_len {
            return Err(format!(
                "Text is too long: {len} characters (maximum {max_text_len})"
            ));
        }
        if trimmed.len() != self.text.len() {
            self.text = trimmed.to_string();
        }
        Ok(())
    }
}

/// A batch of independent requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInferenceRequest {
    pub requests: Vec<InferenceRequest>,
}

/// Outcome of one request, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub model_used: String,
    pub latency_ms: f64,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl InferenceResponse {
    pub fn success(
        request_id: Uuid,
        model_used: &ModelKey,
        kind: ModelKind,
        result: String,
        latency: Duration,
    ) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "model_type".to_string(),
            serde_json::Value::String(kind.as_str().to_string()),
        );
        Self {
            success: true,
            result: Some(result),
            model_used: model_used.to_string(),
            latency_ms: duration_to_ms(latency),
            request_id,
            timestamp: Utc::now(),
            error: None,
            metadata,
        }
    }

    pub fn failure(
        request_id: Uuid,
        model_used: impl Into<String>,
        error: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            success: false,
            result: None,
            model_used: model_used.into(),
            latency_ms: duration_to_ms(latency),
            request_id,
            timestamp: Utc::now(),
            error: Some(error.into()),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Milliseconds rounded to two decimals, the precision reported everywhere.
pub fn duration_to_ms(d: Duration) -> f64 {
    round2(d.as_secs_f64() * 1000.0)
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_f64(super::duration_to_ms(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<f64>::deserialize(d)?;
        Ok(ms
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0)))
    }
}
