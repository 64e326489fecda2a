//! Configuration system for textserve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! Configuration is loaded from `~/.config/textserve/config.toml`, then from an
//! explicit file or `.textserve/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::{ModelDescriptor, ModelKind, Parameters};

/// Top-level configuration for the inference service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub app_name: String,
    pub app_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            app_name: "textserve".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Default model selection and the startup catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model used when a request names none.
    pub default_model: String,
    /// Version used when a request names none.
    pub default_version: String,
    /// Models registered at startup.
    pub catalog: Vec<ModelSpec>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: "summarizer".to_string(),
            default_version: "v1".to_string(),
            catalog: default_catalog(),
        }
    }
}

/// One catalog entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub description: String,
    pub backend_reference: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl ModelSpec {
    pub fn to_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: self.name.clone(),
            version: self.version.clone(),
            kind: self.kind,
            description: self.description.clone(),
            backend_reference: self.backend_reference.clone(),
            default_parameters: self.parameters.clone(),
            loaded: false,
            load_duration: None,
        }
    }
}

fn default_version() -> String {
    "v1".to_string()
}

fn params(value: serde_json::Value) -> Parameters {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

/// One model per kind, backed by public hub checkpoints.
pub fn default_catalog() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            name: "summarizer".into(),
            version: "v1".into(),
            kind: ModelKind::Summarizer,
            description: "Lightweight text summarization model".into(),
            backend_reference: "facebook/bart-large-cnn".into(),
            parameters: params(json!({ "max_length": 150, "min_length": 30 })),
        },
        ModelSpec {
            name: "sentiment".into(),
            version: "v1".into(),
            kind: ModelKind::Classifier,
            description: "Sentiment analysis classifier".into(),
            backend_reference: "cardiffnlp/twitter-roberta-base-sentiment-latest".into(),
            parameters: Parameters::new(),
        },
        ModelSpec {
            name: "generator".into(),
            version: "v1".into(),
            kind: ModelKind::Generator,
            description: "Lightweight text generation model".into(),
            backend_reference: "gpt2".into(),
            parameters: params(json!({ "max_length": 100, "num_return_sequences": 1 })),
        },
    ]
}

/// Which pipeline backend builds model handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hugging Face Inference API compatible HTTP endpoint.
    #[default]
    Http,
    /// Deterministic in-process pipelines, for offline runs and tests.
    Mock,
}

/// Settings for the pipeline backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL of the inference endpoint. Models live under `{base_url}/models/{id}`.
    pub base_url: String,
    /// Environment variable holding the bearer token, if any.
    pub api_token_env: String,
    pub timeout_secs: u64,
    /// Whether building a pipeline checks that the endpoint serves the model.
    pub probe_on_load: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Http,
            base_url: "https://api-inference.huggingface.co".to_string(),
            api_token_env: "HF_API_TOKEN".to_string(),
            timeout_secs: 60,
            probe_on_load: true,
        }
    }
}

/// Quality gate and retry policy for generator models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Temperature assumed when neither the descriptor nor the request sets one.
    pub default_temperature: f64,
    /// Added to the temperature for the single retry after a degenerate output.
    pub retry_temperature_increment: f64,
    /// Output shorter than `min_length_ratio * input length` counts as degenerate.
    pub min_length_ratio: f64,
    /// Optional prompt wrapper; `{text}` is replaced by the request text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    /// Reported when the retry is degenerate too.
    pub failure_message: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_temperature: 0.7,
            retry_temperature_increment: 0.2,
            min_length_ratio: 1.1,
            prompt_template: None,
            failure_message: "Generation failed - please try different input".to_string(),
        }
    }
}

/// Request size limits enforced at the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_text_length: usize,
    pub max_batch_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_length: 10_000,
            max_batch_size: 100,
        }
    }
}

impl ServeConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.models.default_model.trim().is_empty() {
            return invalid("models.default_model must not be empty".into());
        }
        if self.models.default_version.trim().is_empty() {
            return invalid("models.default_version must not be empty".into());
        }
        if self.limits.max_text_length == 0 {
            return invalid("limits.max_text_length must be positive".into());
        }
        if self.limits.max_batch_size == 0 {
            return invalid("limits.max_batch_size must be positive".into());
        }
        let ratio = self.generation.min_length_ratio;
        if ratio.is_nan() || ratio <= 0.0 {
            return invalid("generation.min_length_ratio must be positive".into());
        }

        let mut seen = HashSet::new();
        for spec in &self.models.catalog {
            if spec.name.is_empty() || spec.version.is_empty() {
                return invalid("catalog entries need a name and a version".into());
            }
            if !seen.insert((spec.name.as_str(), spec.version.as_str())) {
                return invalid(format!(
                    "duplicate catalog entry {}:{}",
                    spec.name, spec.version
                ));
            }
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `TEXTSERVE_`)
/// 2. The explicit `config_file`, or else `.textserve/config.toml` in the workspace
/// 3. User config (`~/.config/textserve/config.toml`)
/// 4. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<ServeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ServeConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "textserve", "textserve") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match config_file {
        Some(path) => figment = figment.merge(Toml::file(path)),
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(".textserve").join("config.toml");
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    // Environment variables (TEXTSERVE_SERVER__PORT, TEXTSERVE_MODELS__DEFAULT_MODEL, etc.)
    figment = figment.merge(Env::prefixed("TEXTSERVE_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Load configuration and check it, reporting both failures as [`ConfigError`].
pub fn load_validated_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<ServeConfig, ConfigError> {
    let config = load_config(workspace, config_file).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
