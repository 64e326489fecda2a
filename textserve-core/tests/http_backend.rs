//! Integration tests for the HTTP pipeline backend against a local fake of
//! the Hugging Face Inference API.

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use textserve_core::config::BackendConfig;
use textserve_core::{BackendKind, InferenceRequest, InferenceService, ModelKind, Parameters, ServeConfig};

async fn probe(Path(id): Path<String>) -> StatusCode {
    if id == "missing" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::METHOD_NOT_ALLOWED
    }
}

async fn infer(Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let inputs = body["inputs"].as_str().unwrap_or_default().to_string();
    match id.as_str() {
        "facebook/bart-large-cnn" => Json(json!([{
            "summary_text": format!("max_length={}", body["parameters"]["max_length"])
        }]))
        .into_response(),
        "cardiffnlp/twitter-roberta-base-sentiment-latest" => Json(json!([[
            {"label": "negative", "score": 0.1},
            {"label": "positive", "score": 0.9},
        ]]))
        .into_response(),
        "gpt2" => Json(json!([{
            "generated_text": format!("{inputs} and then a great deal more happened afterwards.")
        }]))
        .into_response(),
        "garbage" => (StatusCode::OK, "not json").into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": format!("Model {id} is currently loading")})),
        )
            .into_response(),
    }
}

/// Start the fake API on an ephemeral port and return a config pointing at it.
async fn spawn_fake_backend() -> ServeConfig {
    let app = Router::new().route("/models/{*id}", get(probe).post(infer));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ServeConfig {
        backend: BackendConfig {
            kind: BackendKind::Http,
            base_url: format!("http://{addr}/"),
            api_token_env: "TEXTSERVE_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            timeout_secs: 5,
            probe_on_load: true,
        },
        ..ServeConfig::default()
    }
}

#[tokio::test]
async fn summarizer_sends_default_parameters() {
    let config = spawn_fake_backend().await;
    let service = InferenceService::from_config(&config).unwrap();
    let resp = service
        .process_inference(InferenceRequest::new("Some long article."))
        .await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.result.as_deref(), Some("max_length=150"));
}

#[tokio::test]
async fn classifier_picks_best_label_from_nested_output() {
    let config = spawn_fake_backend().await;
    let service = InferenceService::from_config(&config).unwrap();
    let resp = service
        .process_inference(InferenceRequest::new("I love this").with_model("sentiment"))
        .await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(
        resp.result.as_deref(),
        Some("Classification: positive (confidence: 0.900)")
    );
}

#[tokio::test]
async fn generator_round_trip() {
    let config = spawn_fake_backend().await;
    let service = InferenceService::from_config(&config).unwrap();
    let resp = service
        .process_inference(InferenceRequest::new("Once upon a time").with_model("generator"))
        .await;
    assert!(resp.success, "{:?}", resp.error);
    assert!(resp.result.unwrap().starts_with("Once upon a time and then"));
}

#[tokio::test]
async fn backend_error_becomes_failure_response() {
    let config = spawn_fake_backend().await;
    let service = InferenceService::from_config(&config).unwrap();
    service
        .model_registry()
        .register("busy", "v1", ModelKind::Summarizer, "busy-model", Parameters::new());

    let resp = service
        .process_inference(InferenceRequest::new("hello").with_model("busy"))
        .await;
    assert!(!resp.success);
    assert_eq!(
        resp.error.as_deref(),
        Some("Backend returned 503: Model busy-model is currently loading")
    );
}

#[tokio::test]
async fn malformed_backend_body_becomes_failure_response() {
    let config = spawn_fake_backend().await;
    let service = InferenceService::from_config(&config).unwrap();
    service
        .model_registry()
        .register("junk", "v1", ModelKind::Classifier, "garbage", Parameters::new());

    let resp = service
        .process_inference(InferenceRequest::new("hello").with_model("junk"))
        .await;
    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("parse error"));
}

#[tokio::test]
async fn failed_probe_means_model_unavailable() {
    let config = spawn_fake_backend().await;
    let service = InferenceService::from_config(&config).unwrap();
    service
        .model_registry()
        .register("gone", "v1", ModelKind::Generator, "missing", Parameters::new());

    let resp = service
        .process_inference(InferenceRequest::new("hello").with_model("gone"))
        .await;
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("Model gone:v1 not available"));
    assert!(service.get_loaded_models().is_empty());
}
