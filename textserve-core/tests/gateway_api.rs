//! Integration tests for the gateway REST API endpoints.

use axum::body::Body;
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use textserve_core::{
    GatewayState, InferenceService, MockPipelineFactory, ServeConfig, SharedState, gateway_router,
};
use tower::ServiceExt;

fn make_state() -> SharedState {
    let config = ServeConfig::default();
    let service = InferenceService::new(&config, Arc::new(MockPipelineFactory::new()));
    Arc::new(GatewayState::new(Arc::new(service), &config))
}

fn make_request(uri: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn make_post_request(uri: &str, body: Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn send(state: &SharedState, req: axum::http::Request<Body>) -> (StatusCode, Value) {
    let app = gateway_router(Arc::clone(state));
    let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app, req)
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

// --- root ---

#[tokio::test]
async fn test_root_app_info() {
    let state = make_state();
    let (status, json) = send(&state, make_request("/")).await;
    assert_eq!(status, 200);
    assert_eq!(json["app_name"], "textserve");
    assert!(json["version"].is_string());
}

// --- health ---

#[tokio::test]
async fn test_health_reports_version_and_models() {
    let state = make_state();
    let (status, json) = send(&state, make_request("/health")).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("version").is_some());
    assert!(json.get("timestamp").is_some());
    assert!(json["uptime_seconds"].as_f64().unwrap() >= 0.0);
    assert_eq!(json["models_loaded"], json!([]));
}

#[tokio::test]
async fn test_ready_after_model_load() {
    let state = make_state();
    let (_, json) = send(&state, make_request("/health/ready")).await;
    assert_eq!(json["status"], "not_ready");

    let (status, json) = send(&state, make_post_request("/models/sentiment/load", json!({}))).await;
    assert_eq!(status, 200);
    assert!(json["message"].as_str().unwrap().contains("sentiment:v1"));

    let (_, json) = send(&state, make_request("/health/ready")).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["models_loaded"], 1);
}

// --- /infer ---

#[tokio::test]
async fn test_infer_classifier() {
    let state = make_state();
    let (status, json) = send(
        &state,
        make_post_request("/infer", json!({"text": "  I love this  ", "model": "sentiment"})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(json["model_used"], "sentiment:v1");
    assert_eq!(json["result"], "Classification: positive (confidence: 0.750)");
    assert_eq!(json["metadata"]["model_type"], "classifier");
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn test_infer_rejects_blank_text() {
    let state = make_state();
    let (status, json) = send(&state, make_post_request("/infer", json!({"text": "   "}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].as_str().unwrap().contains("empty"));

    // Nothing reached the dispatcher.
    let (_, metrics) = send(&state, make_request("/metrics")).await;
    assert_eq!(metrics["total_requests"], 0);
}

#[tokio::test]
async fn test_infer_rejects_oversized_text() {
    let state = make_state();
    let text = "x".repeat(10_001);
    let (status, json) = send(&state, make_post_request("/infer", json!({"text": text}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].as_str().unwrap().contains("too long"));
}

#[tokio::test]
async fn test_infer_unknown_model_is_200_failure() {
    let state = make_state();
    let (status, json) = send(
        &state,
        make_post_request("/infer", json!({"text": "hi", "model": "ghost"})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Model ghost:v1 not available");
}

#[tokio::test]
async fn test_infer_panicking_pipeline_is_200_failure() {
    let state = make_state();
    let (status, json) = send(
        &state,
        make_post_request("/infer", json!({"text": "boom [panic]", "model": "sentiment"})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], false);
    assert_eq!(json["model_used"], "sentiment:v1");

    let (_, metrics) = send(&state, make_request("/metrics")).await;
    assert_eq!(metrics["total_requests"], 1);
    assert_eq!(metrics["failed_requests"], 1);
}

// --- /infer/batch ---

#[tokio::test]
async fn test_batch_preserves_order() {
    let state = make_state();
    let body = json!({"requests": [
        {"text": "I love this", "model": "sentiment"},
        {"text": "First. Second."},
        {"text": "nope", "model": "ghost"},
    ]});
    let (status, json) = send(&state, make_post_request("/infer/batch", body)).await;
    assert_eq!(status, 200);
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["model_used"], "sentiment:v1");
    assert_eq!(items[1]["result"], "First.");
    assert_eq!(items[2]["success"], false);
}

#[tokio::test]
async fn test_batch_size_limits() {
    let state = make_state();
    let (status, _) = send(&state, make_post_request("/infer/batch", json!({"requests": []}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let too_many: Vec<Value> = (0..101).map(|i| json!({"text": format!("t{i}")})).collect();
    let (status, json) = send(
        &state,
        make_post_request("/infer/batch", json!({"requests": too_many})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].as_str().unwrap().contains("101"));
}

#[tokio::test]
async fn test_batch_rejects_invalid_item() {
    let state = make_state();
    let body = json!({"requests": [{"text": "fine"}, {"text": ""}]});
    let (status, json) = send(&state, make_post_request("/infer/batch", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].as_str().unwrap().starts_with("requests[1]"));
}

// --- /models ---

#[tokio::test]
async fn test_models_listing() {
    let state = make_state();
    let (status, json) = send(&state, make_request("/models")).await;
    assert_eq!(status, 200);
    let models = json.as_array().unwrap();
    assert_eq!(models.len(), 3);
    let generator = models.iter().find(|m| m["name"] == "generator").unwrap();
    assert_eq!(generator["type"], "generator");
    assert_eq!(generator["is_loaded"], false);
    assert_eq!(generator["parameters"]["max_length"], 100);
}

#[tokio::test]
async fn test_load_unknown_model_is_404() {
    let state = make_state();
    let (status, json) = send(&state, make_post_request("/models/ghost/load", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["detail"].as_str().unwrap().contains("ghost:v1"));
}

#[tokio::test]
async fn test_load_with_explicit_version() {
    let state = make_state();
    let (status, _) = send(
        &state,
        make_post_request("/models/sentiment/load?version=v2", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unload_model() {
    let state = make_state();
    send(&state, make_post_request("/models/summarizer/load", json!({}))).await;
    let (status, json) = send(&state, make_post_request("/models/summarizer/unload", json!({}))).await;
    assert_eq!(status, 200);
    assert!(json["message"].as_str().unwrap().contains("summarizer:v1"));

    let (_, json) = send(&state, make_request("/models")).await;
    let summarizer = json
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "summarizer")
        .cloned()
        .unwrap();
    assert_eq!(summarizer["is_loaded"], false);
}

// --- /metrics ---

#[tokio::test]
async fn test_metrics_reflect_requests() {
    let state = make_state();
    send(&state, make_post_request("/infer", json!({"text": "I love this", "model": "sentiment"}))).await;
    send(&state, make_post_request("/infer", json!({"text": "hi", "model": "ghost"}))).await;

    let (status, json) = send(&state, make_request("/metrics")).await;
    assert_eq!(status, 200);
    assert_eq!(json["total_requests"], 2);
    assert_eq!(json["successful_requests"], 1);
    assert_eq!(json["failed_requests"], 1);
    assert_eq!(json["requests_per_model"]["ghost:v1"], 1);
    assert!(json.get("timestamp").is_some());
}
