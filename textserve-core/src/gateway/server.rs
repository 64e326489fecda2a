//! REST endpoints built on axum.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::SharedState;
use crate::error::BatchError;
use crate::types::{BatchInferenceRequest, InferenceRequest, InferenceResponse, ModelKey};

/// Error body shape shared by every non-2xx response: `{"detail": ...}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn unprocessable(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.into(),
        }
    }

    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        Self::unprocessable(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct VersionQuery {
    version: Option<String>,
}

/// Build the router over a shared gateway state.
pub fn router(shared: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(live_handler))
        .route("/health/ready", get(ready_handler))
        .route("/infer", post(infer_handler))
        .route("/infer/batch", post(batch_handler))
        .route("/models", get(models_handler))
        .route("/models/{name}/load", post(load_handler))
        .route("/models/{name}/unload", post(unload_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "app_name": state.app_name, "version": state.app_version }))
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.app_version,
        "timestamp": Utc::now(),
        "models_loaded": state.service.get_loaded_models(),
        "uptime_seconds": state.uptime_secs(),
    }))
}

async fn live_handler() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// Ready once at least one model is loaded.
async fn ready_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let loaded = state.service.get_loaded_models().len();
    let status = if loaded > 0 { "ready" } else { "not_ready" };
    Json(json!({ "status": status, "models_loaded": loaded }))
}

async fn infer_handler(
    State(state): State<SharedState>,
    Json(mut request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ApiError> {
    request
        .validate(state.max_text_length)
        .map_err(ApiError::unprocessable)?;
    Ok(Json(state.service.process_inference(request).await))
}

async fn batch_handler(
    State(state): State<SharedState>,
    Json(batch): Json<BatchInferenceRequest>,
) -> Result<Json<Vec<InferenceResponse>>, ApiError> {
    let mut requests = batch.requests;
    if requests.is_empty() {
        return Err(BatchError::Empty.into());
    }
    let max = state.service.max_batch_size();
    if requests.len() > max {
        return Err(BatchError::TooLarge {
            size: requests.len(),
            max,
        }
        .into());
    }
    for (index, request) in requests.iter_mut().enumerate() {
        request
            .validate(state.max_text_length)
            .map_err(|e| ApiError::unprocessable(format!("requests[{index}]: {e}")))?;
    }
    let responses = state.service.process_batch_inference(requests).await?;
    Ok(Json(responses))
}

async fn models_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let models: Vec<Value> = state
        .service
        .model_registry()
        .list_models()
        .into_iter()
        .map(|m| {
            json!({
                "name": m.name,
                "version": m.version,
                "type": m.kind,
                "description": m.description,
                "is_loaded": m.loaded,
                "parameters": m.default_parameters,
            })
        })
        .collect();
    Json(models)
}

async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let mut body = json!(state.service.get_metrics());
    body["timestamp"] = json!(Utc::now());
    Json(body)
}

fn query_key(state: &SharedState, name: String, query: VersionQuery) -> ModelKey {
    let version = query
        .version
        .unwrap_or_else(|| state.service.default_version().to_string());
    ModelKey::new(name, version)
}

async fn load_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Value>, ApiError> {
    let key = query_key(&state, name, query);
    state
        .service
        .model_loader()
        .try_load(&key)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(json!({ "message": format!("Model {key} loaded successfully") })))
}

async fn unload_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<VersionQuery>,
) -> impl IntoResponse {
    let key = query_key(&state, name, query);
    state.service.model_loader().unload(&key).await;
    Json(json!({ "message": format!("Model {key} unloaded successfully") }))
}

/// Serve the gateway on `host:port` until `shutdown` resolves.
pub async fn run(
    shared: SharedState,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = router(shared);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
