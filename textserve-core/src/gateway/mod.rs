//! # HTTP Gateway
//!
//! A thin axum adapter over [`InferenceService`]. The service is injected
//! through router state; handlers validate input, delegate, and serialize.

mod server;

pub use server::{router as gateway_router, run as run_gateway};

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServeConfig;
use crate::service::InferenceService;

/// Shared state handed to every handler.
#[derive(Debug)]
pub struct GatewayState {
    service: Arc<InferenceService>,
    started_at: Instant,
    app_name: String,
    app_version: String,
    max_text_length: usize,
}

/// Thread-safe shared gateway reference for axum handlers.
pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(service: Arc<InferenceService>, config: &ServeConfig) -> Self {
        Self {
            service,
            started_at: Instant::now(),
            app_name: config.server.app_name.clone(),
            app_version: config.server.app_version.clone(),
            max_text_length: config.limits.max_text_length,
        }
    }

    pub fn service(&self) -> &Arc<InferenceService> {
        &self.service
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
