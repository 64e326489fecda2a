//! Subcommand handlers.

use anyhow::Context;
use serde_json::Value;
use std::sync::Arc;
use textserve_core::{GatewayState, InferenceRequest, InferenceService, ServeConfig, run_gateway};
use tracing::{info, warn};

/// Parse `key=value`, reading the value as JSON and falling back to a string.
pub fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in `{s}`"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Run the HTTP server until Ctrl-C, then unload every model.
pub async fn serve(
    mut config: ServeConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let service = Arc::new(InferenceService::from_config(&config)?);
    info!(
        app = %config.server.app_name,
        version = %config.server.app_version,
        backend = ?config.backend.kind,
        "Starting textserve"
    );
    service.initialize().await;

    let state = Arc::new(GatewayState::new(Arc::clone(&service), &config));
    run_gateway(
        state,
        &config.server.host,
        config.server.port,
        shutdown_signal(),
    )
    .await
    .with_context(|| {
        format!(
            "Failed to serve on {}:{}",
            config.server.host, config.server.port
        )
    })?;

    info!("Shutting down, unloading models");
    service.model_loader().unload_all_models().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
}

/// Print the configured catalog as a table.
pub fn list_models(config: &ServeConfig) -> anyhow::Result<()> {
    let specs = &config.models.catalog;
    if specs.is_empty() {
        println!("No models configured.");
        return Ok(());
    }
    println!(
        "{:<16} {:<8} {:<12} {:<52} DEFAULT",
        "NAME", "VERSION", "TYPE", "BACKEND"
    );
    for spec in specs {
        let is_default = spec.name == config.models.default_model
            && spec.version == config.models.default_version;
        println!(
            "{:<16} {:<8} {:<12} {:<52} {}",
            spec.name,
            spec.version,
            spec.kind.as_str(),
            spec.backend_reference,
            if is_default { "*" } else { "" }
        );
    }
    Ok(())
}

/// Run one request in-process and print the response as JSON.
pub async fn infer(
    config: ServeConfig,
    text: String,
    model: Option<String>,
    version: Option<String>,
    params: Vec<(String, Value)>,
) -> anyhow::Result<()> {
    let mut request = InferenceRequest::new(text);
    request.model = model;
    request.version = version;
    for (key, value) in params {
        request = request.with_parameter(key, value);
    }
    request
        .validate(config.limits.max_text_length)
        .map_err(|e| anyhow::anyhow!("Invalid request: {}", e))?;

    let service = InferenceService::from_config(&config)?;
    let response = service.process_inference(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    service.model_loader().unload_all_models().await;

    if !response.success {
        anyhow::bail!(
            "Inference failed: {}",
            response.error.unwrap_or_default()
        );
    }
    Ok(())
}
