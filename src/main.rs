use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crop_health_engine::config::Config;
use crop_health_engine::metrics;
use crop_health_engine::model_store;
use crop_health_engine::registry::{ModelRegistry, ModelStatus};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Health check endpoint
async fn health_handler(State(registry): State<ModelRegistry>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "ensemble_ready": registry.is_ensemble_ready(),
        "analysis_failure_rate": metrics::analysis_failure_rate(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_handler() -> String {
    metrics::export_metrics()
}

/// Lifecycle state of every classifier
async fn models_handler(State(registry): State<ModelRegistry>) -> Json<Vec<ModelStatus>> {
    Json(registry.status())
}

fn ops_router(registry: ModelRegistry) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/models", get(models_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // ONNX Runtime logs every graph optimization pass at info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info")
                    .add_directive("ort=warn".parse().unwrap())
            }),
        )
        .init();

    tracing::info!("Starting crop health inference engine...");

    metrics::init_metrics();

    let config = Config::load()?;
    let model_config = &config.model_config;
    tracing::info!(
        model_dir = ?model_config.model_dir,
        preload = model_config.preload,
        auto_download = model_config.auto_download,
        "Configuration loaded"
    );

    if model_config.auto_download {
        let results = model_store::ensure_models_downloaded(model_config).await;
        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            checked = results.len(),
            failed,
            "Model download pass complete"
        );
    }

    let registry = ModelRegistry::with_onnx(model_config);

    if model_config.preload {
        for (model, result) in registry.preload_ensemble().await {
            if let Err(e) = result {
                tracing::warn!(model = %model, error = %e, "Preload failed, will retry on first request");
            }
        }
    } else {
        tracing::info!("Models will load on first use");
    }

    let addr = format!("{}:{}", config.api_host, config.api_port);
    tracing::info!("Ops endpoints listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, ops_router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
