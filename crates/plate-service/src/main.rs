use anyhow::Result;
use plate_service::{
    api, config::ServiceConfig, engine::scripted::ScriptedEngine, engine::InferenceEngine,
    ServiceState,
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = telemetry::init_with_service("plate-service");

    info!("Starting Plate Service...");

    // Load configuration from environment
    let config = ServiceConfig::from_env()?;
    info!(
        "Plate Service configuration: bind={}, node_id={}",
        config.bind_addr, config.node_id
    );

    let mut engine = ScriptedEngine::new(
        config.pipeline.detection.model_input_size,
        config.pipeline.ocr.clone(),
    );
    let script = match &config.engine_script {
        Some(path) => {
            info!("Loading engine script from {}", path.display());
            ScriptedEngine::load_script(path)?
        }
        None => {
            info!("No engine script configured, starting with an empty scene");
            serde_json::Value::Null
        }
    };
    engine.init(script).await?;
    info!("Initialized {} engine", engine.id());

    let state = ServiceState::new(
        config.node_id.clone(),
        config.pipeline.clone(),
        Arc::new(RwLock::new(engine)),
    );

    // Build HTTP router
    let app = api::router(state.clone());

    // Bind and serve
    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Plate Service listening on {}", config.bind_addr);

    // Run with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: ServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    if let Err(e) = state.shutdown().await {
        tracing::error!("Error during shutdown: {}", e);
    }
}
