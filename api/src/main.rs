use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use toolbridge_core::error::BridgeError;
use toolbridge_mcp_runtime::{BridgeConfig, ToolBridge};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod auth;
mod error;
mod middleware;
mod routes;
mod state;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "toolbridge_api=debug,toolbridge_mcp_runtime=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(event = "startup_failed", error = %err, "toolbridge API failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BridgeError> {
    let config = BridgeConfig::from_env(None)?;
    tracing::info!(
        event = "bridge_configured",
        backend = %config.backend_url,
        api_prefix = %config.api_prefix,
        poll_interval_secs = config.poll_interval.as_secs(),
        "bridge configured"
    );

    let bridge = Arc::new(ToolBridge::new(config)?);
    let app_state = state::AppState::from_env(Arc::clone(&bridge))?;

    // Degrades to the version tool only; the watcher keeps trying.
    if let Ok(summary) = bridge.initial_load_with_retry().await {
        tracing::info!(
            event = "initial_catalog_loaded",
            tools = summary.tool_count,
            dropped = summary.dropped.len(),
            "initial catalog loaded"
        );
    }
    bridge.start_watcher().await;

    let app = app::build_router(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("toolbridge API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::Configuration(format!("cannot bind {addr}: {e}")))?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    bridge.shutdown();
    served.map_err(|e| BridgeError::Configuration(format!("server error: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(event = "signal_handler_failed", error = %err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(event = "signal_handler_failed", error = %err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(event = "shutdown_requested", "shutting down");
}
