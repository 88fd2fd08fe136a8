//! Health advisor HTTP server
//!
//! Axum-based server the sidebar shell talks to. The model and the tool
//! server start in the background; `/health` reports when queries can be
//! served.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use advisor_core::{AdvisorBuilder, CancellationToken};
use advisor_runtime::{McpToolClient, OllamaProvider, RuntimeConfig};

use crate::handlers::{ask_handler, health_check, list_tools};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RuntimeConfig::from_env()?;
    tracing::info!(
        model = %config.llm.model,
        backend = ?config.llm.backend,
        tool_server = %config.tool_server.command,
        "Configuration loaded"
    );

    let completions = Arc::new(OllamaProvider::from_config(config.llm));
    let tool_client = Arc::new(McpToolClient::new(config.tool_server));

    let advisor = AdvisorBuilder::new()
        .completions(completions)
        .catalog(tool_client.clone())
        .build()?;

    let state = AppState::new(Arc::new(advisor));

    // Model loading is slow; serve /health meanwhile
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let state = state.clone();
        let cancel = shutdown.child_token();
        async move { state.initialize(&cancel).await }
    });

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        .route("/api/ask", post(ask_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Health advisor listening on http://{}", addr);
    tracing::info!("  GET  /health     - Readiness");
    tracing::info!("  GET  /api/tools  - Tool catalog");
    tracing::info!("  POST /api/ask    - Ask a question");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                }
                shutdown.cancel();
            }
        })
        .await?;

    tool_client.shutdown().await;
    tracing::info!("Shut down");
    Ok(())
}
