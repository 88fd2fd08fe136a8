//! HTTP Handlers

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use advisor_core::{AdvisorError, CancellationToken, ToolDescriptor};

use crate::state::{AppState, Readiness};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub readiness: Readiness,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        readiness: state.readiness(),
    })
}

/// Cached tool catalog
pub async fn list_tools(State(state): State<AppState>) -> Result<Json<ToolsResponse>, ApiError> {
    state
        .advisor
        .tools()
        .map(|tools| Json(ToolsResponse { tools: tools.to_vec() }))
        .ok_or_else(|| {
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_READY",
                "The advisor is still starting up.",
            )
        })
}

/// Answer a question
///
/// Dropping the request (client disconnect) cancels the running query.
pub async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "EMPTY_QUERY", "Query cannot be empty."));
    }

    if state.readiness() == Readiness::Initializing {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "NOT_READY",
            "The advisor is still loading the model. Please try again shortly.",
        ));
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let result = state.advisor.process_query(query, &cancel).await;
    match result {
        Ok(answer) => {
            state.sync_ready();
            Ok(Json(AskResponse { answer }))
        }
        Err(e) => {
            tracing::error!("Advisor error: {}", e);
            if let AdvisorError::Initialization(_) = &e {
                state.publish(Readiness::Failed { error: e.to_string() });
            }
            let status = match e {
                AdvisorError::Initialization(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(api_error(status, "ADVISOR_ERROR", e.user_message()))
        }
    }
}
