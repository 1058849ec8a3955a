//! REST API Server for the Financial Analyst Agent
//!
//! Exposes the agent loop via HTTP endpoints
//! Integrates with frontend UI

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::AgentError;
use crate::models::AgentState;

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Request Parsing
/// =============================

/// Unwrap the frontend envelope and build the initial state.
///
/// The frontend sends `{"input": {...}}`; a bare state object is accepted
/// too. All state fields may be null or missing; the only fatal condition
/// is a body that doesn't describe a conversation with at least one user
/// turn.
fn parse_invoke_body(body: Value) -> crate::Result<AgentState> {
    let input = match body.get("input") {
        Some(input) => input.clone(),
        None => body,
    };

    let state: AgentState = serde_json::from_value(input).map_err(|e| {
        AgentError::InvalidRequest(format!("invalid agent state payload: {}", e))
    })?;

    if state.last_user_message().is_none() {
        return Err(AgentError::InvalidRequest(
            "conversation must contain at least one user message".to_string(),
        ));
    }

    Ok(state)
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Main Invoke Endpoint
/// =============================

async fn invoke_agent(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let initial = match parse_invoke_body(body) {
        Ok(initial) => initial,
        Err(e) => {
            warn!(error = %e, "Rejected invoke request");
            let response = serde_json::to_value(ApiResponse::error(e.to_string()))
                .unwrap_or_else(|_| json!({"success": false}));
            return (StatusCode::BAD_REQUEST, Json(response));
        }
    };

    let invocation_id = Uuid::new_v4();
    info!(
        %invocation_id,
        messages = initial.messages.len(),
        "Received invoke request"
    );

    // One fresh state per request; the orchestrator and its tools are
    // shared read-only.
    let final_state = state.orchestrator.run(initial).await;

    let iterations = final_state.iteration_count;
    let images = final_state.collected_artifacts.clone();
    let mut response = json!({ "output": final_state });
    if !images.is_empty() {
        response["images"] = json!(images);
    }

    info!(
        %invocation_id,
        iterations,
        images = images.len(),
        "Invoke request complete"
    );

    (StatusCode::OK, Json(response))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/agent/invoke", post(invoke_agent))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_and_bare_bodies_both_parse() {
        let enveloped = json!({
            "input": {
                "messages": [{"type": "human", "content": "What is 2+2?"}],
                "data_context": null,
                "code": null,
                "code_output": null,
                "iterations": 0
            }
        });
        let state = parse_invoke_body(enveloped).unwrap();
        assert_eq!(state.messages.len(), 1);

        let bare = json!({
            "messages": [{"type": "human", "content": "What is 2+2?"}]
        });
        let state = parse_invoke_body(bare).unwrap();
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_rejects_body_without_user_message() {
        let body = json!({"input": {"messages": []}});
        assert!(parse_invoke_body(body).is_err());
    }
}
