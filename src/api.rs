//! REST API for the coach orchestrator
//!
//! A thin boundary: one chat turn per request, user identity taken from the
//! body or the `user_id` query parameter.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::{HistoryMessage, TurnRequest};

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub persist_memories: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
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
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Accept a UUID as-is; map any other non-empty identifier to a stable UUID.
pub fn parse_or_stable_uuid(value: Option<&str>) -> Option<uuid::Uuid> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => {
            Some(uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v)))
        }
        _ => None,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse::error(message))).into_response()
}

fn status_for(err: &OrchestrationError) -> StatusCode {
    match err {
        OrchestrationError::InvalidArgument(_) | OrchestrationError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        OrchestrationError::ContextUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Handlers
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "model": state.orchestrator.model_name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_message(
    State(state): State<ApiState>,
    Query(query): Query<ChatQuery>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let raw_user = req.user_id.as_deref().or(query.user_id.as_deref());
    let Some(user_id) = parse_or_stable_uuid(raw_user) else {
        return error_response(StatusCode::BAD_REQUEST, "user_id is required".to_string());
    };

    info!(user_id = %user_id, history = req.history.len(), "Received chat message");

    let turn = TurnRequest {
        message: req.message,
        history: req.history,
        user_id: Some(user_id.to_string()),
        persist_memories: req.persist_memories.unwrap_or(true),
    };

    match state.orchestrator.run_turn(turn).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ChatResponse {
                response: outcome.response,
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Chat turn failed");
            error_response(status_for(&e), format!("Chat turn failed: {}", e))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat/message", post(chat_message))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
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

    axum::serve(listener, router).await?;

    Ok(())
}
