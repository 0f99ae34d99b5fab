//! REST API server
//!
//! Exposes session management and chat over HTTP with JSON in/out.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::ChatAgent;
use crate::error::ChatError;
use crate::memory::SessionStore;
use crate::models::UserPreferences;

/// Maximum accepted chat message length, in characters
const MAX_MESSAGE_LEN: usize = 5000;

/// Shown to users when the upstream LLM stays unavailable after retries
const UPSTREAM_APOLOGY: &str =
    "I'm sorry, I'm currently unable to respond. Please try again in a few moments.";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

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
    pub agent: Arc<ChatAgent>,
    pub store: Arc<SessionStore>,
}

/// =============================
/// Helpers — Opaque Tokens & Errors
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

/// Map an opaque session token to a UUID. Tokens that already are UUIDs
/// pass through; anything else maps deterministically via SHA-256, so a
/// made-up token resolves to a stable (and unknown) session id.
fn session_uuid_from_token(token: &str) -> uuid::Uuid {
    uuid::Uuid::parse_str(token).unwrap_or_else(|_| stable_uuid_from_string(token))
}

/// Validate a chat message body, returning the trimmed text.
/// The length bound counts characters, not bytes, so multibyte
/// messages are measured the same way users see them.
fn validate_message(message: &str) -> crate::Result<&str> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ChatError::InvalidRequest(
            "Message cannot be empty".to_string(),
        ));
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ChatError::InvalidRequest(format!(
            "Message exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(message)
}

fn error_to_response(error: ChatError) -> (StatusCode, Json<ApiResponse>) {
    let (status, message) = match &error {
        ChatError::SessionNotFound(_) => (StatusCode::NOT_FOUND, error.to_string()),
        ChatError::Upstream { .. } => (StatusCode::BAD_GATEWAY, UPSTREAM_APOLOGY.to_string()),
        ChatError::InvalidRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    (status, Json(ApiResponse::error(message)))
}

/// =============================
/// Handlers
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "storage": state.store.backend_label(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn create_session(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.store.create().await {
        Ok(session) => {
            info!("Created session {}", session.session_id);
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "session_id": session.session_id,
                    "created_at": session.created_at.to_rfc3339(),
                    "storage": state.store.backend_label(),
                }))),
            )
        }
        Err(e) => error_to_response(e),
    }
}

async fn chat(
    State(state): State<ApiState>,
    Path(session_token): Path<String>,
    Json(req): Json<ChatMessageRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let message = match validate_message(&req.message) {
        Ok(message) => message,
        Err(e) => return error_to_response(e),
    };

    let session_id = session_uuid_from_token(&session_token);

    match state.agent.respond(session_id, message).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "answer": reply.answer,
                "source": reply.source,
                "confidence": reply.confidence,
                "context_used": reply.context_used,
            }))),
        ),
        Err(e) => error_to_response(e),
    }
}

async fn get_history(
    State(state): State<ApiState>,
    Path(session_token): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid_from_token(&session_token);

    match state.store.get(session_id).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "turns": session.turns,
            }))),
        ),
        Err(e) => error_to_response(e),
    }
}

async fn delete_session(
    State(state): State<ApiState>,
    Path(session_token): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid_from_token(&session_token);

    match state.store.delete(session_id).await {
        Ok(()) => {
            info!("Deleted session {}", session_id);
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "session_id": session_id,
                    "message": "Session deleted successfully",
                }))),
            )
        }
        Err(e) => error_to_response(e),
    }
}

async fn clear_session(
    State(state): State<ApiState>,
    Path(session_token): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid_from_token(&session_token);

    match state.store.clear_turns(session_id).await {
        Ok(()) => {
            info!("Cleared history for session {}", session_id);
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "session_id": session_id,
                    "message": "Session history cleared",
                }))),
            )
        }
        Err(e) => error_to_response(e),
    }
}

async fn update_preferences(
    State(state): State<ApiState>,
    Path(session_token): Path<String>,
    Json(preferences): Json<UserPreferences>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid_from_token(&session_token);

    match state.store.set_preferences(session_id, &preferences).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "preferences": preferences,
            }))),
        ),
        Err(e) => error_to_response(e),
    }
}

async fn list_sessions(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.store.list().await {
        Ok(ids) => {
            let count = ids.len();
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "sessions": ids,
                    "count": count,
                }))),
            )
        }
        Err(e) => error_to_response(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(agent: Arc<ChatAgent>, store: Arc<SessionStore>) -> Router {
    let state = ApiState { agent, store };

    Router::new()
        .route("/health", get(health))
        .route("/session/create", post(create_session))
        .route("/chat/:session_id", post(chat))
        .route("/history/:session_id", get(get_history))
        .route("/session/:session_id", delete(delete_session))
        .route("/session/:session_id/clear", post(clear_session))
        .route("/session/:session_id/preferences", put(update_preferences))
        .route("/sessions", get(list_sessions))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<ChatAgent>,
    store: Arc<SessionStore>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent, store);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
