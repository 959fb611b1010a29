//! REST API for the market intelligence desk
//!
//! The presentation boundary: the UI only ever sees `AssistantAnswer`
//! payloads inside the standard response envelope. Session history, tool
//! plumbing and ledger internals never cross this layer.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{GenerationConfig, RespondLanguage, Verbosity};
use crate::orchestrator::Orchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Omit to start a new session
    pub session_id: Option<Uuid>,
    pub text: String,
    pub language: Option<RespondLanguage>,
    pub verbosity: Option<Verbosity>,
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
    pub orchestrator: Arc<Orchestrator>,
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::InvalidInput(_)
        | CoreError::InjectionDetected(_)
        | CoreError::ModerationViolation(_) => StatusCode::BAD_REQUEST,
        CoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::SessionBusy => StatusCode::CONFLICT,
        CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::ModelUnavailable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = match req.session_id {
        Some(id) => id,
        None => {
            let config = GenerationConfig {
                language: req.language.unwrap_or_default(),
                verbosity: req.verbosity.unwrap_or_default(),
                ..Default::default()
            };
            state.orchestrator.sessions().create(config).await
        }
    };

    match state.orchestrator.run_turn(session_id, &req.text).await {
        Ok(answer) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "answer": answer.text,
                "citations": answer.citations,
                "cost_delta": answer.cost_delta,
                "language": answer.language,
            }))),
        ),
        Err(e) => {
            let status = status_for(&e);
            let mut response = ApiResponse::error(e.user_message());
            // Machine-readable kind travels in the data slot so clients
            // can branch without parsing the message.
            response.data = Some(serde_json::json!({
                "session_id": session_id,
                "kind": e.kind(),
            }));
            (status, Json(response))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/chat", post(chat_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(orchestrator: Arc<Orchestrator>, port: u16) -> crate::Result<()> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("API server listening on port {}", port);

    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&CoreError::InvalidInput("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoreError::RateLimited { retry_after_secs: 5 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(&CoreError::SessionBusy), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&CoreError::ModelUnavailable("down".to_string())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_envelope_shapes() {
        let ok = ApiResponse::success(serde_json::json!({ "answer": "hi" }));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ApiResponse::error("nope".to_string());
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("nope"));
    }
}
