//! HTTP surface for the QA engine.
//!
//! One inference route, `POST /chat`, plus a `GET /health` report of the
//! model load state.

use crate::engine::{EngineError, QaEngine};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task;
use tracing::warn;

/// Request body for the /chat endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub context: String,
}

/// Response body for the /chat endpoint.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub model_loaded: bool,
    pub message: String,
}

/// Shared state behind the routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QaEngine>,
    /// Caps how many inferences occupy the blocking pool at once
    pub inference_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(engine: Arc<QaEngine>, max_concurrency: usize) -> Self {
        Self {
            engine,
            inference_permits: Arc::new(Semaphore::new(max_concurrency)),
        }
    }
}

/// Error surfaced to HTTP callers as `{"detail": ...}`.
///
/// Every engine failure maps to 500 today; the engine keeps the failure
/// kinds separate so the mapping can differentiate later.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

/// Build the router with all routes attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

/// `POST /chat` — answer a question from the supplied context.
///
/// If the model never loaded (startup failure), the first request pays
/// the load inline before running inference. Both the load and the
/// inference are blocking and run off the event loop.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if !state.engine.is_loaded() {
        let engine = state.engine.clone();
        task::spawn_blocking(move || engine.ensure_loaded())
            .await
            .map_err(|e| ApiError::internal(format!("model load task failed: {}", e)))?
            .inspect_err(|e| warn!("lazy model load failed: {}", e))?;
    }

    let _permit = state
        .inference_permits
        .acquire()
        .await
        .map_err(|e| ApiError::internal(format!("inference slot unavailable: {}", e)))?;

    let engine = state.engine.clone();
    let answer = task::spawn_blocking(move || engine.answer(&request.question, &request.context))
        .await
        .map_err(|e| ApiError::internal(format!("inference task failed: {}", e)))??;

    Ok(Json(ChatResponse {
        answer: answer.text,
    }))
}

/// `GET /health` — report whether the model is loaded.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = state.engine.is_loaded();
    Json(HealthResponse {
        healthy: model_loaded,
        model_loaded,
        message: if model_loaded {
            "model loaded and ready".to_string()
        } else {
            "no model loaded".to_string()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_requires_both_fields() {
        let err = serde_json::from_str::<ChatRequest>(r#"{"question": "q"}"#).unwrap_err();
        assert!(err.to_string().contains("context"));

        let err = serde_json::from_str::<ChatRequest>(r#"{"context": "c"}"#).unwrap_err();
        assert!(err.to_string().contains("question"));
    }

    #[test]
    fn chat_request_accepts_empty_strings() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"question": "", "context": ""}"#).unwrap();
        assert!(req.question.is_empty());
        assert!(req.context.is_empty());
    }

    #[test]
    fn error_body_serializes_as_detail() {
        let body = serde_json::to_value(ErrorResponse {
            detail: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"detail": "boom"}));
    }

    #[test]
    fn engine_errors_map_to_500() {
        let err: ApiError = EngineError::ModelNotLoaded.into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.detail, "model not loaded");
    }
}
