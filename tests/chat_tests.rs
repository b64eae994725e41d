//! Handler-level tests for the /chat and /health routes.
//!
//! None of these need model weights: they exercise the degraded path
//! where the configured model files do not exist, which is exactly the
//! behavior the service must keep stable.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use spanserve::engine::{EngineConfig, QaEngine};
use spanserve::server::{chat, health, ChatRequest};
use spanserve::AppState;
use std::sync::Arc;

/// Helper to build state around an engine whose model files are absent,
/// so every load attempt fails.
fn unloadable_state() -> AppState {
    let config = EngineConfig {
        model_path: "does/not/exist.onnx".to_string(),
        tokenizer_path: "does/not/exist.json".to_string(),
        ..Default::default()
    };
    AppState::new(Arc::new(QaEngine::new(config)), 4)
}

fn chat_request(question: &str, context: &str) -> Json<ChatRequest> {
    Json(ChatRequest {
        question: question.to_string(),
        context: context.to_string(),
    })
}

#[tokio::test]
async fn chat_returns_500_with_detail_when_model_cannot_load() {
    let state = unloadable_state();

    let err = chat(
        State(state),
        chat_request(
            "What is the capital of France?",
            "France is a country in Europe. Its capital is Paris.",
        ),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(err.detail.contains("model file not found"));
}

#[tokio::test]
async fn failed_lazy_load_leaves_engine_retryable() {
    let state = unloadable_state();

    // Two requests in a row both hit the lazy-load path and both fail;
    // the engine never transitions to loaded.
    for _ in 0..2 {
        let err = chat(State(state.clone()), chat_request("q", "c"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert!(!state.engine.is_loaded());
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_response() {
    let state = unloadable_state();

    let mut handles = Vec::new();
    for i in 0..10 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let result = chat(
                State(state),
                chat_request(&format!("question {}", i), "some context"),
            )
            .await;
            (i, result)
        }));
    }

    for handle in handles {
        let (_, result) = handle.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.detail.contains("model file not found"));
    }
}

#[tokio::test]
async fn empty_fields_are_accepted_but_still_fail_without_model() {
    let state = unloadable_state();

    // Empty strings pass schema validation; the failure comes from the
    // engine, not the request shape.
    let err = chat(State(state), chat_request("", ""))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn health_reports_unloaded_model() {
    let state = unloadable_state();

    let Json(report) = health(State(state)).await;
    assert!(!report.healthy);
    assert!(!report.model_loaded);
    assert_eq!(report.message, "no model loaded");
}
