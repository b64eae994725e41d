//! Extractive question answering served over HTTP.
//!
//! A thin adapter around a local ONNX QA model: `POST /chat` with a
//! question and a context string returns the answer span the model
//! extracts from the context. The model loads best-effort at startup and
//! lazily on first use if startup loading failed.

pub mod engine;
pub mod server;
pub mod shutdown;

pub use engine::{Answer, EngineConfig, EngineError, QaEngine};
pub use server::AppState;
