//! spanserve - Main Entry Point
//!
//! An HTTP server answering questions from supplied context using a
//! local extractive QA ONNX model.
//!
//! Usage:
//!     spanserve --port 8000
//!     spanserve --model-path models/model.onnx --tokenizer-path models/tokenizer.json

use clap::Parser;
use spanserve::engine::{EngineConfig, QaEngine};
use spanserve::server::{self, AppState};
use spanserve::shutdown::shutdown_signal;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "spanserve")]
#[command(about = "Extractive question answering over HTTP")]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Path to the ONNX model file
    #[arg(long, default_value = "models/model.onnx")]
    model_path: String,

    /// Path to the tokenizer.json file
    #[arg(long, default_value = "models/tokenizer.json")]
    tokenizer_path: String,

    /// Maximum sequence length for the encoded question/context pair
    #[arg(long, default_value_t = 384)]
    max_length: usize,

    /// Maximum answer span length in tokens
    #[arg(long, default_value_t = 30)]
    max_answer_len: usize,

    /// Maximum inferences running concurrently on the blocking pool
    #[arg(long, default_value_t = 4)]
    max_concurrency: usize,

    /// Number of threads for inference (0 = auto)
    #[arg(long, default_value_t = 0)]
    num_threads: usize,

    /// Default log filter when RUST_LOG is unset (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Build the log filter: RUST_LOG wins, the CLI default otherwise.
fn log_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up logging
    tracing_subscriber::registry()
        .with(log_filter(&args.log_level))
        .with(fmt::layer().compact().with_target(false))
        .init();

    info!("Starting spanserve v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig {
        model_path: args.model_path,
        tokenizer_path: args.tokenizer_path,
        max_length: args.max_length,
        max_answer_len: args.max_answer_len,
        num_threads: args.num_threads,
    };
    let engine = Arc::new(QaEngine::new(config));

    // Best-effort startup load. A failure must not keep the listener
    // from coming up; the first request retries the load.
    if let Err(e) = engine.ensure_loaded() {
        warn!("model load failed at startup: {}", e);
    }

    let state = AppState::new(engine, args.max_concurrency);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    info!("  Address: {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("spanserve shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_falls_back_to_cli_default() {
        std::env::remove_var("RUST_LOG");
        for directive in ["debug", "info", "warn", "error"] {
            let filter = log_filter(directive);
            assert_eq!(filter.to_string(), directive);
        }
    }
}
