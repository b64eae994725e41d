//! Extractive question-answering engine.
//!
//! Runs ONNX models of the BERT QA family (start/end span prediction),
//! e.g. an exported distilbert-base-uncased-distilled-squad.

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::RwLock;
use std::path::Path;
use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to load tokenizer: {0}")]
    TokenizerLoad(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Configuration for the QA engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the ONNX model file
    pub model_path: String,
    /// Path to the tokenizer.json file
    pub tokenizer_path: String,
    /// Maximum sequence length for the encoded question/context pair
    pub max_length: usize,
    /// Maximum answer span length in tokens
    pub max_answer_len: usize,
    /// Number of threads for inference (0 = auto)
    pub num_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: "models/model.onnx".to_string(),
            tokenizer_path: "models/tokenizer.json".to_string(),
            max_length: 384,
            max_answer_len: 30,
            num_threads: 0,
        }
    }
}

/// An answer span extracted from the context.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// softmax(start) * softmax(end) over the chosen span
    pub score: f32,
}

/// Loaded model state.
struct LoadedModel {
    session: Session,
    tokenizer: Tokenizer,
}

/// Guarded lazily-initialized slot.
///
/// Set at most once: a failed initialization leaves the slot empty and
/// eligible for another attempt, a success is immutable afterwards.
/// Initialization can take seconds, so the set-check never waits on the
/// lock; only initializers and readers of the value itself do.
struct LazySlot<T> {
    inner: RwLock<Option<T>>,
}

impl<T> LazySlot<T> {
    fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Non-blocking set-check. A contended lock means an initialization
    /// is in flight, which reads as "not set yet".
    fn is_set(&self) -> bool {
        self.inner.try_read().map_or(false, |slot| slot.is_some())
    }

    fn read(&self) -> parking_lot::RwLockReadGuard<'_, Option<T>> {
        self.inner.read()
    }

    /// Initialize the slot if it is still empty.
    ///
    /// `init` runs under the write lock with a double-check, so
    /// concurrent callers wait for a single initialization attempt
    /// instead of running redundant ones. Callers are expected to be on
    /// a blocking-capable thread.
    fn ensure<E>(&self, init: impl FnOnce() -> std::result::Result<T, E>) -> std::result::Result<(), E> {
        if self.inner.read().is_some() {
            return Ok(());
        }

        let mut slot = self.inner.write();
        if slot.is_some() {
            // another caller finished the initialization while we waited
            return Ok(());
        }

        *slot = Some(init()?);
        Ok(())
    }
}

/// Extractive QA engine.
pub struct QaEngine {
    config: EngineConfig,
    model: LazySlot<LoadedModel>,
}

impl QaEngine {
    /// Create a new engine (model not loaded).
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            model: LazySlot::new(),
        }
    }

    /// Check if the model is loaded.
    ///
    /// Never blocks: while a load is in flight the answer is `false`,
    /// so callers on the async runtime are not parked behind the
    /// construction write lock.
    pub fn is_loaded(&self) -> bool {
        self.model.is_set()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the model if it is not loaded yet.
    ///
    /// Blocks for the full construction while holding the write lock;
    /// run it on the blocking pool.
    pub fn ensure_loaded(&self) -> Result<()> {
        self.model.ensure(|| Self::construct(&self.config))
    }

    fn construct(config: &EngineConfig) -> Result<LoadedModel> {
        info!(
            "Loading model from {} with tokenizer {}",
            config.model_path, config.tokenizer_path
        );

        // Validate paths exist
        if !Path::new(&config.model_path).exists() {
            return Err(EngineError::ModelLoad(format!(
                "model file not found: {}",
                config.model_path
            )));
        }
        if !Path::new(&config.tokenizer_path).exists() {
            return Err(EngineError::TokenizerLoad(format!(
                "tokenizer file not found: {}",
                config.tokenizer_path
            )));
        }

        // Load tokenizer
        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| EngineError::TokenizerLoad(e.to_string()))?;

        // Load ONNX model
        let mut session_builder = Session::builder()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        if config.num_threads > 0 {
            session_builder = session_builder
                .with_intra_threads(config.num_threads)
                .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        }

        let session = session_builder
            .commit_from_file(&config.model_path)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        info!("Model loaded successfully");

        Ok(LoadedModel { session, tokenizer })
    }

    /// Extract the best answer span for a question from a context.
    pub fn answer(&self, question: &str, context: &str) -> Result<Answer> {
        let model = self.model.read();
        let model = model.as_ref().ok_or(EngineError::ModelNotLoaded)?;

        debug!(
            "Answering question ({} chars) over context ({} chars)",
            question.len(),
            context.len()
        );

        // Encode the pair as [CLS] question [SEP] context [SEP]
        let encoding = model
            .tokenizer
            .encode((question, context), true)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        let seq_len = encoding.get_ids().len().min(self.config.max_length);
        if seq_len == 0 {
            return Err(EngineError::Tokenization("empty encoding".to_string()));
        }

        let input_ids: Vec<i64> = encoding.get_ids()[..seq_len]
            .iter()
            .map(|&id| id as i64)
            .collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask()[..seq_len]
            .iter()
            .map(|&m| m as i64)
            .collect();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids).map_err(|e| {
            EngineError::Inference(format!("failed to create input_ids tensor: {}", e))
        })?;
        let attention_mask = Array2::from_shape_vec((1, seq_len), attention_mask)
            .map_err(|e| {
                EngineError::Inference(format!("failed to create attention_mask tensor: {}", e))
            })?;

        // Run inference
        let outputs = model
            .session
            .run(
                ort::inputs! {
                    "input_ids" => input_ids,
                    "attention_mask" => attention_mask,
                }
                .map_err(|e| EngineError::Inference(e.to_string()))?,
            )
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        let start_logits = outputs
            .get("start_logits")
            .ok_or_else(|| EngineError::Inference("no start_logits output found".to_string()))?;
        let start_logits: ndarray::ArrayViewD<f32> = start_logits
            .try_extract_tensor()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let start_logits: Vec<f32> = start_logits.iter().copied().collect();

        let end_logits = outputs
            .get("end_logits")
            .ok_or_else(|| EngineError::Inference("no end_logits output found".to_string()))?;
        let end_logits: ndarray::ArrayViewD<f32> = end_logits
            .try_extract_tensor()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let end_logits: Vec<f32> = end_logits.iter().copied().collect();

        if start_logits.len() != seq_len || end_logits.len() != seq_len {
            return Err(EngineError::Inference(format!(
                "unexpected logits shape: {} start / {} end values for sequence of {}",
                start_logits.len(),
                end_logits.len(),
                seq_len
            )));
        }

        // Candidate positions are context tokens only (pair sequence 1),
        // excluding special tokens (empty offsets).
        let offsets = encoding.get_offsets();
        let sequence_ids = encoding.get_sequence_ids();
        let context_mask: Vec<bool> = (0..seq_len)
            .map(|i| sequence_ids[i] == Some(1) && offsets[i].1 > offsets[i].0)
            .collect();

        let (span_start, span_end, score) = best_span(
            &start_logits,
            &end_logits,
            &context_mask,
            self.config.max_answer_len,
        )
        .ok_or_else(|| EngineError::Inference("no answer span found in context".to_string()))?;

        let text = span_text(context, offsets[span_start].0, offsets[span_end].1)?;

        debug!("Answer span [{span_start}, {span_end}] score {score:.4}");

        Ok(Answer {
            text: text.to_string(),
            score,
        })
    }
}

/// Find the best answer span `(start, end, score)`.
///
/// Considers only positions where `mask` is true, requires
/// `start <= end` and a span no longer than `max_answer_len` tokens, and
/// maximizes `start_logits[start] + end_logits[end]`. The returned score
/// is the softmax-probability product of the two chosen positions.
fn best_span(
    start_logits: &[f32],
    end_logits: &[f32],
    mask: &[bool],
    max_answer_len: usize,
) -> Option<(usize, usize, f32)> {
    let n = start_logits.len().min(end_logits.len()).min(mask.len());
    let mut best: Option<(usize, usize, f32)> = None;

    for i in 0..n {
        if !mask[i] {
            continue;
        }
        let last = i.saturating_add(max_answer_len).min(n);
        for j in i..last {
            if !mask[j] {
                continue;
            }
            let score = start_logits[i] + end_logits[j];
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((i, j, score));
            }
        }
    }

    let (i, j, _) = best?;
    let score = masked_softmax(start_logits, mask)[i] * masked_softmax(end_logits, mask)[j];
    Some((i, j, score))
}

/// Softmax over the unmasked positions; masked positions get probability 0.
fn masked_softmax(logits: &[f32], mask: &[bool]) -> Vec<f32> {
    let max = logits
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|(&l, _)| l)
        .fold(f32::NEG_INFINITY, f32::max);

    if max == f32::NEG_INFINITY {
        return vec![0.0; logits.len()];
    }

    let exps: Vec<f32> = logits
        .iter()
        .zip(mask)
        .map(|(&l, &m)| if m { (l - max).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

/// Slice the answer text out of the original context by byte offsets.
fn span_text(context: &str, start: usize, end: usize) -> Result<&str> {
    context.get(start..end).ok_or_else(|| {
        EngineError::Inference(format!(
            "answer span [{start}, {end}) is not aligned with the context"
        ))
    })
}
