//! Parameter bundles for model construction and sampling.
//!
//! Both structs are plain data, fixed at the call that receives them. The
//! defaults mirror the llama.cpp conventions: a 512-token context, seed 0
//! for "pick one at random", and the classic top-k/top-p sampling setup.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Called with a load progress fraction in `[0, 1]`.
///
/// Extension point for long model loads; nothing in the generation loop
/// itself reports progress.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Configuration for constructing a model context.
///
/// Immutable once handed to [`crate::Llama::load`]. Individual backends may
/// ignore fields they cannot honor (see [`crate::CandleBackend`] for which
/// ones it maps and which it accepts for parity only).
#[derive(Clone)]
pub struct ContextParams {
    /// Context window length in tokens.
    pub n_ctx: usize,
    /// Model shard count, -1 for the engine default.
    pub n_parts: i32,
    /// RNG seed for sampling; 0 lets the engine pick one.
    pub seed: u64,
    /// Thread count forwarded to each evaluation call.
    pub n_threads: usize,
    /// Use half precision for the KV cache.
    pub f16_kv: bool,
    /// Compute logits for all positions, not just the last one.
    pub logits_all: bool,
    /// Load only the vocabulary, no weights.
    pub vocab_only: bool,
    /// Lock the model in memory.
    pub use_mlock: bool,
    /// Embedding-only mode.
    pub embedding: bool,
    /// Invoked with load progress, if set.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_parts: -1,
            seed: 0,
            n_threads: 4,
            f16_kv: true,
            logits_all: false,
            vocab_only: false,
            use_mlock: false,
            embedding: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ContextParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextParams")
            .field("n_ctx", &self.n_ctx)
            .field("n_parts", &self.n_parts)
            .field("seed", &self.seed)
            .field("n_threads", &self.n_threads)
            .field("f16_kv", &self.f16_kv)
            .field("logits_all", &self.logits_all)
            .field("vocab_only", &self.vocab_only)
            .field("use_mlock", &self.use_mlock)
            .field("embedding", &self.embedding)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "Fn(f32)"),
            )
            .finish()
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleParams {
    /// Keep only the `top_k` most likely tokens.
    pub top_k: usize,
    /// Nucleus sampling threshold in `[0, 1]`.
    pub top_p: f32,
    /// Softmax temperature; values at or below zero select greedily.
    pub temperature: f32,
    /// Length of the repetition-penalty window.
    pub repeat_last_n: usize,
    /// Penalty strength; 1.0 means no penalty.
    pub repeat_penalty: f32,
    /// Prompt tokens fed per evaluation call during priming.
    pub batch_size: usize,
}

impl Default for SampleParams {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            temperature: 0.8,
            repeat_last_n: 64,
            repeat_penalty: 1.1,
            batch_size: 8,
        }
    }
}
