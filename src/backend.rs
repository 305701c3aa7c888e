//! The narrow interface between the generation controller and an inference
//! engine.
//!
//! Everything the control loop needs from an engine fits in eight calls:
//! load, tokenize, evaluate, sample, detokenize, plus the EOS constant and
//! the embedding buffer accessors. The loop never looks inside the engine;
//! mutable recurrent state (position, KV cache) lives entirely behind this
//! trait, which is why `evaluate` and `sample` take `&mut self`.

use std::path::Path;

use crate::config::{ContextParams, SampleParams};

/// A vocabulary unit id, meaningful only to the paired engine. Supports
/// equality and nothing else; one distinguished value per backend marks the
/// end of a sequence.
pub type Token = u32;

/// An inference engine holding one loaded model context.
///
/// Implementations own the context for their whole lifetime and release it
/// in `Drop`; a backend value is movable but never duplicated, so release
/// happens exactly once on every exit path.
///
/// A backend is not safe for overlapping calls: `evaluate` advances the
/// recurrent state that `sample` reads. [`crate::Llama`] enforces one call
/// in flight by taking `&mut self` on its public operations.
pub trait Backend: Sized {
    /// Load a model context from `path`. The caller has already verified
    /// that the path exists.
    fn load(path: &Path, params: &ContextParams) -> anyhow::Result<Self>;

    /// Turn text into an ordered token sequence, optionally prefixed with
    /// the beginning-of-sequence marker.
    fn tokenize(&self, text: &str, add_bos: bool) -> anyhow::Result<Vec<Token>>;

    /// Incorporate `tokens` into the recurrent state at position `n_past`.
    /// An error here means the state is corrupt and the call must abort.
    fn evaluate(&mut self, tokens: &[Token], n_past: usize, n_threads: usize)
        -> anyhow::Result<()>;

    /// Draw one token from the logits of the last evaluation, penalizing
    /// tokens in `last_tokens` per `params.repeat_penalty`.
    fn sample(&mut self, last_tokens: &[Token], params: &SampleParams) -> anyhow::Result<Token>;

    /// Decode a token sequence back to text, or `None` when the sequence
    /// has no textual form.
    ///
    /// Takes the whole sequence rather than one token at a time:
    /// SentencePiece-style vocabularies spell word boundaries and raw UTF-8
    /// bytes across tokens, so fragments only assemble correctly over a
    /// cumulative decode (the controller diffs successive decodes to emit
    /// incremental output).
    fn detokenize(&self, tokens: &[Token]) -> Option<String>;

    /// The end-of-sequence token for this model.
    fn eos_token(&self) -> Token;

    /// Width of the embedding vector this model produces.
    fn embedding_dim(&self) -> usize;

    /// The embedding buffer from the last evaluation, or `None` when the
    /// context was not configured for embedding extraction.
    fn embeddings(&self) -> Option<&[f32]>;
}
