//! Model handle and the decode/sample control loop.
//!
//! [`Llama`] owns one engine context for its whole lifetime and runs the two
//! user-facing operations over it: `predict` (prompt priming, then budgeted
//! sampling with a sliding repetition-penalty window) and `embed` (a single
//! forward pass that reads the embedding buffer).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::{Backend, Token};
use crate::config::{ContextParams, SampleParams};
use crate::error::{KilnError, Result};

/// Tokens reserved at the end of the context window for generated
/// continuation and engine bookkeeping.
const CONTEXT_HEADROOM: usize = 4;

/// A loaded model, the sole owner of its engine context.
///
/// `predict` and `embed` take `&mut self`: the context carries mutable
/// recurrent state (position, KV cache), so exactly one call may be in
/// flight per handle. Callers wanting concurrency use one handle per caller.
/// The context is released when the handle drops, on every exit path.
#[derive(Debug)]
pub struct Llama<B: Backend> {
    backend: B,
    params: ContextParams,
}

impl<B: Backend> Llama<B> {
    /// Load a model from `path`.
    ///
    /// Fails with [`KilnError::ModelNotFound`] before touching the engine if
    /// the path does not exist. A backend that loads into a degraded state
    /// (e.g. vocab-only) is still returned; its evaluations fail instead.
    pub fn load(path: impl AsRef<Path>, params: ContextParams) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(KilnError::ModelNotFound(PathBuf::from(path)));
        }
        let backend = B::load(path, &params)?;
        Ok(Self { backend, params })
    }

    /// Wrap an already-constructed engine context.
    pub fn from_backend(backend: B, params: ContextParams) -> Self {
        Self { backend, params }
    }

    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Tokenize `text`. Empty text yields an empty sequence without calling
    /// the engine.
    pub fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.backend.tokenize(text, add_bos)?)
    }

    /// Generate up to `n_predict` tokens of continuation for `prompt`,
    /// returning the detokenized prompt echo plus continuation.
    ///
    /// The prompt is normalized with a leading space and a BOS marker to
    /// match the reference tokenizer's expected input shape. Fails with
    /// [`KilnError::InputTooLong`] if the tokenized prompt exceeds
    /// `n_ctx - 4`, before any evaluation; fails with
    /// [`KilnError::EvaluationFailed`] if the engine rejects an evaluation,
    /// discarding any text produced so far. Generation stops early when the
    /// model emits its end-of-sequence token.
    pub fn predict(&mut self, prompt: &str, n_predict: usize, params: &SampleParams) -> Result<String> {
        let prompt_tokens = self.tokenize(&format!(" {prompt}"), true)?;
        let n_ctx = self.params.n_ctx;
        let max = n_ctx.saturating_sub(CONTEXT_HEADROOM);
        if prompt_tokens.len() > max {
            return Err(KilnError::InputTooLong {
                count: prompt_tokens.len(),
                max,
            });
        }
        debug!(
            "generating up to {} tokens from {} prompt tokens",
            n_predict,
            prompt_tokens.len()
        );

        let eos = self.backend.eos_token();
        let batch_size = params.batch_size.max(1);
        let mut output = String::new();
        let mut stream = TokenOutputStream::new();
        let mut history: VecDeque<Token> = VecDeque::with_capacity(n_ctx);
        let mut pending: Vec<Token> = Vec::with_capacity(batch_size);
        let mut consumed = 0usize;
        let mut n_past = 0usize;
        let mut remaining = n_predict;

        loop {
            // Evaluation lags one iteration behind batch selection: submit
            // whatever the previous iteration chose, then pick the next batch.
            if !pending.is_empty() {
                self.backend
                    .evaluate(&pending, n_past, self.params.n_threads)
                    .map_err(KilnError::EvaluationFailed)?;
                n_past += pending.len();
                pending.clear();
            }

            if consumed < prompt_tokens.len() {
                // Prompt priming: feed up to batch_size tokens, no budget spent.
                while consumed < prompt_tokens.len() && pending.len() < batch_size {
                    let token = prompt_tokens[consumed];
                    pending.push(token);
                    push_history(&mut history, n_ctx, token);
                    consumed += 1;
                }
            } else if remaining > 0 {
                let window = penalty_window(&history, n_ctx, params.repeat_last_n);
                let token = self.backend.sample(&window, params)?;
                push_history(&mut history, n_ctx, token);
                pending.push(token);
                remaining -= 1;
            } else {
                break;
            }

            for &token in &pending {
                if let Some(fragment) = stream.next_token(token, |ts| self.backend.detokenize(ts)) {
                    output.push_str(&fragment);
                }
            }

            // Short-circuits even mid-priming, if the prompt ends in EOS.
            if pending.last() == Some(&eos) {
                break;
            }
        }

        if let Some(rest) = stream.decode_rest(|ts| self.backend.detokenize(ts)) {
            output.push_str(&rest);
        }

        Ok(output)
    }

    /// Compute a fixed-width embedding vector for `text`.
    ///
    /// Returns an empty vector without calling the engine when tokenization
    /// yields nothing, and an empty vector after evaluation when the context
    /// exposes no embedding buffer (it was not configured for embedding
    /// mode). Otherwise the result has exactly `embedding_dim` entries.
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenize(&format!(" {text}"), true)?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        self.backend
            .evaluate(&tokens, 0, self.params.n_threads)
            .map_err(KilnError::EvaluationFailed)?;

        let dim = self.backend.embedding_dim();
        match self.backend.embeddings() {
            Some(buffer) if buffer.len() >= dim => Ok(buffer[..dim].to_vec()),
            // A buffer narrower than the model's embedding width is a broken
            // engine contract, not a truncation opportunity.
            Some(buffer) => Err(KilnError::Backend(anyhow::anyhow!(
                "embedding buffer holds {} values, expected {}",
                buffer.len(),
                dim
            ))),
            None => Ok(Vec::new()),
        }
    }
}

/// Incremental detokenizer: diffs successive cumulative decodes so that
/// word-boundary markers and byte-fallback tokens assemble into complete
/// fragments before anything is emitted.
struct TokenOutputStream {
    tokens: Vec<Token>,
    prev_index: usize,
    current_index: usize,
}

impl TokenOutputStream {
    fn new() -> Self {
        Self {
            tokens: Vec::new(),
            prev_index: 0,
            current_index: 0,
        }
    }

    /// Push one token; returns the newly completed text, if any.
    fn next_token<F>(&mut self, token: Token, decode: F) -> Option<String>
    where
        F: Fn(&[Token]) -> Option<String>,
    {
        let prev_text = if self.tokens.is_empty() {
            String::new()
        } else {
            decode(&self.tokens[self.prev_index..self.current_index]).unwrap_or_default()
        };
        self.tokens.push(token);
        let text = decode(&self.tokens[self.prev_index..]).unwrap_or_default();
        if text.len() > prev_text.len() && text.chars().last().map_or(false, |c| !c.is_whitespace())
        {
            self.current_index = self.tokens.len();
            Some(text[prev_text.len()..].to_string())
        } else {
            None
        }
    }

    /// Flush whatever decoded text was still being withheld.
    fn decode_rest<F>(&self, decode: F) -> Option<String>
    where
        F: Fn(&[Token]) -> Option<String>,
    {
        let prev_text = if self.tokens.is_empty() {
            String::new()
        } else {
            decode(&self.tokens[self.prev_index..self.current_index]).unwrap_or_default()
        };
        let text = decode(&self.tokens[self.prev_index..]).unwrap_or_default();
        if text.len() > prev_text.len() {
            Some(text[prev_text.len()..].to_string())
        } else {
            None
        }
    }
}

/// Append to the sliding history, evicting the oldest entry at capacity.
fn push_history(history: &mut VecDeque<Token>, n_ctx: usize, token: Token) {
    if history.len() >= n_ctx {
        history.pop_front();
    }
    history.push_back(token);
}

/// The repetition-penalty window: the most recent `repeat_last_n`-bounded
/// tail of the history. With a full history of `n_ctx` entries this keeps
/// exactly the last `repeat_last_n` tokens.
fn penalty_window(history: &VecDeque<Token>, n_ctx: usize, repeat_last_n: usize) -> Vec<Token> {
    let skip = n_ctx.saturating_sub(repeat_last_n);
    if history.len() > skip {
        history.iter().skip(skip).copied().collect()
    } else {
        history.iter().copied().collect()
    }
}
