//! Error types for the kiln crate.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for kiln operations.
///
/// The first three variants are the terminal conditions a caller can react
/// to (retry with adjusted inputs, or abort); none are retried internally.
/// `Backend` carries engine-internal faults such as weight or tokenizer
/// loading failures.
#[derive(Debug, Error)]
pub enum KilnError {
    /// The model path does not exist. Checked before any engine call.
    #[error("model not found: {0}")]
    ModelNotFound(PathBuf),

    /// The tokenized prompt does not fit the context window, leaving the
    /// fixed safety margin for generated continuation.
    #[error("input too long: {count} tokens exceeds the context budget of {max}")]
    InputTooLong { count: usize, max: usize },

    /// An engine evaluation call failed mid-loop. The recurrent state can no
    /// longer be trusted, so the whole call aborts with no partial output.
    #[error("engine evaluation failed: {0}")]
    EvaluationFailed(#[source] anyhow::Error),

    /// A backend fault outside the evaluation path (load, tokenizer).
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KilnError>;
