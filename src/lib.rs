//! Kiln - a lightweight controller for llama-style autoregressive generation
//!
//! This crate implements the control plane over a causal language model:
//! - Prompt tokenization and batched priming through an engine context
//! - Budgeted token generation with a sliding repetition-penalty window
//! - Single-pass embedding extraction
//! - A candle-backed default engine loading local safetensors models
//!
//! The engine itself sits behind the narrow [`Backend`] trait; the loop in
//! [`Llama::predict`] never looks past it.

pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod sampler;
pub mod session;

pub use backend::{Backend, Token};
pub use config::{ContextParams, ProgressCallback, SampleParams};
pub use error::{KilnError, Result};
pub use model::CandleBackend;
pub use sampler::Sampler;
pub use session::Llama;
