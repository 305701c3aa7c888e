//! Candle-backed inference engine.
//!
//! Loads a llama-family model from a local directory (tokenizer.json,
//! config.json, and single or sharded safetensors) and implements the
//! [`Backend`] primitives over candle's llama graph.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context as _, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::backend::{Backend, Token};
use crate::config::{ContextParams, SampleParams};
use crate::sampler::{apply_repeat_penalty, Sampler};

const FALLBACK_EOS: Token = 2;

/// Model weights plus the KV cache they evaluate against.
struct ModelState {
    model: Llama,
    cache: Cache,
    dtype: DType,
}

/// A loaded llama-family context on a candle device.
///
/// Field mapping from [`ContextParams`]: `f16_kv` selects the model/cache
/// dtype, `vocab_only` skips weight loading (evaluation then reports an
/// error), `seed` drives the sampler RNG. `n_parts`,
/// `n_threads`, `logits_all` and `use_mlock` are accepted for parity:
/// shard discovery is automatic, candle parallelizes internally, only the
/// last-position logits exist in the graph, and weights are memory-mapped.
///
/// This backend exposes no embedding buffer; candle's llama graph consumes
/// the hidden state inside the head, so [`Backend::embeddings`] is `None`.
pub struct CandleBackend {
    tokenizer: Tokenizer,
    config: Config,
    state: Option<ModelState>,
    device: Device,
    sampler: Sampler,
    last_logits: Option<Vec<f32>>,
    eos: Token,
}

impl CandleBackend {
    /// Load from a model directory on an explicit device.
    pub fn load_with_device(path: &Path, params: &ContextParams, device: Device) -> Result<Self> {
        info!("loading model from {}", path.display());
        let report = |fraction: f32| {
            if let Some(cb) = &params.progress_callback {
                cb(fraction);
            }
        };

        let tokenizer = Tokenizer::from_file(path.join("tokenizer.json"))
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;
        report(0.25);

        let config_bytes = std::fs::read(path.join("config.json"))
            .with_context(|| format!("reading config.json in {}", path.display()))?;
        let llama_config: LlamaConfig = serde_json::from_slice(&config_bytes)?;
        let config = llama_config.into_config(false);
        report(0.5);

        let eos = match &config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => *id,
            Some(LlamaEosToks::Multiple(ids)) => ids.first().copied().unwrap_or(FALLBACK_EOS),
            None => tokenizer.token_to_id("</s>").unwrap_or(FALLBACK_EOS),
        };

        let dtype = if params.f16_kv { DType::F16 } else { DType::F32 };
        let state = if params.vocab_only {
            info!("vocab-only load, skipping weights");
            None
        } else {
            let filenames = weight_files(path)?;
            info!("loading {} safetensor file(s)", filenames.len());
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&filenames, dtype, &device)? };
            let model = Llama::load(vb, &config).context("failed to load model weights")?;
            let cache = Cache::new(true, dtype, &config, &device)?;
            Some(ModelState { model, cache, dtype })
        };
        report(1.0);

        if params.embedding {
            warn!("candle backend has no embedding buffer; embed() will return empty vectors");
        }

        info!(
            "model ready: vocab {}, hidden {}, {} layers",
            config.vocab_size, config.hidden_size, config.num_hidden_layers
        );

        Ok(Self {
            tokenizer,
            config,
            state,
            device,
            sampler: Sampler::new(resolve_seed(params.seed)),
            last_logits: None,
            eos,
        })
    }
}

impl Backend for CandleBackend {
    fn load(path: &Path, params: &ContextParams) -> Result<Self> {
        Self::load_with_device(path, params, Device::Cpu)
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let encoding = self
            .tokenizer
            .encode(text, add_bos)
            .map_err(|e| anyhow!("tokenizer error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn evaluate(&mut self, tokens: &[Token], n_past: usize, _n_threads: usize) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("no weights loaded (vocab-only context)"))?;
        // A call restarting at position 0 begins a fresh sequence.
        if n_past == 0 {
            state.cache = Cache::new(true, state.dtype, &self.config, &self.device)?;
        }
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = state.model.forward(&input, n_past, &mut state.cache)?;
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        self.last_logits = Some(logits.to_vec1()?);
        Ok(())
    }

    fn sample(&mut self, last_tokens: &[Token], params: &SampleParams) -> Result<Token> {
        let mut logits = self
            .last_logits
            .clone()
            .ok_or_else(|| anyhow!("sample called before any evaluation"))?;
        apply_repeat_penalty(&mut logits, params.repeat_penalty, last_tokens);
        Ok(self.sampler.sample(&logits, params))
    }

    fn detokenize(&self, tokens: &[Token]) -> Option<String> {
        self.tokenizer.decode(tokens, true).ok()
    }

    fn eos_token(&self) -> Token {
        self.eos
    }

    fn embedding_dim(&self) -> usize {
        self.config.hidden_size
    }

    fn embeddings(&self) -> Option<&[f32]> {
        None
    }
}

/// Discover safetensors files in `dir` (handles both single-file and
/// sharded-index layouts).
fn weight_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let index = dir.join("model.safetensors.index.json");
    if index.exists() {
        let json: serde_json::Value = serde_json::from_reader(std::fs::File::open(&index)?)?;
        let weight_map = match json.get("weight_map") {
            Some(serde_json::Value::Object(map)) => map,
            _ => bail!("no weight map in {}", index.display()),
        };
        let mut files = HashSet::new();
        for value in weight_map.values() {
            if let Some(file) = value.as_str() {
                files.insert(file.to_string());
            }
        }
        Ok(files.into_iter().map(|f| dir.join(f)).collect())
    } else {
        let single = dir.join("model.safetensors");
        if !single.exists() {
            bail!("no safetensors weights in {}", dir.display());
        }
        Ok(vec![single])
    }
}

fn resolve_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}
