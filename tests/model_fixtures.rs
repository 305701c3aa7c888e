//! Fixture tests against a real model directory.
//!
//! Point `KILN_MODEL_DIR` at a directory holding a llama-family
//! `tokenizer.json` (the reference vocabulary), `config.json`, and
//! safetensors weights. The tokenizer tests load vocab-only, so weights are
//! not required to be complete for them. Without the env var the tests are
//! no-ops.

use std::path::{Path, PathBuf};

use kiln::{Backend, CandleBackend, ContextParams, Llama, SampleParams, Token};

fn model_dir() -> Option<PathBuf> {
    std::env::var_os("KILN_MODEL_DIR").map(Into::into)
}

fn vocab_only_session(dir: PathBuf) -> Llama<CandleBackend> {
    let params = ContextParams {
        vocab_only: true,
        ..Default::default()
    };
    Llama::load(dir, params).expect("model dir should load vocab-only")
}

/// Delegating backend that counts engine traffic, so generation-shape
/// assertions can run against real weights.
struct CountingBackend {
    inner: CandleBackend,
    sampled: Vec<Token>,
    evals: usize,
}

impl Backend for CountingBackend {
    fn load(path: &Path, params: &ContextParams) -> anyhow::Result<Self> {
        Ok(Self {
            inner: CandleBackend::load(path, params)?,
            sampled: Vec::new(),
            evals: 0,
        })
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> anyhow::Result<Vec<Token>> {
        self.inner.tokenize(text, add_bos)
    }

    fn evaluate(&mut self, tokens: &[Token], n_past: usize, n_threads: usize) -> anyhow::Result<()> {
        self.evals += 1;
        self.inner.evaluate(tokens, n_past, n_threads)
    }

    fn sample(&mut self, last_tokens: &[Token], params: &SampleParams) -> anyhow::Result<Token> {
        let token = self.inner.sample(last_tokens, params)?;
        self.sampled.push(token);
        Ok(token)
    }

    fn detokenize(&self, tokens: &[Token]) -> Option<String> {
        self.inner.detokenize(tokens)
    }

    fn eos_token(&self) -> Token {
        self.inner.eos_token()
    }

    fn embedding_dim(&self) -> usize {
        self.inner.embedding_dim()
    }

    fn embeddings(&self) -> Option<&[f32]> {
        self.inner.embeddings()
    }
}

#[test]
fn tokenizer_reference_fixtures() {
    let Some(dir) = model_dir() else {
        eprintln!("KILN_MODEL_DIR not set, skipping");
        return;
    };
    let llama = vocab_only_session(dir);
    assert_eq!(llama.tokenize("Hello World", false).unwrap(), vec![10994, 2787]);
    assert_eq!(
        llama
            .tokenize("How many letters are there in the English alphabet?", false)
            .unwrap(),
        vec![5328, 1784, 8721, 526, 727, 297, 278, 4223, 22968, 29973]
    );
    assert_eq!(
        llama.tokenize("中文測試", false).unwrap(),
        vec![30275, 30333, 233, 187, 175, 235, 172, 169]
    );
}

#[test]
fn tokenizer_is_deterministic() {
    let Some(dir) = model_dir() else {
        eprintln!("KILN_MODEL_DIR not set, skipping");
        return;
    };
    let llama = vocab_only_session(dir);
    let first = llama.tokenize("the quick brown fox", true).unwrap();
    let second = llama.tokenize("the quick brown fox", true).unwrap();
    assert_eq!(first, second);
    assert_ne!(
        llama.tokenize("the quick brown fox", false).unwrap(),
        first,
        "the BOS flag must participate in the output"
    );
}

#[test]
fn greedy_generation_respects_budget() {
    let Some(dir) = model_dir() else {
        eprintln!("KILN_MODEL_DIR not set, skipping");
        return;
    };
    let params = ContextParams {
        seed: 42,
        f16_kv: false,
        ..Default::default()
    };
    let mut llama = Llama::<CountingBackend>::load(dir, params).expect("model dir should load");
    let sample = SampleParams {
        temperature: 0.0,
        ..Default::default()
    };
    let output = llama.predict("The capital of France is", 8, &sample).unwrap();
    assert!(!output.is_empty());

    let counts = llama.backend();
    assert!(counts.evals >= 1);
    // Exactly the requested number of generated tokens, unless the model
    // closed the sequence first.
    let eos = counts.eos_token();
    if counts.sampled.last() == Some(&eos) {
        assert!(counts.sampled.len() <= 8);
    } else {
        assert_eq!(counts.sampled.len(), 8);
    }
}
