//! Token sampling over raw logits.
//!
//! The generation loop treats sampling as an opaque engine primitive; this
//! module is the implementation the candle backend plugs in behind it:
//! repetition penalty, then top-k, then top-p, then a temperature-scaled
//! multinomial draw. Temperature at or below zero degenerates to argmax.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::Token;
use crate::config::SampleParams;

/// Scale down the logits of recently seen tokens.
///
/// Positive logits are divided by the penalty and negative ones multiplied,
/// so the push is always away from re-selection regardless of sign.
pub fn apply_repeat_penalty(logits: &mut [f32], penalty: f32, last_tokens: &[Token]) {
    if penalty == 1.0 {
        return;
    }
    for &token in last_tokens {
        if let Some(logit) = logits.get_mut(token as usize) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

/// Stateful token sampler. Keeps its RNG across calls so a fixed seed gives
/// a reproducible generation sequence.
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sample a token id from `logits`.
    pub fn sample(&mut self, logits: &[f32], params: &SampleParams) -> Token {
        if params.temperature <= 0.0 {
            return argmax(logits);
        }

        // Temperature-scaled softmax, shifted by the max logit for stability.
        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut probs: Vec<(usize, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i, ((l - max_logit) / params.temperature).exp()))
            .collect();
        probs.sort_by(|a, b| b.1.total_cmp(&a.1));

        // Top-k cut, then top-p within the survivors.
        let k = params.top_k.max(1).min(probs.len());
        probs.truncate(k);
        let total: f32 = probs.iter().map(|(_, p)| p).sum();

        if params.top_p < 1.0 {
            let mut cumulative = 0.0;
            let mut cutoff = probs.len();
            for (i, (_, p)) in probs.iter().enumerate() {
                cumulative += p / total;
                if cumulative >= params.top_p {
                    cutoff = i + 1;
                    break;
                }
            }
            probs.truncate(cutoff);
        }

        // Multinomial draw over the remaining mass.
        let mass: f32 = probs.iter().map(|(_, p)| p).sum();
        let mut r = self.rng.gen::<f32>() * mass;
        for (i, p) in &probs {
            r -= p;
            if r <= 0.0 {
                return *i as Token;
            }
        }
        probs.last().map(|(i, _)| *i as Token).unwrap_or(0)
    }
}

fn argmax(logits: &[f32]) -> Token {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as Token)
        .unwrap_or(0)
}
