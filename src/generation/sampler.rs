use std::cmp::Ordering;

use rand::{
    SeedableRng,
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
};

use crate::error::ModelError;

/// Floor applied inside the log when computing entropy.
pub const ENTROPY_EPS: f32 = 1e-12;

/// Outcome of one sampling decision.
#[derive(Debug, Clone)]
pub struct Sampled {
    pub token: u32,
    /// Distribution the token was drawn from. One-hot under greedy decoding.
    pub probs: Vec<f32>,
}

/// Per-request sampling policy with its own seeded generator.
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f32,
    top_k: Option<usize>,
    rng: StdRng,
}

impl Sampler {
    pub fn new(temperature: f32, top_k: Option<usize>, seed: u64) -> Self {
        Self {
            temperature,
            top_k,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<Sampled, ModelError> {
        if logits.is_empty() {
            return Err(ModelError::Output("empty logits".into()));
        }

        if self.is_greedy() {
            let token = argmax(logits);
            let mut probs = vec![0.0; logits.len()];
            probs[token] = 1.0;
            return Ok(Sampled {
                token: token as u32,
                probs,
            });
        }

        // Shifted by the max: tiny temperatures underflow to -inf, never overflow.
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut scaled: Vec<f32> = logits
            .iter()
            .map(|&l| (l - max) / self.temperature)
            .collect();
        if let Some(k) = self.top_k {
            gate_top_k(&mut scaled, k);
        }
        let probs = softmax(&scaled)?;

        let dist = WeightedIndex::new(&probs)
            .map_err(|e| ModelError::Output(format!("cannot sample distribution: {e}")))?;
        let token = dist.sample(&mut self.rng);

        Ok(Sampled {
            token: token as u32,
            probs,
        })
    }
}

/// Index of the first maximum.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Keeps the `min(k, len)` largest values and sets the rest to `-inf`.
pub fn gate_top_k(scaled: &mut [f32], k: usize) {
    let k = k.min(scaled.len());
    if k == 0 || k == scaled.len() {
        return;
    }
    let mut order: Vec<usize> = (0..scaled.len()).collect();
    order.select_nth_unstable_by(k - 1, |&a, &b| {
        scaled[b].total_cmp(&scaled[a]).then(a.cmp(&b))
    });
    for &i in &order[k..] {
        scaled[i] = f32::NEG_INFINITY;
    }
}

pub fn softmax(scaled: &[f32]) -> Result<Vec<f32>, ModelError> {
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return Err(ModelError::Output("logits contain no finite value".into()));
    }
    let exps: Vec<f32> = scaled.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

/// `-Σ p·ln(max(p, ε))`.
pub fn entropy(probs: &[f32]) -> f32 {
    probs
        .iter()
        .fold(0.0, |acc, &p| acc - p * p.max(ENTROPY_EPS).ln())
}

/// Up to `n` `(token, prob)` pairs with non-zero probability, most likely
/// first. Ties go to the lower token id.
pub fn top_entries(probs: &[f32], n: usize) -> Vec<(u32, f32)> {
    let mut entries: Vec<(u32, f32)> = probs
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > 0.0)
        .map(|(i, &p)| (i as u32, p))
        .collect();
    entries.sort_by(|a, b| match b.1.total_cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    entries.truncate(n);
    entries
}
