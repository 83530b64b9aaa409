use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    error::ModelError,
    model::{AttentionMode, AttentionTrace, ForwardOutput, LanguageModel, ModelSpec},
    tokenizer,
};

/// Deterministic stand-in for a trained checkpoint.
///
/// Call `n` returns logits peaking at `script[n % script.len()]` and uniform
/// causal attention, so generated text is fully predictable under greedy
/// decoding.
#[derive(Debug)]
pub struct MockModel {
    spec: ModelSpec,
    script: Vec<u32>,
    peak: f32,
    fail_at: Option<usize>,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            script: vec![u32::from(b'H')],
            peak: 10.0,
            fail_at: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// `V=256, T=256, L=4, H=4`.
    pub fn small() -> Self {
        Self::new(ModelSpec {
            vocab_size: tokenizer::VOCAB_SIZE,
            context_len: 256,
            n_layers: 4,
            n_heads: 4,
        })
    }

    pub fn with_script(mut self, script: Vec<u32>) -> Self {
        if !script.is_empty() {
            self.script = script;
        }
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_script(tokenizer::encode(text))
    }

    /// Logit assigned to the scripted token; every other token gets 0.
    pub fn with_peak(mut self, peak: f32) -> Self {
        self.peak = peak;
        self
    }

    /// Make the `n`-th forward call (0-based) fail.
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for MockModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn forward(
        &self,
        context: &[u32],
        trace_layer: usize,
        mode: AttentionMode,
    ) -> Result<ForwardOutput, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(call) {
            return Err(ModelError::Forward(format!("scripted failure on call {call}")));
        }
        if trace_layer >= self.spec.n_layers {
            return Err(ModelError::Forward(format!("no layer {trace_layer}")));
        }
        if context.is_empty() || context.len() > self.spec.context_len {
            return Err(ModelError::Forward(format!(
                "context of {} tokens outside 1..={}",
                context.len(),
                self.spec.context_len
            )));
        }

        let mut logits = vec![0.0f32; self.spec.vocab_size];
        let target = self.script[call % self.script.len()] as usize;
        if let Some(slot) = logits.get_mut(target) {
            *slot = self.peak;
        }

        let t = context.len();
        let attention = match mode {
            AttentionMode::Row => {
                AttentionTrace::Row(vec![vec![1.0 / t as f32; t]; self.spec.n_heads])
            }
            AttentionMode::Full => {
                let causal: Vec<Vec<f32>> = (0..t)
                    .map(|i| {
                        (0..t)
                            .map(|j| if j <= i { 1.0 / (i + 1) as f32 } else { 0.0 })
                            .collect()
                    })
                    .collect();
                AttentionTrace::Full(vec![causal; self.spec.n_heads])
            }
        };

        Ok(ForwardOutput { logits, attention })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_cycles_per_call() {
        let model = MockModel::small().with_text("ab");
        let argmax = |out: ForwardOutput| {
            out.logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap()
        };
        assert_eq!(argmax(model.forward(&[1], 0, AttentionMode::Row).unwrap()), 97);
        assert_eq!(argmax(model.forward(&[1], 0, AttentionMode::Row).unwrap()), 98);
        assert_eq!(argmax(model.forward(&[1], 0, AttentionMode::Row).unwrap()), 97);
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn full_attention_rows_sum_to_one() {
        let model = MockModel::small();
        let out = model.forward(&[1, 2, 3], 1, AttentionMode::Full).unwrap();
        let AttentionTrace::Full(heads) = out.attention else {
            panic!("expected full trace");
        };
        assert_eq!(heads.len(), 4);
        for row in &heads[0] {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
