use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Shape parameters of a loaded checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(alias = "V")]
    pub vocab_size: usize,
    #[serde(alias = "T")]
    pub context_len: usize,
    #[serde(alias = "L")]
    pub n_layers: usize,
    #[serde(alias = "H")]
    pub n_heads: usize,
}

impl ModelSpec {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.vocab_size == 0 || self.context_len == 0 || self.n_layers == 0 || self.n_heads == 0
        {
            return Err(ModelError::Config(format!(
                "all dimensions must be positive, got {self:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionMode {
    /// Last query position only: `heads × t`.
    Row,
    /// Every query position: `heads × t × t`.
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttentionTrace {
    Row(Vec<Vec<f32>>),
    Full(Vec<Vec<Vec<f32>>>),
}

#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Logits for the last context position, `vocab_size` long.
    pub logits: Vec<f32>,
    pub attention: AttentionTrace,
}
