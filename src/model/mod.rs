mod mock;
mod registry;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use mock::MockModel;
pub use registry::ModelRegistry;
pub use types::{AttentionMode, AttentionTrace, ForwardOutput, ModelSpec};

use crate::error::ModelError;

/// A causal sequence model that can report its attention weights.
///
/// Implementations are called from blocking worker threads and may serialize
/// access to their compute device internally.
pub trait LanguageModel: Send + Sync {
    fn spec(&self) -> &ModelSpec;

    /// Runs one forward pass over `context` (at most `context_len` tokens) and
    /// returns last-position logits plus the attention of `trace_layer`.
    fn forward(
        &self,
        context: &[u32],
        trace_layer: usize,
        mode: AttentionMode,
    ) -> Result<ForwardOutput, ModelError>;
}
