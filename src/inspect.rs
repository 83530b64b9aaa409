use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::{ModelError, ServiceError},
    model::{AttentionMode, AttentionTrace, LanguageModel},
    request::IntrospectionRequest,
    tokenizer,
};

/// Full attention matrix of one head over the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionReport {
    pub layer: usize,
    pub head: usize,
    pub token_ids: Vec<u32>,
    pub tokens: Vec<String>,
    pub tokens_display: Vec<String>,
    /// `t × t`, row = query position.
    pub attn: Vec<Vec<f32>>,
}

pub struct AttentionInspector {
    model: Arc<dyn LanguageModel>,
}

impl AttentionInspector {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn inspect(
        &self,
        request: &IntrospectionRequest,
        prompt_ids: &[u32],
    ) -> Result<AttentionReport, ServiceError> {
        let spec = self.model.spec();
        if request.trace_layer >= spec.n_layers {
            return Err(ServiceError::Validation(format!(
                "trace_layer must be in [0, {}), got {}",
                spec.n_layers,
                request.trace_layer
            )));
        }
        if request.head >= spec.n_heads {
            return Err(ServiceError::Validation(format!(
                "head must be in [0, {}), got {}",
                spec.n_heads,
                request.head
            )));
        }
        if prompt_ids.is_empty() {
            return Err(ServiceError::Validation("prompt must not be empty".into()));
        }

        let context = &prompt_ids[prompt_ids.len().saturating_sub(spec.context_len)..];
        let t = context.len();

        let output = self
            .model
            .forward(context, request.trace_layer, AttentionMode::Full)?;
        let AttentionTrace::Full(mut heads) = output.attention else {
            return Err(ModelError::Output("expected a full attention trace".into()).into());
        };
        if request.head >= heads.len() {
            return Err(ModelError::Output(format!(
                "trace has {} heads, model declares {}",
                heads.len(),
                spec.n_heads
            ))
            .into());
        }

        let mut attn = heads.swap_remove(request.head);
        if attn.len() < t || attn.iter().take(t).any(|row| row.len() < t) {
            return Err(ModelError::Output(format!("attention matrix smaller than {t}×{t}")).into());
        }
        attn.truncate(t);
        for row in &mut attn {
            row.truncate(t);
        }

        let token_ids = context.to_vec();
        Ok(AttentionReport {
            layer: request.trace_layer,
            head: request.head,
            tokens: token_ids.iter().map(|&id| tokenizer::decode_one(id)).collect(),
            tokens_display: token_ids.iter().map(|&id| tokenizer::token_display(id)).collect(),
            token_ids,
            attn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockModel, ModelSpec};

    fn request(trace_layer: usize, head: usize) -> IntrospectionRequest {
        IntrospectionRequest {
            messages: vec![],
            trace_layer,
            head,
        }
    }

    #[test]
    fn single_token_prompt_gives_one_by_one() {
        let inspector = AttentionInspector::new(Arc::new(MockModel::small()));
        let report = inspector.inspect(&request(0, 0), &[b'x'.into()]).unwrap();
        assert_eq!(report.attn, vec![vec![1.0]]);
        assert_eq!(report.tokens, vec!["x"]);
    }

    #[test]
    fn matrix_is_square_over_prompt() {
        let inspector = AttentionInspector::new(Arc::new(MockModel::small()));
        let ids = tokenizer::encode("user: hello\nassistant: ");
        let report = inspector.inspect(&request(2, 3), &ids).unwrap();
        assert_eq!((report.layer, report.head), (2, 3));
        assert_eq!(report.attn.len(), ids.len());
        assert!(report.attn.iter().all(|row| row.len() == ids.len()));
        assert_eq!(report.tokens_display[11], "\\x0a");
    }

    #[test]
    fn bounds_are_checked_before_forward() {
        let model = Arc::new(MockModel::small());
        let inspector = AttentionInspector::new(model.clone());
        assert!(matches!(
            inspector.inspect(&request(5, 0), &[1]),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            inspector.inspect(&request(0, 4), &[1]),
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn headless_model_rejects_without_panicking() {
        let model = Arc::new(MockModel::new(ModelSpec {
            vocab_size: 256,
            context_len: 4,
            n_layers: 1,
            n_heads: 0,
        }));
        let inspector = AttentionInspector::new(model.clone());
        let Err(ServiceError::Validation(message)) = inspector.inspect(&request(0, 0), &[1]) else {
            panic!("expected a validation error");
        };
        assert_eq!(message, "head must be in [0, 0), got 0");
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn long_prompts_are_cropped() {
        let model = Arc::new(MockModel::new(ModelSpec {
            vocab_size: 256,
            context_len: 4,
            n_layers: 1,
            n_heads: 1,
        }));
        let inspector = AttentionInspector::new(model);
        let ids = tokenizer::encode("abcdefg");
        let report = inspector.inspect(&request(0, 0), &ids).unwrap();
        assert_eq!(report.token_ids, tokenizer::encode("defg"));
        assert_eq!(report.attn.len(), 4);
    }
}
