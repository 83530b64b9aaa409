use serde::{Deserialize, Serialize};

use crate::{chat::ChatMessage, error::ServiceError};

fn default_max_new_tokens() -> usize {
    256
}

fn default_temperature() -> f32 {
    0.9
}

fn default_top_k() -> Option<usize> {
    Some(50)
}

fn default_seed() -> i64 {
    42
}

/// Body of `POST /chat/stream`. `top_k: null` disables top-k gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: i64,
    pub trace_layer: usize,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>, trace_layer: usize) -> Self {
        Self {
            messages,
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            seed: default_seed(),
            trace_layer,
        }
    }

    /// Checks the sampling fields. Layer bounds depend on the loaded model
    /// and are checked by the engine.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ServiceError::Validation(format!(
                "temperature must be a finite value >= 0, got {}",
                self.temperature
            )));
        }
        if self.top_k == Some(0) {
            return Err(ServiceError::Validation("top_k must be > 0".into()));
        }
        Ok(())
    }
}

/// Body of `POST /inspect/full_attn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionRequest {
    pub messages: Vec<ChatMessage>,
    pub trace_layer: usize,
    pub head: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let req: GenerationRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hello"}],"trace_layer":0}"#,
        )
        .unwrap();
        assert_eq!(req.max_new_tokens, 256);
        assert!((req.temperature - 0.9).abs() < 1e-6);
        assert_eq!(req.top_k, Some(50));
        assert_eq!(req.seed, 42);
    }

    #[test]
    fn explicit_null_disables_top_k() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"messages":[],"trace_layer":1,"top_k":null}"#).unwrap();
        assert_eq!(req.top_k, None);
    }

    #[test]
    fn trace_layer_is_required() {
        assert!(serde_json::from_str::<GenerationRequest>(r#"{"messages":[]}"#).is_err());
    }

    #[test]
    fn rejects_bad_sampling_fields() {
        let mut req = GenerationRequest::new(vec![], 0);
        req.temperature = -0.5;
        assert!(matches!(req.validate(), Err(ServiceError::Validation(_))));

        let mut req = GenerationRequest::new(vec![], 0);
        req.top_k = Some(0);
        assert!(matches!(req.validate(), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn introspection_ignores_sampling_fields() {
        let req: IntrospectionRequest = serde_json::from_str(
            r#"{"messages":[],"trace_layer":2,"head":3,"seed":7,"max_new_tokens":0}"#,
        )
        .unwrap();
        assert_eq!((req.trace_layer, req.head), (2, 3));
    }
}
