use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures raised by a [`crate::model::LanguageModel`] backend.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact missing: {0}")]
    MissingArtifact(String),
    #[error("invalid model config: {0}")]
    Config(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("forward pass failed: {0}")]
    Forward(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("model not ready yet, please retry")]
    ModelLoading,
    #[error("{0}")]
    Validation(String),
    #[error("rate limit exceeded")]
    Throttled,
    #[error("prompt too large: {size} bytes (max {max})")]
    PromptTooLarge { size: usize, max: usize },
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::ModelLoading => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::PromptTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Internal(_) | ServiceError::Model(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code carried next to the message in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::ModelLoading => "model_loading",
            ServiceError::Validation(_) => "invalid_request",
            ServiceError::Throttled => "rate_limited",
            ServiceError::PromptTooLarge { .. } => "prompt_too_large",
            ServiceError::Internal(_) | ServiceError::Model(_) => "internal_error",
        }
    }

    /// Message safe to hand to clients. Backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Internal(_) | ServiceError::Model(_) => {
                "internal error during generation".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
