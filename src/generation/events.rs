use serde::Serialize;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopKEntry {
    pub token_id: u32,
    pub token_text: String,
    pub token_display: String,
    pub prob: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenEvent {
    pub step: usize,
    pub token_id: u32,
    pub token_text: String,
    pub token_display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub step: usize,
    pub entropy: f32,
    pub topk: Vec<TopKEntry>,
    /// `heads × t` attention of the last position at the traced layer.
    pub attn: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoneEvent {
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub error: String,
    pub code: String,
}

/// One item of a generation stream. A stream is `Token`/`Trace` pairs in step
/// order followed by exactly one `Done`, or by one `Error` if a forward pass
/// failed part way.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Token(TokenEvent),
    Trace(TraceEvent),
    Done(DoneEvent),
    Error(ErrorEvent),
}

impl GenerationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationEvent::Token(_) => "token",
            GenerationEvent::Trace(_) => "trace",
            GenerationEvent::Done(_) => "done",
            GenerationEvent::Error(_) => "error",
        }
    }

    pub fn step(&self) -> Option<usize> {
        match self {
            GenerationEvent::Token(ev) => Some(ev.step),
            GenerationEvent::Trace(ev) => Some(ev.step),
            GenerationEvent::Done(_) | GenerationEvent::Error(_) => None,
        }
    }

    pub fn from_error(err: &ServiceError) -> Self {
        GenerationEvent::Error(ErrorEvent {
            error: err.public_message(),
            code: err.code().to_string(),
        })
    }
}
