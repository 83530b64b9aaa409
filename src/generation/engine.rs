use std::{collections::VecDeque, iter::FusedIterator, sync::Arc};

use crate::{
    chat,
    error::{ModelError, ServiceError},
    generation::{
        events::{DoneEvent, GenerationEvent, TokenEvent, TopKEntry, TraceEvent},
        sampler::{self, Sampler},
        stop,
    },
    model::{AttentionMode, AttentionTrace, LanguageModel},
    request::GenerationRequest,
    tokenizer,
};

/// Number of candidates reported in each trace.
pub const TRACE_TOP_K: usize = 10;

pub struct DecodingEngine {
    model: Arc<dyn LanguageModel>,
}

impl DecodingEngine {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Validates `request` against the model and returns a lazy event stream.
    /// No forward pass runs until the first event is pulled.
    pub fn stream(
        &self,
        request: &GenerationRequest,
        prompt_ids: Vec<u32>,
    ) -> Result<GenerationStream, ServiceError> {
        let spec = *self.model.spec();
        if request.trace_layer >= spec.n_layers {
            return Err(ServiceError::Validation(format!(
                "trace_layer must be in [0, {}), got {}",
                spec.n_layers,
                request.trace_layer
            )));
        }
        request.validate()?;
        if prompt_ids.is_empty() {
            return Err(ServiceError::Validation("prompt must not be empty".into()));
        }

        Ok(GenerationStream {
            model: Some(self.model.clone()),
            context_len: spec.context_len,
            trace_layer: request.trace_layer,
            max_new_tokens: request.max_new_tokens,
            sampler: Sampler::new(request.temperature, request.top_k, request.seed as u64),
            prompt_len: prompt_ids.len(),
            ids: prompt_ids,
            generated: Vec::new(),
            step: 0,
            stopped: false,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            phase: Phase::Decoding,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Decoding,
    Finishing,
    Finished,
}

/// Pull-based decoding run. Each `next` performs at most one forward pass.
///
/// Events for trailing tokens that could still grow into a stop sequence are
/// held back until the ambiguity resolves, so a truncated run never reports
/// tokens past its cut point. Dropping the stream cancels the run.
pub struct GenerationStream {
    model: Option<Arc<dyn LanguageModel>>,
    context_len: usize,
    trace_layer: usize,
    max_new_tokens: usize,
    sampler: Sampler,
    prompt_len: usize,
    ids: Vec<u32>,
    /// Generated tokens as bytes, for stop-sequence matching.
    generated: Vec<u8>,
    step: usize,
    stopped: bool,
    held: VecDeque<GenerationEvent>,
    ready: VecDeque<GenerationEvent>,
    phase: Phase,
}

impl GenerationStream {
    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn hit_stop_sequence(&self) -> bool {
        self.stopped
    }

    fn advance(&mut self) -> Result<(), ServiceError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ServiceError::Internal("generation already finished".into()))?;

        let start = self.ids.len().saturating_sub(self.context_len);
        let output = model.forward(&self.ids[start..], self.trace_layer, AttentionMode::Row)?;
        let AttentionTrace::Row(attn) = output.attention else {
            return Err(ModelError::Output("expected a single-row attention trace".into()).into());
        };

        let sampled = self.sampler.sample(&output.logits)?;
        let token = sampled.token;
        let topk = sampler::top_entries(&sampled.probs, TRACE_TOP_K)
            .into_iter()
            .map(|(token_id, prob)| TopKEntry {
                token_id,
                token_text: tokenizer::decode_one(token_id),
                token_display: tokenizer::token_display(token_id),
                prob,
            })
            .collect();

        let step = self.step;
        self.held.push_back(GenerationEvent::Token(TokenEvent {
            step,
            token_id: token,
            token_text: tokenizer::decode_one(token),
            token_display: tokenizer::token_display(token),
        }));
        self.held.push_back(GenerationEvent::Trace(TraceEvent {
            step,
            entropy: sampler::entropy(&sampled.probs),
            topk,
            attn,
        }));
        self.step += 1;
        self.ids.push(token);
        self.generated.push(stop::token_byte(token));

        if let Some(cut) = stop::find_stop(&self.generated) {
            tracing::debug!(step, cut, "stop sequence generated, truncating");
            self.ids.truncate(self.prompt_len + cut);
            self.generated.truncate(cut);
            self.held
                .retain(|event| event.step().is_some_and(|s| s < cut));
            self.release_held(usize::MAX);
            self.stopped = true;
            self.phase = Phase::Finishing;
        } else {
            let open = stop::open_prefix_len(&self.generated);
            self.release_held(self.generated.len() - open);
        }
        Ok(())
    }

    /// Moves held events for steps before `until` to the ready queue.
    fn release_held(&mut self, until: usize) {
        while let Some(event) = self.held.front() {
            if event.step().is_some_and(|s| s >= until) {
                break;
            }
            if let Some(event) = self.held.pop_front() {
                self.ready.push_back(event);
            }
        }
    }

    fn finish(&mut self) -> GenerationEvent {
        let decoded = tokenizer::decode(&self.ids);
        let reply = chat::extract_assistant_reply(&decoded);
        self.release_resources();
        GenerationEvent::Done(DoneEvent { reply })
    }

    fn release_resources(&mut self) {
        self.model = None;
        self.ids = Vec::new();
        self.generated = Vec::new();
        self.held.clear();
    }
}

impl Iterator for GenerationStream {
    type Item = Result<GenerationEvent, ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }
            match self.phase {
                Phase::Finished => return None,
                Phase::Finishing => {
                    self.phase = Phase::Finished;
                    return Some(Ok(self.finish()));
                }
                Phase::Decoding if self.step >= self.max_new_tokens => {
                    self.release_held(usize::MAX);
                    self.phase = Phase::Finishing;
                }
                Phase::Decoding => {
                    if let Err(err) = self.advance() {
                        self.phase = Phase::Finished;
                        self.ready.clear();
                        self.release_resources();
                        return Some(Err(err));
                    }
                }
            }
        }
    }
}

impl FusedIterator for GenerationStream {}
