//! Server-Sent Events encoding of generation streams.

use std::{fmt, time::Instant};

use axum::response::sse::Event;
use serde::Serialize;
use tokio::{sync::mpsc, task};
use tokio_stream::wrappers::ReceiverStream;

use crate::generation::{GenerationEvent, GenerationStream};

/// One encoded event: name plus compact single-line JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

impl SseFrame {
    pub fn into_event(self) -> Event {
        Event::default().event(self.event).data(self.data)
    }
}

impl fmt::Display for SseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

pub fn encode(event: &GenerationEvent) -> SseFrame {
    let data = match event {
        GenerationEvent::Token(payload) => to_json(payload),
        GenerationEvent::Trace(payload) => to_json(payload),
        GenerationEvent::Done(payload) => to_json(payload),
        GenerationEvent::Error(payload) => to_json(payload),
    };
    SseFrame {
        event: event.name(),
        data,
    }
}

fn to_json<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize event payload");
        r#"{"error":"serialization failed"}"#.to_string()
    })
}

/// Drives `stream` on a blocking worker and forwards encoded frames through a
/// bounded channel. When the receiver goes away the worker stops pulling and
/// drops the stream.
pub fn spawn_frames(stream: GenerationStream, buffer: usize) -> ReceiverStream<SseFrame> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    task::spawn_blocking(move || pump(stream, tx));
    ReceiverStream::new(rx)
}

fn pump(mut stream: GenerationStream, tx: mpsc::Sender<SseFrame>) {
    let started = Instant::now();

    while let Some(item) = stream.next() {
        let frame = match item {
            Ok(event) => encode(&event),
            Err(err) => {
                tracing::error!(error = %err, "generation failed mid-stream");
                encode(&GenerationEvent::from_error(&err))
            }
        };
        if tx.blocking_send(frame).is_err() {
            tracing::info!(
                steps = stream.steps_taken(),
                "client disconnected, generation cancelled"
            );
            return;
        }
    }

    tracing::info!(
        steps = stream.steps_taken(),
        stopped = stream.hit_stop_sequence(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "generation stream finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{DoneEvent, TokenEvent, TopKEntry, TraceEvent};

    #[test]
    fn token_frame_layout() {
        let frame = encode(&GenerationEvent::Token(TokenEvent {
            step: 0,
            token_id: 72,
            token_text: "H".into(),
            token_display: "H".into(),
        }));
        assert_eq!(
            frame.to_string(),
            "event: token\ndata: {\"step\":0,\"token_id\":72,\"token_text\":\"H\",\"token_display\":\"H\"}\n\n"
        );
    }

    #[test]
    fn payload_stays_on_one_line() {
        let frame = encode(&GenerationEvent::Done(DoneEvent {
            reply: "line one\nline two".into(),
        }));
        assert_eq!(frame.event, "done");
        assert!(!frame.data.contains('\n'));
        assert_eq!(frame.data, r#"{"reply":"line one\nline two"}"#);
    }

    #[test]
    fn trace_frame_carries_topk_and_attn() {
        let frame = encode(&GenerationEvent::Trace(TraceEvent {
            step: 3,
            entropy: 0.0,
            topk: vec![TopKEntry {
                token_id: 10,
                token_text: "\n".into(),
                token_display: "\\x0a".into(),
                prob: 1.0,
            }],
            attn: vec![vec![0.5, 0.5]],
        }));
        let value: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(value["step"], 3);
        assert_eq!(value["topk"][0]["token_display"], "\\x0a");
        assert_eq!(value["topk"][0]["prob"], 1.0);
        assert_eq!(value["attn"][0][1], 0.5);
    }
}
