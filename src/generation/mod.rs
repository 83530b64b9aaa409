mod engine;
mod events;
pub mod sampler;
pub mod stop;

pub use engine::{DecodingEngine, GenerationStream, TRACE_TOP_K};
pub use events::{DoneEvent, ErrorEvent, GenerationEvent, TokenEvent, TopKEntry, TraceEvent};
