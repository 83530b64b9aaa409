pub mod chat;
pub mod config;
pub mod error;
pub mod generation;
pub mod inspect;
pub mod model;
pub mod rate_limit;
pub mod request;
pub mod server;
pub mod sse;
pub mod tokenizer;

pub use config::AppConfig;
pub use error::{ModelError, ServiceError};
pub use generation::{DecodingEngine, GenerationEvent, GenerationStream};
pub use inspect::{AttentionInspector, AttentionReport};
pub use model::{LanguageModel, ModelRegistry};
pub use rate_limit::RateLimiter;
pub use request::{GenerationRequest, IntrospectionRequest};
pub use server::{AppState, build_router};
