use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use serde::Serialize;
use tokio::task;
use tokio_stream::StreamExt;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::{
    chat::format_chat,
    config::AppConfig,
    error::ServiceError,
    generation::DecodingEngine,
    inspect::{AttentionInspector, AttentionReport},
    model::ModelRegistry,
    rate_limit::RateLimiter,
    request::{GenerationRequest, IntrospectionRequest},
    sse, tokenizer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_burst,
            config.refill_rate(),
        ));
        Self {
            config,
            registry,
            limiter,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    model_ready: bool,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    router(AppState::new(config, registry))
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/chat/stream", post(chat_stream))
        .route("/inspect/full_attn", post(inspect_full_attn))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        model_ready: state.registry.is_ready(),
    })
}

async fn chat_stream(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let model = state.registry.get()?;
    let Json(request) = payload.map_err(reject_body)?;
    request.validate()?;
    admit(&state, connect_info)?;

    let transcript = format_chat(&request.messages);
    check_prompt_size(&state.config, &transcript)?;

    let stream = DecodingEngine::new(model).stream(&request, tokenizer::encode(&transcript))?;
    info!(
        max_new_tokens = request.max_new_tokens,
        temperature = request.temperature,
        top_k = ?request.top_k,
        trace_layer = request.trace_layer,
        "starting generation stream"
    );

    let frames = sse::spawn_frames(stream, state.config.stream_buffer)
        .map(|frame| Ok::<_, Infallible>(frame.into_event()));

    let mut response = Sse::new(frames).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

async fn inspect_full_attn(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<IntrospectionRequest>, JsonRejection>,
) -> Result<Json<AttentionReport>, ServiceError> {
    let model = state.registry.get()?;
    let Json(request) = payload.map_err(reject_body)?;
    admit(&state, connect_info)?;

    let transcript = format_chat(&request.messages);
    check_prompt_size(&state.config, &transcript)?;
    let prompt_ids = tokenizer::encode(&transcript);

    let report = task::spawn_blocking(move || {
        AttentionInspector::new(model).inspect(&request, &prompt_ids)
    })
    .await
    .map_err(|err| ServiceError::Internal(format!("inspection task failed: {err}")))??;

    Ok(Json(report))
}

fn reject_body(rejection: JsonRejection) -> ServiceError {
    ServiceError::Validation(rejection.body_text())
}

fn admit(
    state: &AppState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<(), ServiceError> {
    let key = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    if state.limiter.allow(&key) {
        Ok(())
    } else {
        debug!(client = %key, "request throttled");
        Err(ServiceError::Throttled)
    }
}

fn check_prompt_size(config: &AppConfig, transcript: &str) -> Result<(), ServiceError> {
    let size = transcript.len();
    if size > config.max_prompt_bytes {
        debug!(size, max = config.max_prompt_bytes, "prompt rejected as oversized");
        return Err(ServiceError::PromptTooLarge {
            size,
            max: config.max_prompt_bytes,
        });
    }
    Ok(())
}
