//! The gateway core: wire-compatible LLM surfaces in front of configurable
//! upstream providers, with format translation on both the request body and
//! the live SSE stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::catch_panic::CatchPanicLayer;

use config::{ConfigStore, EndpointId};

pub mod auth;
pub mod connector;
pub mod endpoints;
mod error;
pub mod models;
pub mod payload;
mod pipeline;
pub mod router;
pub mod storage;
pub mod token;
pub mod transform;
pub mod validator;

pub use error::{AnthropicErrorResponse, GatewayError, GatewayResult};

use crate::connector::ProviderConnector;
use crate::endpoints::EndpointRoute;
use crate::pipeline::IncomingRequest;
use crate::storage::LogStore;
use crate::transform::StreamFormat;

/// Process-wide gateway state shared by every handler.
pub struct GatewayState {
    pub config: Arc<ConfigStore>,
    pub store: Arc<dyn LogStore>,
    pub connector: ProviderConnector,
    pub(crate) active_requests: AtomicI64,
}

impl GatewayState {
    pub fn new(config: Arc<ConfigStore>, store: Arc<dyn LogStore>) -> Self {
        Self {
            config,
            store,
            connector: ProviderConnector::new(),
            active_requests: AtomicI64::new(0),
        }
    }

    /// Requests currently inside the pipeline.
    pub fn active_requests(&self) -> i64 {
        self.active_requests.load(Ordering::SeqCst)
    }
}

/// Build the axum router serving every gateway surface.
pub fn router(config: Arc<ConfigStore>, store: Arc<dyn LogStore>) -> Router {
    let state = Arc::new(GatewayState::new(config, store));
    router_with_state(state)
}

/// Router over pre-built state, for callers that need to inspect it (tests,
/// the binary's shutdown reporting).
pub fn router_with_state(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/messages", post(anthropic_messages))
        // Legacy clients double the version prefix.
        .route("/v1/v1/messages", post(anthropic_messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/responses", post(responses))
        .route("/v1/models", get(list_models))
        // Custom endpoints resolve through the live table, not the route set.
        .fallback(custom_endpoint)
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn anthropic_messages(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.config.snapshot().endpoints.anthropic.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    pipeline::handle(
        state,
        EndpointId::Anthropic,
        StreamFormat::Anthropic,
        IncomingRequest { method, uri, headers, body },
    )
    .await
}

/// Tokenizer-backed token counting; no upstream is contacted.
async fn count_tokens(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    if !state.config.snapshot().endpoints.anthropic.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let parsed: Result<serde_json::Value, _> = serde_json::from_slice(&body);
    let payload = parsed
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed JSON body: {e}")))
        .and_then(|body| payload::normalize_anthropic(&body));

    match payload {
        Ok(payload) => {
            let model = payload.model.as_deref().unwrap_or_default();
            let input_tokens = token::estimate_input_tokens(&payload, model);
            Json(serde_json::json!({"input_tokens": input_tokens})).into_response()
        }
        Err(error) => AnthropicErrorResponse(error).into_response(),
    }
}

async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.config.snapshot().endpoints.openai.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    pipeline::handle(
        state,
        EndpointId::Openai,
        StreamFormat::OpenaiChat,
        IncomingRequest { method, uri, headers, body },
    )
    .await
}

async fn responses(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.config.snapshot().endpoints.openai.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    pipeline::handle(
        state,
        EndpointId::Openai,
        StreamFormat::OpenaiResponses,
        IncomingRequest { method, uri, headers, body },
    )
    .await
}

async fn list_models(State(state): State<Arc<GatewayState>>) -> Response {
    let config = state.config.snapshot();
    Json(models::list_models(&config)).into_response()
}

/// Catch-all for custom endpoint prefixes. The path is re-resolved against
/// the current configuration on every request, so endpoint changes apply
/// without restarts and removed or disabled endpoints answer 404.
async fn custom_endpoint(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = state.config.snapshot();

    let Some(resolved) = endpoints::resolve_custom_path(&config, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let endpoint = EndpointId::Custom(resolved.endpoint_id);

    let protocol = match resolved.route {
        EndpointRoute::Messages => StreamFormat::Anthropic,
        EndpointRoute::ChatCompletions => StreamFormat::OpenaiChat,
        EndpointRoute::Responses => StreamFormat::OpenaiResponses,
        EndpointRoute::Models => {
            return Json(models::list_models(&config)).into_response();
        }
    };

    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    pipeline::handle(state, endpoint, protocol, IncomingRequest { method, uri, headers, body }).await
}

fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    log::error!("Request handler panicked: {detail}");

    GatewayError::Internal(None).into_response()
}
