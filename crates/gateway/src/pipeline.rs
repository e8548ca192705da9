//! The per-request pipeline.
//!
//! One orchestrator for every surface: parse, authenticate, validate,
//! normalize, route, open the log record, dispatch upstream, relay the
//! response (streaming or not), commit usage, and finalize. The
//! active-request gauge and the single `finalize_log` call are guaranteed on
//! every exit path by a guard that runs on drop, including client
//! disconnects mid-stream.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use jiff::Timestamp;
use serde_json::{Value, json};

use config::{Config, EndpointId, ValidationConfig, ValidationMode, WireFamily};

use crate::GatewayState;
use crate::auth;
use crate::connector::UpstreamRequest;
use crate::error::{AnthropicErrorResponse, GatewayError, GatewayResult};
use crate::payload::{self, NormalizedPayload, response as response_codec};
use crate::router::{self, RouteTarget};
use crate::storage::{EventLevel, LogFinalize, LogId, LogOpen, LogPayload, MetricsDelta, SinkEvent, StorageError};
use crate::transform::{StreamFormat, StreamTransformer, Usage};
use crate::validator::{self, ValidationRequest};

/// Headers never forwarded upstream.
const HEADER_DENY_LIST: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "authorization",
    "x-api-key",
    "upgrade-insecure-requests",
];

/// The request surface handed over by the handlers.
pub(crate) struct IncomingRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Run one request through the pipeline, rendering errors in the client's
/// declared wire format.
pub(crate) async fn handle(
    state: Arc<GatewayState>,
    endpoint: EndpointId,
    protocol: StreamFormat,
    request: IncomingRequest,
) -> Response {
    match run(state, &endpoint, protocol, request).await {
        Ok(response) => response,
        Err(error) => render_error(protocol, error),
    }
}

pub(crate) fn render_error(protocol: StreamFormat, error: GatewayError) -> Response {
    match protocol {
        StreamFormat::Anthropic => AnthropicErrorResponse(error).into_response(),
        _ => error.into_response(),
    }
}

async fn run(
    state: Arc<GatewayState>,
    endpoint: &EndpointId,
    protocol: StreamFormat,
    request: IncomingRequest,
) -> GatewayResult<Response> {
    let start = Instant::now();
    let config = state.config.snapshot();

    let body: Value = serde_json::from_slice(&request.body)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed JSON body: {e}")))?;
    if !body.is_object() {
        return Err(GatewayError::InvalidRequest("request body must be a JSON object".into()));
    }

    let query = request.uri.query().map(str::to_string);
    let forward_headers = forwardable_headers(&request.headers);

    let key_context = auth::resolve_api_key(&config, &request.headers)?;
    if let Err(error) = auth::check_endpoint_access(&key_context, endpoint) {
        sink_try(
            "record_event",
            state.store.record_event(SinkEvent {
                event_type: "forbidden".into(),
                level: EventLevel::Warn,
                detail: json!({
                    "endpoint": endpoint.to_string(),
                    "apiKeyId": key_context.id,
                }),
            }),
        );
        return Err(error);
    }

    if protocol == StreamFormat::Anthropic {
        let validation = validation_config_for(&config, endpoint);
        run_validator(&state, endpoint, &validation, &request, query.as_deref(), &body, &key_context)?;
    }

    let payload = match protocol {
        StreamFormat::Anthropic => payload::normalize_anthropic(&body)?,
        StreamFormat::OpenaiChat => payload::normalize_openai_chat(&body)?,
        StreamFormat::OpenaiResponses => payload::normalize_openai_responses(&body)?,
    };

    let Some(client_model) = payload.model.clone().filter(|m| !m.is_empty()) else {
        return Err(GatewayError::InvalidRequest("model is required".into()));
    };

    let default_routing = config::RoutingConfig::default();
    let routing = config.routing_for(endpoint).unwrap_or(&default_routing);
    let route = router::resolve_route(&config, routing, &payload)?;

    // Log opens (and the gauge rises) before anything is dispatched.
    let mut guard = RequestGuard::new(state.clone(), start);
    let log_id = open_log(&state, endpoint, &route, &client_model, &payload, &key_context);
    guard.log_id = Some(log_id.clone());

    if config.storage.store_request_payloads {
        sink_try(
            "upsert_log_payload",
            state.store.upsert_log_payload(
                &log_id,
                LogPayload {
                    prompt: Some(body.clone()),
                    response: None,
                },
            ),
        );
    }

    let client_family = family_of(protocol);
    let provider_family = route.provider.family();

    // Same-family forwarding clones the original body so provider-specific
    // fields survive; cross-family goes through the codec. Model and stream
    // are always re-asserted.
    let mut upstream_body = if provider_family == client_family {
        body.clone()
    } else {
        match provider_family {
            WireFamily::Anthropic => payload::to_anthropic_body(&payload, &route.model),
            WireFamily::OpenAi => payload::to_openai_chat_body(&payload, &route.model, route.provider.supports_metadata()),
        }
    };
    if let Some(object) = upstream_body.as_object_mut() {
        object.insert("model".into(), json!(route.model));
        object.insert("stream".into(), json!(payload.stream));
    }

    let upstream_format = match provider_family {
        WireFamily::Anthropic => StreamFormat::Anthropic,
        WireFamily::OpenAi if protocol == StreamFormat::OpenaiResponses => StreamFormat::OpenaiResponses,
        WireFamily::OpenAi => StreamFormat::OpenaiChat,
    };

    let upstream = state
        .connector
        .send(UpstreamRequest {
            provider: &route.provider,
            format: upstream_format,
            body: &upstream_body,
            query: query.as_deref(),
            headers: &forward_headers,
        })
        .await;

    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(error) => {
            commit_usage(&state, &log_id, &route, Usage::default(), start.elapsed().as_millis() as u64);
            guard.finish(
                LogFinalize {
                    status_code: error.status_code().as_u16(),
                    latency_ms: start.elapsed().as_millis() as u64,
                    error: Some(error.client_message()),
                    ..LogFinalize::default()
                },
            );
            return Err(error);
        }
    };

    let status = upstream.status();

    // Provider errors pass through verbatim; the gateway stays transparent.
    if status.as_u16() >= 400 {
        let body_text = upstream.text().await.unwrap_or_default();
        log::warn!("Upstream '{}' answered {status}: {body_text}", route.provider_id);

        commit_usage(&state, &log_id, &route, Usage::default(), start.elapsed().as_millis() as u64);
        guard.finish(
            LogFinalize {
                status_code: status.as_u16(),
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(body_text.clone()),
                ..LogFinalize::default()
            },
        );

        return Err(GatewayError::UpstreamError {
            status: status.as_u16(),
            body: body_text,
        });
    }

    if payload.stream {
        Ok(stream_response(
            state,
            guard,
            StreamContext {
                log_id,
                route,
                client_model,
                protocol,
                upstream_format,
                capture: config.storage.store_response_payloads,
                start,
            },
            upstream,
        ))
    } else {
        non_streaming_response(
            state,
            guard,
            protocol,
            provider_family,
            client_family,
            &route,
            &client_model,
            &log_id,
            config.storage.store_response_payloads,
            start,
            upstream,
        )
        .await
    }
}

fn run_validator(
    state: &GatewayState,
    endpoint: &EndpointId,
    validation: &ValidationConfig,
    request: &IncomingRequest,
    query: Option<&str>,
    body: &Value,
    key_context: &auth::ApiKeyContext,
) -> GatewayResult<()> {
    if validation.mode == ValidationMode::Off {
        return Ok(());
    }

    let check = validator::validate_anthropic_request(
        validation,
        &ValidationRequest {
            method: &request.method,
            query,
            headers: &request.headers,
            body,
        },
    );

    let Err(failure) = check else {
        return Ok(());
    };

    let user_agent = request
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    sink_try(
        "record_event",
        state.store.record_event(SinkEvent {
            event_type: "claude_validation".into(),
            level: EventLevel::Warn,
            detail: json!({
                "code": failure.code,
                "path": failure.path,
                "mode": match validation.mode {
                    ValidationMode::ClaudeCode => "claude-code",
                    ValidationMode::AnthropicStrict => "anthropic-strict",
                    ValidationMode::Off => "off",
                },
                "endpoint": endpoint.to_string(),
                "clientModel": body.get("model").cloned().unwrap_or(Value::Null),
                "apiKeyId": key_context.id,
                "userAgent": user_agent,
            }),
        }),
    );

    Err(GatewayError::ClaudeValidation {
        code: failure.code,
        message: failure.message,
        path: failure.path,
    })
}

fn open_log(
    state: &GatewayState,
    endpoint: &EndpointId,
    route: &RouteTarget,
    client_model: &str,
    payload: &NormalizedPayload,
    key_context: &auth::ApiKeyContext,
) -> LogId {
    let open = LogOpen {
        ts: Timestamp::now(),
        endpoint: endpoint.to_string(),
        provider: route.provider_id.clone(),
        model: route.model.clone(),
        client_model: Some(client_model.to_string()),
        stream: payload.stream,
        api_key_id: key_context.id.clone(),
        api_key_name: key_context.name.clone(),
        api_key_fingerprint: key_context.provided_key.as_ref().map(auth::fingerprint),
    };

    match state.store.record_log(open) {
        Ok(id) => id,
        Err(e) => {
            // The request proceeds with a local id; only observability is lost.
            log::error!("Log sink failure (record_log): {e}");
            uuid::Uuid::new_v4().to_string()
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn non_streaming_response(
    state: Arc<GatewayState>,
    mut guard: RequestGuard,
    protocol: StreamFormat,
    provider_family: WireFamily,
    client_family: WireFamily,
    route: &RouteTarget,
    client_model: &str,
    log_id: &LogId,
    store_response: bool,
    start: Instant,
    upstream: reqwest::Response,
) -> GatewayResult<Response> {
    let status = upstream.status();

    let raw = match upstream.bytes().await {
        Ok(raw) => raw,
        Err(e) => {
            let error = GatewayError::UpstreamUnavailable(format!("failed to read upstream body: {e}"));
            guard.finish(
                LogFinalize {
                    status_code: error.status_code().as_u16(),
                    latency_ms: start.elapsed().as_millis() as u64,
                    error: Some(error.client_message()),
                    ..LogFinalize::default()
                },
            );
            return Err(error);
        }
    };

    let response_json: Option<Value> = serde_json::from_slice(&raw).ok();

    let mut usage = Usage::default();
    if let Some(wire_usage) = response_json.as_ref().and_then(|r| r.get("usage")) {
        usage.merge_from(wire_usage);
    }

    // Tokenizer fallbacks for fields the upstream left out.
    if usage.input == 0 {
        usage.input = route.token_estimate;
    }
    if usage.output == 0 && let Some(response_json) = &response_json {
        let text = extract_response_text(response_json);
        usage.output = crate::token::estimate_text_tokens(&text, &route.model);
    }

    let latency_ms = start.elapsed().as_millis() as u64;
    commit_usage(&state, log_id, route, usage, latency_ms);

    let client_body = match &response_json {
        Some(response_json) if provider_family != client_family => Some(match protocol {
            StreamFormat::Anthropic => response_codec::openai_to_anthropic(response_json, client_model),
            StreamFormat::OpenaiChat => response_codec::anthropic_to_openai(response_json, client_model),
            StreamFormat::OpenaiResponses => response_codec::anthropic_to_responses(response_json, client_model),
        }),
        _ => None,
    };

    if store_response {
        let stored = client_body
            .clone()
            .or_else(|| response_json.clone())
            .unwrap_or(Value::Null);
        sink_try(
            "upsert_log_payload",
            state.store.upsert_log_payload(
                log_id,
                LogPayload {
                    prompt: None,
                    response: Some(stored),
                },
            ),
        );
    }

    let tpot_ms = (usage.output > 0).then(|| latency_ms as f64 / usage.output as f64);
    guard.finish(
        LogFinalize {
            status_code: status.as_u16(),
            latency_ms,
            ttft_ms: None,
            tpot_ms,
            error: None,
        },
    );

    let response = match client_body {
        // Converted cross-family body.
        Some(converted) => (status, axum::Json(converted)).into_response(),
        // Same family: the upstream bytes pass through untouched.
        None => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            raw,
        )
            .into_response(),
    };

    Ok(response)
}

/// Everything the streaming relay needs to own.
struct StreamContext {
    log_id: LogId,
    route: RouteTarget,
    client_model: String,
    protocol: StreamFormat,
    upstream_format: StreamFormat,
    capture: bool,
    start: Instant,
}

struct StreamRelay {
    state: Arc<GatewayState>,
    guard: RequestGuard,
    context: StreamContext,
    transformer: StreamTransformer,
    upstream: futures::stream::BoxStream<'static, reqwest::Result<Bytes>>,
    first_token_at: Option<Instant>,
    captured: Vec<u8>,
    ended: bool,
}

impl StreamRelay {
    /// Final bookkeeping, exactly once: usage (with estimate fallbacks),
    /// TTFT/TPOT, metrics, optional payload summary, log finalize.
    fn complete(&mut self, error: Option<String>) {
        let mut usage = self.transformer.final_usage();
        if usage.input == 0 {
            usage.input = self.context.route.token_estimate;
        }
        if usage.output == 0 {
            // Rough bytes-per-token estimate from observed content.
            usage.output = (self.transformer.content_length() as u64).div_ceil(4);
        }

        let latency_ms = self.context.start.elapsed().as_millis() as u64;
        commit_usage(&self.state, &self.context.log_id, &self.context.route, usage, latency_ms);

        let ttft_ms = self
            .first_token_at
            .map(|at| at.duration_since(self.context.start).as_millis() as u64);
        let tpot_ms = match (ttft_ms, usage.output) {
            (Some(ttft), output) if output > 0 => Some((latency_ms.saturating_sub(ttft)) as f64 / output as f64),
            _ => None,
        };

        if self.context.capture {
            let summary = summarize_stream(
                &self.captured,
                self.context.protocol,
                usage,
                self.transformer.stop_reason(),
                &self.context.client_model,
            );
            sink_try(
                "upsert_log_payload",
                self.state.store.upsert_log_payload(
                    &self.context.log_id,
                    LogPayload {
                        prompt: None,
                        response: Some(summary),
                    },
                ),
            );
        }

        self.guard.finish(
            LogFinalize {
                status_code: StatusCode::OK.as_u16(),
                latency_ms,
                ttft_ms,
                tpot_ms,
                error,
            },
        );
    }
}

fn stream_response(
    state: Arc<GatewayState>,
    mut guard: RequestGuard,
    context: StreamContext,
    upstream: reqwest::Response,
) -> Response {
    // Headers are committed; aborts from here on finalize as 200.
    guard.abort_status = StatusCode::OK.as_u16();

    let transformer = StreamTransformer::new(context.upstream_format, context.protocol, context.client_model.clone());

    let relay = StreamRelay {
        state,
        guard,
        context,
        transformer,
        upstream: upstream.bytes_stream().boxed(),
        first_token_at: None,
        captured: Vec::new(),
        ended: false,
    };

    let stream = futures::stream::unfold(relay, |mut relay| async move {
        loop {
            if relay.ended {
                return None;
            }

            match relay.upstream.next().await {
                Some(Ok(chunk)) => {
                    let result = relay.transformer.transform(&chunk);

                    if result.ttft && relay.first_token_at.is_none() {
                        relay.first_token_at = Some(Instant::now());
                    }
                    if relay.context.capture {
                        relay.captured.extend_from_slice(&result.out);
                    }

                    if result.out.is_empty() {
                        continue;
                    }

                    return Some((Ok::<_, std::convert::Infallible>(Bytes::from(result.out)), relay));
                }
                Some(Err(e)) => {
                    log::error!("Upstream stream error: {e}");

                    let tail = relay.transformer.finish();
                    if relay.context.capture {
                        relay.captured.extend_from_slice(&tail);
                    }
                    relay.complete(Some(format!("upstream stream error: {e}")));
                    relay.ended = true;

                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(Bytes::from(tail)), relay));
                }
                None => {
                    // Upstream ended. Anthropic targets that never saw their
                    // terminal frames get them synthesized.
                    let tail = relay.transformer.finish();
                    if relay.context.capture {
                        relay.captured.extend_from_slice(&tail);
                    }
                    relay.complete(None);
                    relay.ended = true;

                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(Bytes::from(tail)), relay));
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            log::error!("Failed to build streaming response: {e}");
            GatewayError::Internal(None).into_response()
        })
}

/// Condense captured client-format SSE into a compact stored record.
fn summarize_stream(
    captured: &[u8],
    target: StreamFormat,
    usage: Usage,
    stop_reason: Option<&str>,
    model: &str,
) -> Value {
    let mut content = String::new();

    for line in captured.split(|&b| b == b'\n') {
        let Some(data) = line.strip_prefix(b"data: ") else {
            continue;
        };
        let Ok(event) = serde_json::from_slice::<Value>(data) else {
            continue;
        };

        match target {
            StreamFormat::Anthropic => {
                if event.pointer("/delta/type").and_then(Value::as_str) == Some("text_delta")
                    && let Some(text) = event.pointer("/delta/text").and_then(Value::as_str)
                {
                    content.push_str(text);
                }
            }
            StreamFormat::OpenaiChat => {
                if let Some(text) = event.pointer("/choices/0/delta/content").and_then(Value::as_str) {
                    content.push_str(text);
                }
            }
            StreamFormat::OpenaiResponses => {
                if event.get("type").and_then(Value::as_str) == Some("response.completed")
                    && let Some(text) = event.get("output_text").and_then(Value::as_str)
                {
                    content = text.to_string();
                }
            }
        }
    }

    json!({
        "content": content,
        "usage": {
            "input_tokens": usage.input,
            "output_tokens": usage.output,
            "cache_read_input_tokens": usage.cache_read,
            "cache_creation_input_tokens": usage.cache_creation,
        },
        "stop_reason": stop_reason,
        "model": model,
    })
}

fn commit_usage(state: &GatewayState, log_id: &LogId, route: &RouteTarget, usage: Usage, latency_ms: u64) {
    sink_try("update_log_tokens", state.store.update_log_tokens(log_id, &usage));

    let day = Timestamp::now()
        .to_zoned(jiff::tz::TimeZone::UTC)
        .strftime("%Y-%m-%d")
        .to_string();

    sink_try(
        "update_metrics",
        state.store.update_metrics(
            &day,
            &MetricsDelta {
                requests: 1,
                input_tokens: usage.input,
                output_tokens: usage.output,
                cache_read_tokens: usage.cache_read,
                cache_creation_tokens: usage.cache_creation,
                latency_ms,
            },
        ),
    );
}

fn family_of(protocol: StreamFormat) -> WireFamily {
    match protocol {
        StreamFormat::Anthropic => WireFamily::Anthropic,
        StreamFormat::OpenaiChat | StreamFormat::OpenaiResponses => WireFamily::OpenAi,
    }
}

fn validation_config_for(config: &Config, endpoint: &EndpointId) -> ValidationConfig {
    match endpoint {
        EndpointId::Anthropic => config.endpoints.anthropic.validation.clone(),
        EndpointId::Openai => ValidationConfig::default(),
        EndpointId::Custom(id) => config
            .custom_endpoint(id)
            .map(|e| e.validation.clone())
            .unwrap_or_default(),
    }
}

/// Collect client headers safe to forward upstream.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forward = HeaderMap::new();

    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if HEADER_DENY_LIST.contains(&lower.as_str()) || lower.starts_with("proxy-") {
            continue;
        }
        forward.append(name.clone(), value.clone());
    }

    forward
}

/// Guarantees the gauge decrement and a single log finalize on every exit
/// path, including panics and client disconnects.
struct RequestGuard {
    state: Arc<GatewayState>,
    log_id: Option<LogId>,
    start: Instant,
    /// Status recorded when the request is torn down without an explicit
    /// finish (disconnect, panic). 200 once streaming has started.
    abort_status: u16,
    finished: bool,
}

impl RequestGuard {
    fn new(state: Arc<GatewayState>, start: Instant) -> Self {
        state.active_requests.fetch_add(1, Ordering::SeqCst);
        Self {
            state,
            log_id: None,
            start,
            abort_status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            finished: false,
        }
    }

    fn finish(&mut self, fin: LogFinalize) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(log_id) = &self.log_id {
            sink_try("finalize_log", self.state.store.finalize_log(log_id, fin));
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.state.active_requests.fetch_sub(1, Ordering::SeqCst);

        if !self.finished && let Some(log_id) = &self.log_id {
            let fin = LogFinalize {
                status_code: self.abort_status,
                latency_ms: self.start.elapsed().as_millis() as u64,
                error: Some("request aborted".to_string()),
                ..LogFinalize::default()
            };
            sink_try("finalize_log", self.state.store.finalize_log(log_id, fin));
        }
    }
}

fn sink_try(operation: &str, result: Result<(), StorageError>) {
    if let Err(e) = result {
        log::error!("Log sink failure ({operation}): {e}");
    }
}

/// Assistant text of a non-streaming reply, in any of the three shapes.
fn extract_response_text(response: &Value) -> String {
    // Anthropic: content blocks.
    if let Some(blocks) = response.get("content").and_then(Value::as_array) {
        return blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
    }

    // OpenAI Chat: first choice message.
    if let Some(text) = response.pointer("/choices/0/message/content").and_then(Value::as_str) {
        return text.to_string();
    }

    // OpenAI Responses: aggregate field.
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }

    String::new()
}
