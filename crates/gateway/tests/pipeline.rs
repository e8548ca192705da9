//! End-to-end pipeline tests against a mock upstream.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use config::{Config, ConfigStore};
use gateway::{GatewayState, storage::MemoryLogStore};

/// What the mock upstream answers with.
#[derive(Clone)]
struct MockUpstream {
    hits: Arc<AtomicUsize>,
    status: StatusCode,
    content_type: &'static str,
    body: String,
}

impl MockUpstream {
    fn sse(body: &str) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            status: StatusCode::OK,
            content_type: "text/event-stream",
            body: body.to_string(),
        }
    }

    fn json(status: StatusCode, body: Value) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve_mock(State(mock): State<MockUpstream>) -> Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    (
        mock.status,
        [(header::CONTENT_TYPE, mock.content_type)],
        mock.body.clone(),
    )
        .into_response()
}

/// Bind a mock upstream serving every provider path.
async fn spawn_upstream(mock: MockUpstream) -> String {
    let app = Router::new()
        .route("/v1/messages", post(serve_mock))
        .route("/v1/chat/completions", post(serve_mock))
        .route("/v1/responses", post(serve_mock))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{address}")
}

struct TestGateway {
    base_url: String,
    state: Arc<GatewayState>,
    store: Arc<MemoryLogStore>,
}

async fn spawn_gateway(config: Config) -> TestGateway {
    let store = Arc::new(MemoryLogStore::new());
    let state = Arc::new(GatewayState::new(
        Arc::new(ConfigStore::new(config)),
        store.clone() as Arc<dyn gateway::storage::LogStore>,
    ));

    let app = gateway::router_with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway {
        base_url: format!("http://{address}"),
        state,
        store,
    }
}

fn config_with_provider(provider_type: &str, upstream_url: &str, extra: &str) -> Config {
    Config::from_toml(&format!(
        r#"
        [providers.mock]
        type = "{provider_type}"
        base_url = "{upstream_url}"
        api_key = "sk-upstream"
        default_model = "target-model"
        models = ["target-model"]

        [endpoints.anthropic.routing.defaults]
        completion = "mock:target-model"

        [endpoints.openai.routing.defaults]
        completion = "mock:target-model"
        {extra}
        "#
    ))
    .unwrap()
}

const ANTHROPIC_SSE: &str = concat!(
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n",
    "\n",
    "event: message_stop\n",
    "data: {\"type\":\"message_stop\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}\n",
    "\n",
);

#[tokio::test]
async fn anthropic_stream_passes_through_byte_for_byte() {
    let mock = MockUpstream::sse(ANTHROPIC_SSE);
    let upstream_url = spawn_upstream(mock.clone()).await;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .json(&json!({
            "model": "claude-sonnet-4",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = response.text().await.unwrap();
    assert_eq!(body, ANTHROPIC_SSE);
    assert_eq!(mock.hits(), 1);

    // Give the relay's completion bookkeeping a beat to land.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let records = gw.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].open.provider, "mock");
    assert_eq!(records[0].open.model, "target-model");
    assert_eq!(records[0].open.client_model.as_deref(), Some("claude-sonnet-4"));
    assert!(records[0].open.stream);

    let usage = records[0].usage.unwrap();
    assert_eq!(usage.input, 3);
    assert_eq!(usage.output, 1);

    let fin = records[0].finalize.clone().unwrap();
    assert_eq!(fin.status_code, 200);
    assert!(fin.ttft_ms.is_some());

    assert_eq!(gw.state.active_requests(), 0);
}

#[tokio::test]
async fn anthropic_upstream_streams_to_openai_chat_clients() {
    let upstream_url = spawn_upstream(MockUpstream::sse(ANTHROPIC_SSE)).await;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gw.base_url))
        .json(&json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();

    assert!(!body.contains("event:"));
    assert!(body.contains("\"delta\":{\"content\":\"Hi\"}"));
    assert!(body.contains("\"finish_reason\":\"stop\""));
}

#[tokio::test]
async fn openai_upstream_with_bare_done_synthesizes_anthropic_terminal() {
    let openai_sse = concat!(
        "data: {\"id\":\"chatcmpl_1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"}}]}\n",
        "\n",
        "data: [DONE]\n",
        "\n",
    );
    let upstream_url = spawn_upstream(MockUpstream::sse(openai_sse)).await;
    let gw = spawn_gateway(config_with_provider("openai", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .json(&json!({
            "model": "claude-sonnet-4",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();

    for expected in [
        "event: message_start",
        "event: content_block_start",
        "event: content_block_delta",
        "event: content_block_stop",
        "event: message_delta",
        "event: message_stop",
    ] {
        assert!(body.contains(expected), "missing {expected} in:\n{body}");
    }

    assert!(body.contains("\"stop_reason\":\"end_turn\""));
    assert_eq!(body.matches("event: message_stop").count(), 1);
    assert!(!body.contains("[DONE]"));
}

#[tokio::test]
async fn validation_rejects_before_dispatch_with_430() {
    let mock = MockUpstream::sse(ANTHROPIC_SSE);
    let upstream_url = spawn_upstream(mock.clone()).await;

    let mut config = config_with_provider("anthropic", &upstream_url, "");
    config.endpoints.anthropic.validation.mode = config::ValidationMode::ClaudeCode;
    let gw = spawn_gateway(config).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .header(header::USER_AGENT, "claude-cli/1.0.40")
        .header("anthropic-version", "2023-06-01")
        .json(&json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 430);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["code"], "invalid_request");
    assert!(body["error"]["message"].as_str().unwrap().contains("Claude Code"));

    // Upstream was never contacted, and an event was recorded.
    assert_eq!(mock.hits(), 0);
    let events = gw.store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "claude_validation");
    assert_eq!(events[0].detail["path"], "metadata.user_id");

    assert_eq!(gw.state.active_requests(), 0);
}

#[tokio::test]
async fn upstream_errors_pass_through_verbatim() {
    let mock = MockUpstream::json(
        StatusCode::TOO_MANY_REQUESTS,
        json!({"error": {"message": "slow down", "type": "rate_limit_error"}}),
    );
    let upstream_url = spawn_upstream(mock.clone()).await;
    let gw = spawn_gateway(config_with_provider("openai", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gw.base_url))
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 429);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "slow down");

    let records = gw.store.records();
    assert_eq!(records.len(), 1);
    let fin = records[0].finalize.clone().unwrap();
    assert_eq!(fin.status_code, 429);
    assert!(fin.error.unwrap().contains("slow down"));

    assert_eq!(gw.state.active_requests(), 0);
}

#[tokio::test]
async fn non_streaming_openai_reply_converts_for_anthropic_clients() {
    let mock = MockUpstream::json(
        StatusCode::OK,
        json!({
            "id": "chatcmpl_77",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello there"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 11, "completion_tokens": 4},
        }),
    );
    let upstream_url = spawn_upstream(mock.clone()).await;
    let gw = spawn_gateway(config_with_provider("openai", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .json(&json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["id"], "msg_77");
    assert_eq!(body["content"][0]["text"], "Hello there");
    assert_eq!(body["stop_reason"], "end_turn");

    let records = gw.store.records();
    let usage = records[0].usage.unwrap();
    assert_eq!(usage.input, 11);
    assert_eq!(usage.output, 4);
}

#[tokio::test]
async fn forbidden_keys_get_403_and_an_event() {
    let mock = MockUpstream::sse(ANTHROPIC_SSE);
    let upstream_url = spawn_upstream(mock.clone()).await;

    let extra = r#"
        [auth]
        require_api_key = true

        [[auth.keys]]
        id = "k1"
        key = "sk-client"
        allowed_endpoints = ["openai"]
    "#;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, extra)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .header("x-api-key", "sk-client")
        .json(&json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
    assert_eq!(mock.hits(), 0);

    let events = gw.store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "forbidden");

    // No key at all is a 401 in strict mode.
    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .json(&json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn custom_endpoints_follow_the_live_config() {
    let mock = MockUpstream::json(
        StatusCode::OK,
        json!({
            "id": "chatcmpl_1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1},
        }),
    );
    let upstream_url = spawn_upstream(mock.clone()).await;

    let extra = r#"
        [[endpoints.custom]]
        id = "team-x"
        enabled = true
        paths = [{ path = "/team-x", protocol = "openai-auto" }]

        [endpoints.custom.routing.defaults]
        completion = "mock:target-model"
    "#;
    let gw = spawn_gateway(config_with_provider("openai", &upstream_url, extra)).await;

    let request_body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
    });

    let response = reqwest::Client::new()
        .post(format!("{}/team-x/v1/chat/completions", gw.base_url))
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(gw.store.records()[0].open.endpoint, "custom:team-x");

    // Disable the endpoint in a fresh snapshot: next request 404s without
    // any restart.
    let mut updated = config_with_provider("openai", &upstream_url, extra);
    updated.endpoints.custom[0].enabled = false;
    gw.state.config.replace(updated);

    let response = reqwest::Client::new()
        .post(format!("{}/team-x/v1/chat/completions", gw.base_url))
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn count_tokens_answers_without_upstream() {
    let mock = MockUpstream::sse(ANTHROPIC_SSE);
    let upstream_url = spawn_upstream(mock.clone()).await;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages/count_tokens", gw.base_url))
        .json(&json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "count these tokens please"}],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["input_tokens"].as_u64().unwrap() > 0);
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn models_listing_merges_routes_and_providers() {
    let upstream_url = spawn_upstream(MockUpstream::sse(ANTHROPIC_SSE)).await;
    let extra = r#"
        [endpoints.anthropic.routing.model_routes]
        "claude-3-opus" = "mock:target-model"
    "#;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, extra)).await;

    let body: Value = reqwest::Client::new()
        .get(format!("{}/v1/models", gw.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["object"], "list");

    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"claude-3-opus"));
    assert!(ids.contains(&"target-model"));
}

#[tokio::test]
async fn malformed_bodies_are_rejected_as_invalid_request() {
    let upstream_url = spawn_upstream(MockUpstream::sse(ANTHROPIC_SSE)).await;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gw.base_url))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn missing_model_is_invalid_request() {
    let upstream_url = spawn_upstream(MockUpstream::sse(ANTHROPIC_SSE)).await;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, "")).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn request_payloads_are_stored_when_enabled() {
    let upstream_url = spawn_upstream(MockUpstream::sse(ANTHROPIC_SSE)).await;

    let extra = r#"
        [storage]
        store_request_payloads = true
        store_response_payloads = true
    "#;
    let gw = spawn_gateway(config_with_provider("anthropic", &upstream_url, extra)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gw.base_url))
        .json(&json!({
            "model": "claude-sonnet-4",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    response.text().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let records = gw.store.records();
    let payload = &records[0].payload;
    assert_eq!(payload.prompt.as_ref().unwrap()["model"], "claude-sonnet-4");

    let stored = payload.response.as_ref().unwrap();
    assert_eq!(stored["content"], "Hi");
    assert_eq!(stored["stop_reason"], "end_turn");
    assert_eq!(stored["usage"]["output_tokens"], 1);
}
