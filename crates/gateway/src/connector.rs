//! Upstream provider connector.
//!
//! One HTTPS dispatch per request: correct auth header style for the
//! provider, sanitized client headers forwarded, body streamed back without
//! buffering. Non-2xx responses are returned as-is; the pipeline decides.

use std::time::Duration;

use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;

use config::{AuthMode, ProviderConfig, WireFamily};

use crate::error::{GatewayError, GatewayResult};
use crate::transform::StreamFormat;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Shared upstream HTTP client.
#[derive(Debug, Clone)]
pub struct ProviderConnector {
    client: Client,
}

/// One upstream dispatch.
pub struct UpstreamRequest<'a> {
    pub provider: &'a ProviderConfig,
    /// Wire format the upstream will speak; selects the OpenAI path.
    pub format: StreamFormat,
    pub body: &'a Value,
    /// Raw query string to append, without the leading `?`.
    pub query: Option<&'a str>,
    /// Sanitized client headers to forward.
    pub headers: &'a HeaderMap,
}

impl Default for ProviderConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderConnector {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // No total timeout: streamed responses run as long as they run.
            .pool_idle_timeout(Some(Duration::from_secs(5)))
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Dispatch to the upstream. Transport failures surface as
    /// `upstream_unavailable`; any HTTP status comes back verbatim.
    pub async fn send(&self, request: UpstreamRequest<'_>) -> GatewayResult<reqwest::Response> {
        let url = build_url(request.provider, request.format, request.query);

        log::debug!("Dispatching upstream request to {url}");

        let mut builder = self.client.post(&url).headers(request.headers.clone());

        if !request.headers.contains_key(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }

        if request.provider.family() == WireFamily::Anthropic && !request.headers.contains_key("anthropic-version") {
            builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        }

        // Auth is applied last so forwarded headers can never override it.
        builder = apply_auth(builder, request.provider);

        let body = sonic_rs::to_vec(request.body).map_err(|e| {
            log::error!("Failed to serialize upstream request body: {e}");
            GatewayError::Internal(None)
        })?;

        builder
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("failed to reach upstream: {e}")))
    }
}

fn build_url(provider: &ProviderConfig, format: StreamFormat, query: Option<&str>) -> String {
    let default_path = match provider.family() {
        WireFamily::Anthropic => "v1/messages",
        WireFamily::OpenAi => match format {
            StreamFormat::OpenaiResponses => "v1/responses",
            _ => "v1/chat/completions",
        },
    };

    let base = provider.base_url.trim_end_matches('/');
    match query {
        Some(query) if !query.is_empty() => format!("{base}/{default_path}?{query}"),
        _ => format!("{base}/{default_path}"),
    }
}

fn apply_auth(builder: reqwest::RequestBuilder, provider: &ProviderConfig) -> reqwest::RequestBuilder {
    let key = provider.api_key.expose_secret();

    match (provider.family(), provider.auth_mode) {
        (WireFamily::OpenAi, AuthMode::XAuthToken) => builder.header("X-Auth-Token", key),
        (WireFamily::OpenAi, _) => builder.header(http::header::AUTHORIZATION, format!("Bearer {key}")),
        (WireFamily::Anthropic, AuthMode::ApiKey) => builder.header("x-api-key", key),
        (WireFamily::Anthropic, AuthMode::AuthToken) => {
            builder.header(http::header::AUTHORIZATION, format!("Bearer {key}"))
        }
        (WireFamily::Anthropic, AuthMode::XAuthToken) => builder.header("x-auth-token", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Captured {
        headers: Arc<Mutex<Option<HeaderMap>>>,
    }

    async fn capture(State(state): State<Captured>, headers: HeaderMap, Json(_): Json<Value>) -> impl IntoResponse {
        *state.headers.lock().unwrap() = Some(headers);
        Json(json!({"ok": true}))
    }

    async fn spawn_upstream(path: &'static str) -> (String, Captured) {
        let state = Captured::default();
        let app = Router::new().route(path, post(capture)).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{address}"), state)
    }

    fn provider(toml: &str) -> ProviderConfig {
        toml::from_str(toml).unwrap()
    }

    #[tokio::test]
    async fn anthropic_providers_get_x_api_key_and_version() {
        let (base_url, state) = spawn_upstream("/v1/messages").await;

        let provider = provider(&format!(
            "type = \"anthropic\"\nbase_url = \"{base_url}\"\napi_key = \"sk-ant\"\n"
        ));

        let connector = ProviderConnector::new();
        let response = connector
            .send(UpstreamRequest {
                provider: &provider,
                format: StreamFormat::Anthropic,
                body: &json!({"model": "m"}),
                query: None,
                headers: &HeaderMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.status(), 200);

        let headers = state.headers.lock().unwrap().clone().unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant");
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn openai_providers_get_bearer_auth_that_forwarding_cannot_override() {
        let (base_url, state) = spawn_upstream("/v1/chat/completions").await;

        let provider = provider(&format!(
            "type = \"openai\"\nbase_url = \"{base_url}\"\napi_key = \"sk-oai\"\n"
        ));

        let mut forwarded = HeaderMap::new();
        forwarded.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer stolen"));
        forwarded.insert("x-request-id", HeaderValue::from_static("req-1"));

        let connector = ProviderConnector::new();
        connector
            .send(UpstreamRequest {
                provider: &provider,
                format: StreamFormat::OpenaiChat,
                body: &json!({"model": "m"}),
                query: None,
                headers: &forwarded,
            })
            .await
            .unwrap();

        let headers = state.headers.lock().unwrap().clone().unwrap();
        assert_eq!(headers.get(http::header::AUTHORIZATION).unwrap(), "Bearer sk-oai");
        assert_eq!(headers.get("x-request-id").unwrap(), "req-1");
    }

    #[tokio::test]
    async fn responses_format_selects_the_responses_path() {
        let (base_url, state) = spawn_upstream("/v1/responses").await;

        let provider = provider(&format!(
            "type = \"openai\"\nbase_url = \"{base_url}/\"\napi_key = \"k\"\nauth_mode = \"x-auth-token\"\n"
        ));

        let connector = ProviderConnector::new();
        let response = connector
            .send(UpstreamRequest {
                provider: &provider,
                format: StreamFormat::OpenaiResponses,
                body: &json!({"model": "m"}),
                query: Some("beta=true"),
                headers: &HeaderMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.status(), 200);

        let headers = state.headers.lock().unwrap().clone().unwrap();
        assert_eq!(headers.get("x-auth-token").unwrap(), "k");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_upstream_unavailable() {
        let provider = provider(
            "type = \"openai\"\nbase_url = \"http://127.0.0.1:1\"\napi_key = \"k\"\n",
        );

        let connector = ProviderConnector::new();
        let error = connector
            .send(UpstreamRequest {
                provider: &provider,
                format: StreamFormat::OpenaiChat,
                body: &json!({}),
                query: None,
                headers: &HeaderMap::new(),
            })
            .await
            .unwrap_err();

        assert_eq!(error.code(), "upstream_unavailable");
    }
}
