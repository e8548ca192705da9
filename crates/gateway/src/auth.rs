//! Client API key resolution.

use http::{HeaderMap, header};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use config::{Config, EndpointId};

use crate::error::{GatewayError, GatewayResult};

/// What we know about the caller's key for this request.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyContext {
    pub id: Option<String>,
    pub name: Option<String>,
    pub provided_key: Option<SecretString>,
    /// `None` allows every endpoint.
    pub allowed_endpoints: Option<Vec<String>>,
}

/// Resolve the presented key (`Authorization: Bearer` or `x-api-key`).
///
/// Unrecognized or missing keys are only an error when the configuration
/// requires one.
pub fn resolve_api_key(config: &Config, headers: &HeaderMap) -> GatewayResult<ApiKeyContext> {
    let provided = bearer_token(headers).or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let Some(provided) = provided.filter(|key| !key.is_empty()) else {
        if config.auth.require_api_key {
            return Err(GatewayError::InvalidApiKey);
        }
        return Ok(ApiKeyContext::default());
    };

    match config.find_api_key(&provided) {
        Some(key) => Ok(ApiKeyContext {
            id: Some(key.id.clone()),
            name: key.name.clone(),
            provided_key: Some(SecretString::from(provided)),
            allowed_endpoints: key.allowed_endpoints.clone(),
        }),
        None if config.auth.require_api_key => Err(GatewayError::InvalidApiKey),
        None => Ok(ApiKeyContext {
            provided_key: Some(SecretString::from(provided)),
            ..ApiKeyContext::default()
        }),
    }
}

/// Enforce the key's endpoint allowlist.
pub fn check_endpoint_access(context: &ApiKeyContext, endpoint: &EndpointId) -> GatewayResult<()> {
    let Some(allowed) = &context.allowed_endpoints else {
        return Ok(());
    };

    let spelling = endpoint.to_string();
    if allowed.iter().any(|entry| entry == &spelling) {
        return Ok(());
    }

    Err(GatewayError::Forbidden(spelling))
}

/// SHA-256 fingerprint of the presented key; this is what reaches the sink.
pub fn fingerprint(key: &SecretString) -> String {
    let digest = Sha256::digest(key.expose_secret().as_bytes());
    format!("{digest:x}")
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
