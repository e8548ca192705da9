//! Configuration for the gateway: providers, endpoints, routing, auth.
//!
//! The configuration is an immutable snapshot. A running process holds a
//! [`ConfigStore`] and swaps in a fresh [`Config`] when the file changes;
//! request handling code takes one snapshot per request and never caches it
//! beyond that.

mod endpoint;
mod provider;
mod routing;
mod store;
mod validation;

use std::path::Path;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub use endpoint::{CustomEndpointConfig, EndpointId, EndpointPath, EndpointProtocol, EndpointsConfig, SurfaceConfig};
pub use provider::{AuthMode, ProviderConfig, ProviderType, WireFamily};
pub use routing::{LONG_CONTEXT_ROUTE_KEY, RouteDefaults, RoutingConfig};
pub use store::ConfigStore;
pub use validation::{ValidationConfig, ValidationMode};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Server settings for the binary.
    pub server: ServerConfig,

    /// Payload persistence toggles.
    pub storage: StorageConfig,

    /// Client API key settings.
    pub auth: AuthConfig,

    /// Upstream providers, in declaration order. Order matters: the router
    /// falls back to the first provider that serves a requested model.
    pub providers: IndexMap<String, ProviderConfig>,

    /// Client-facing endpoint surfaces.
    pub endpoints: EndpointsConfig,
}

impl Config {
    /// Load and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Routing table for an endpoint, if the endpoint exists.
    pub fn routing_for(&self, endpoint: &EndpointId) -> Option<&RoutingConfig> {
        match endpoint {
            EndpointId::Anthropic => Some(&self.endpoints.anthropic.routing),
            EndpointId::Openai => Some(&self.endpoints.openai.routing),
            EndpointId::Custom(id) => self.custom_endpoint(id).map(|e| &e.routing),
        }
    }

    /// Look up a custom endpoint by id.
    pub fn custom_endpoint(&self, id: &str) -> Option<&CustomEndpointConfig> {
        self.endpoints.custom.iter().find(|e| e.id == id)
    }

    /// Look up a configured client API key by its secret value.
    pub fn find_api_key(&self, provided: &str) -> Option<&ApiKeyConfig> {
        use secrecy::ExposeSecret;
        self.auth.keys.iter().find(|k| k.key.expose_secret() == provided)
    }
}

/// Server settings consumed by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:4100`.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4100".to_string(),
        }
    }
}

/// Payload persistence toggles for the log sink.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Persist request bodies alongside log records.
    pub store_request_payloads: bool,

    /// Persist (summarised) response bodies alongside log records.
    pub store_response_payloads: bool,
}

/// Client API key settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// When true, requests without a recognized key are rejected with 401.
    pub require_api_key: bool,

    /// Recognized client keys.
    pub keys: Vec<ApiKeyConfig>,
}

/// A single client-facing API key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    /// Stable identifier recorded in logs.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// The secret value clients present.
    pub key: SecretString,

    /// Endpoints this key may call. `None` allows all endpoints.
    /// Entries use endpoint-id spelling: `anthropic`, `openai`, `custom:<id>`.
    #[serde(default)]
    pub allowed_endpoints: Option<Vec<String>>,
}
