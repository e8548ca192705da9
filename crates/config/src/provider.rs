//! Upstream provider configuration.

use secrecy::SecretString;
use serde::Deserialize;

/// One configured upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Human-readable label shown in model listings.
    #[serde(default)]
    pub label: Option<String>,

    /// Wire dialect spoken by the provider.
    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    /// Base URL, e.g. `https://api.anthropic.com`.
    pub base_url: String,

    /// Upstream API key.
    pub api_key: SecretString,

    /// How the key is presented on the wire.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Model substituted when a route omits the model part.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Models this provider declares. Used for `/v1/models` and for the
    /// router's last-resort provider fallback.
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    /// The wire family of this provider's request/response bodies.
    pub fn family(&self) -> WireFamily {
        self.provider_type.family()
    }

    /// Whether request `metadata` may be forwarded to this provider.
    pub fn supports_metadata(&self) -> bool {
        !matches!(self.provider_type, ProviderType::Custom)
    }
}

/// Provider dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Openai,
    Anthropic,
    Deepseek,
    Kimi,
    /// OpenAI-compatible endpoint with unknown vendor extensions.
    Custom,
}

impl ProviderType {
    /// Anthropic speaks the Messages API; everything else is OpenAI-shaped.
    pub fn family(self) -> WireFamily {
        match self {
            ProviderType::Anthropic => WireFamily::Anthropic,
            ProviderType::Openai | ProviderType::Deepseek | ProviderType::Kimi | ProviderType::Custom => {
                WireFamily::OpenAi
            }
        }
    }
}

/// Request/response body family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFamily {
    Anthropic,
    OpenAi,
}

/// How the upstream API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Provider default: `x-api-key` for Anthropic, bearer for OpenAI.
    #[default]
    ApiKey,
    /// `Authorization: Bearer <key>` regardless of provider family.
    AuthToken,
    /// `X-Auth-Token: <key>`.
    XAuthToken,
}
