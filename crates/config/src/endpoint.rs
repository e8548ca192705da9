//! Client-facing endpoint surfaces.

use std::fmt;

use serde::Deserialize;

use crate::routing::RoutingConfig;
use crate::validation::ValidationConfig;

/// Identifier of a client-facing endpoint surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// The built-in Anthropic Messages surface.
    Anthropic,
    /// The built-in OpenAI surface (chat completions and responses).
    Openai,
    /// A user-declared endpoint, by id.
    Custom(String),
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Anthropic => f.write_str("anthropic"),
            EndpointId::Openai => f.write_str("openai"),
            EndpointId::Custom(id) => write!(f, "custom:{id}"),
        }
    }
}

impl EndpointId {
    /// Parse the `anthropic | openai | custom:<id>` spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "anthropic" => Some(EndpointId::Anthropic),
            "openai" => Some(EndpointId::Openai),
            other => other.strip_prefix("custom:").map(|id| EndpointId::Custom(id.to_string())),
        }
    }
}

/// All endpoint surfaces.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointsConfig {
    /// `/v1/messages` surface.
    pub anthropic: SurfaceConfig,

    /// `/v1/chat/completions` and `/v1/responses` surface.
    pub openai: SurfaceConfig,

    /// User-declared endpoints served under their own path prefixes.
    pub custom: Vec<CustomEndpointConfig>,
}

/// A built-in surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfig {
    pub enabled: bool,

    /// Routing table for requests arriving on this surface.
    pub routing: RoutingConfig,

    /// Request validation gate. Only consulted on the Anthropic surface.
    pub validation: ValidationConfig,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            routing: RoutingConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// A user-declared endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomEndpointConfig {
    /// Stable identifier; the endpoint id is `custom:<id>`.
    pub id: String,

    /// Human-readable label.
    #[serde(default)]
    pub label: Option<String>,

    /// Disabled endpoints keep their paths registered but answer 404.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path prefixes and the protocol each one speaks.
    pub paths: Vec<EndpointPath>,

    /// Routing table for requests arriving on this endpoint.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Request validation gate for Anthropic-protocol paths.
    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_true() -> bool {
    true
}

/// One path prefix of a custom endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointPath {
    /// Prefix under which the protocol's sub-paths are served, e.g. `/team-x`.
    pub path: String,

    /// Protocol spoken under this prefix.
    pub protocol: EndpointProtocol,
}

/// Protocol selector for custom endpoint paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointProtocol {
    Anthropic,
    OpenaiChat,
    OpenaiResponses,
    /// Serves both OpenAI sub-paths; the concrete protocol is chosen
    /// per-request from the URL suffix.
    OpenaiAuto,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_round_trips() {
        for spelling in ["anthropic", "openai", "custom:team-x"] {
            let id = EndpointId::parse(spelling).unwrap();
            assert_eq!(id.to_string(), spelling);
        }

        assert_eq!(EndpointId::parse("nope"), None);
    }
}
