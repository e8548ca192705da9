//! Per-endpoint routing tables.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Synthetic `model_routes` key consulted when the estimated input tokens
/// reach `long_context_threshold`.
pub const LONG_CONTEXT_ROUTE_KEY: &str = "__long_context__";

/// Routing table attached to one endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// Default `"provider:model"` targets per request bucket.
    pub defaults: RouteDefaults,

    /// Exact-match routes keyed by the client-requested model name, plus the
    /// synthetic [`LONG_CONTEXT_ROUTE_KEY`].
    pub model_routes: BTreeMap<String, String>,
}

impl RoutingConfig {
    /// Non-empty route string for a client model, if one is configured.
    pub fn model_route(&self, client_model: &str) -> Option<&str> {
        self.model_routes
            .get(client_model)
            .map(String::as_str)
            .filter(|route| !route.is_empty())
    }

    /// The long-context route, if one is configured.
    pub fn long_context_route(&self) -> Option<&str> {
        self.model_route(LONG_CONTEXT_ROUTE_KEY)
    }
}

/// Default targets per request bucket.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RouteDefaults {
    /// Ordinary completion requests.
    pub completion: Option<String>,

    /// Requests with the reasoning/thinking hint set.
    pub reasoning: Option<String>,

    /// Background-class requests (client asked for a haiku-tier model).
    pub background: Option<String>,

    /// Input-token estimate at which the long-context route takes over.
    pub long_context_threshold: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_route_strings_are_ignored() {
        let routing: RoutingConfig = toml::from_str(
            r#"
            [model_routes]
            "gpt-4o" = ""
            "claude-3-opus" = "p1:m1"
            "__long_context__" = "p2:m2"
            "#,
        )
        .unwrap();

        assert_eq!(routing.model_route("gpt-4o"), None);
        assert_eq!(routing.model_route("claude-3-opus"), Some("p1:m1"));
        assert_eq!(routing.long_context_route(), Some("p2:m2"));
    }
}
