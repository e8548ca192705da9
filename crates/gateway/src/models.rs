//! Merged model listing.

use std::collections::BTreeSet;

use serde::Serialize;

use config::{Config, EndpointId, LONG_CONTEXT_ROUTE_KEY};

/// OpenAI-style model list with routing metadata.
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub metadata: ModelMetadata,
}

#[derive(Debug, Serialize)]
pub struct ModelMetadata {
    pub routes: Vec<RouteInfo>,
    pub providers: Vec<ProviderInfo>,
}

#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub endpoint: String,
    pub target: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub label: Option<String>,
    pub is_default: bool,
}

/// Models known to the gateway: routing-table keys merged with provider
/// declarations.
pub fn list_models(config: &Config) -> ModelsResponse {
    let mut names = BTreeSet::new();

    for (_, routing) in endpoint_routings(config) {
        for name in routing.model_routes.keys() {
            if name != LONG_CONTEXT_ROUTE_KEY {
                names.insert(name.clone());
            }
        }
    }

    for provider in config.providers.values() {
        for model in &provider.models {
            names.insert(model.clone());
        }
    }

    let data = names
        .into_iter()
        .map(|name| {
            let routes = endpoint_routings(config)
                .into_iter()
                .filter_map(|(endpoint, routing)| {
                    routing.model_route(&name).map(|target| RouteInfo {
                        endpoint: endpoint.to_string(),
                        target: target.to_string(),
                    })
                })
                .collect();

            let providers = config
                .providers
                .iter()
                .filter(|(_, provider)| provider.models.iter().any(|m| m == &name))
                .map(|(id, provider)| ProviderInfo {
                    id: id.clone(),
                    label: provider.label.clone(),
                    is_default: provider.default_model.as_deref() == Some(name.as_str()),
                })
                .collect();

            ModelEntry {
                id: name,
                object: "model",
                metadata: ModelMetadata { routes, providers },
            }
        })
        .collect();

    ModelsResponse { object: "list", data }
}

fn endpoint_routings(config: &Config) -> Vec<(EndpointId, &config::RoutingConfig)> {
    let mut routings = vec![
        (EndpointId::Anthropic, &config.endpoints.anthropic.routing),
        (EndpointId::Openai, &config.endpoints.openai.routing),
    ];

    for endpoint in &config.endpoints.custom {
        routings.push((EndpointId::Custom(endpoint.id.clone()), &endpoint.routing));
    }

    routings
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn merges_routes_and_provider_declarations() {
        let config = Config::from_toml(indoc! {r#"
            [providers.upstream]
            label = "Main"
            type = "openai"
            base_url = "https://api.example.com"
            api_key = "k"
            default_model = "gpt-4o"
            models = ["gpt-4o", "gpt-4o-mini"]

            [endpoints.anthropic.routing.model_routes]
            "claude-3-opus" = "upstream:gpt-4o"
            "__long_context__" = "upstream:gpt-4o"

            [[endpoints.custom]]
            id = "team-x"
            paths = [{ path = "/team-x", protocol = "openai-chat" }]

            [endpoints.custom.routing.model_routes]
            "claude-3-opus" = "upstream:gpt-4o-mini"
        "#})
        .unwrap();

        let response = list_models(&config);
        assert_eq!(response.object, "list");

        let ids: Vec<&str> = response.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["claude-3-opus", "gpt-4o", "gpt-4o-mini"]);

        let opus = &response.data[0];
        assert_eq!(opus.metadata.routes.len(), 2);
        assert_eq!(opus.metadata.routes[0].endpoint, "anthropic");
        assert_eq!(opus.metadata.routes[0].target, "upstream:gpt-4o");
        assert_eq!(opus.metadata.routes[1].endpoint, "custom:team-x");
        assert!(opus.metadata.providers.is_empty());

        let gpt4o = &response.data[1];
        assert_eq!(gpt4o.metadata.providers.len(), 1);
        assert!(gpt4o.metadata.providers[0].is_default);
        assert_eq!(gpt4o.metadata.providers[0].label.as_deref(), Some("Main"));
    }
}
