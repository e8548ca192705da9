//! Route resolution: normalized payload + endpoint routing → `(provider, model)`.

use config::{Config, ProviderConfig, RouteDefaults, RoutingConfig};

use crate::error::{GatewayError, GatewayResult};
use crate::payload::NormalizedPayload;
use crate::token;

/// The resolved target for one request.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub provider_id: String,
    pub provider: ProviderConfig,
    pub model: String,
    /// Estimated input tokens, reused for logging and usage fallbacks.
    pub token_estimate: u64,
}

/// Semantic request class used to select a default route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Reasoning,
    Background,
    LongContext,
    Completion,
}

impl Bucket {
    fn route_key(self) -> &'static str {
        match self {
            Bucket::Reasoning => "reasoning",
            Bucket::Background => "background",
            Bucket::LongContext => config::LONG_CONTEXT_ROUTE_KEY,
            Bucket::Completion => "completion",
        }
    }

    fn default_route(self, defaults: &RouteDefaults) -> Option<&str> {
        match self {
            Bucket::Reasoning => defaults.reasoning.as_deref(),
            Bucket::Background => defaults.background.as_deref(),
            Bucket::Completion => defaults.completion.as_deref(),
            // Long-context routes live in model_routes only.
            Bucket::LongContext => None,
        }
    }
}

/// Resolve the `(provider, model)` target for a request.
pub fn resolve_route(
    config: &Config,
    routing: &RoutingConfig,
    payload: &NormalizedPayload,
) -> GatewayResult<RouteTarget> {
    let client_model = payload.model.as_deref().unwrap_or_default();
    let token_estimate = token::estimate_input_tokens(payload, client_model);

    let bucket = classify(routing, payload, client_model, token_estimate);

    log::debug!("Routing model '{client_model}' via bucket {bucket:?} (~{token_estimate} input tokens)");

    let route = routing
        .model_route(client_model)
        .or_else(|| match bucket {
            Bucket::LongContext => routing.long_context_route(),
            other => routing.model_route(other.route_key()),
        })
        .or_else(|| bucket.default_route(&routing.defaults));

    if let Some(route) = route {
        return parse_route(config, route, client_model, token_estimate);
    }

    fallback_to_providers(config, client_model, token_estimate)
}

/// Bucket precedence: reasoning > background > long-context > completion.
fn classify(routing: &RoutingConfig, payload: &NormalizedPayload, client_model: &str, estimate: u64) -> Bucket {
    if payload.thinking && routing.defaults.reasoning.is_some() {
        return Bucket::Reasoning;
    }

    if client_model.to_ascii_lowercase().contains("haiku") && routing.defaults.background.is_some() {
        return Bucket::Background;
    }

    let over_threshold = routing
        .defaults
        .long_context_threshold
        .is_some_and(|threshold| estimate >= threshold);
    if over_threshold && routing.long_context_route().is_some() {
        return Bucket::LongContext;
    }

    Bucket::Completion
}

/// Parse a `"providerId:modelId"` route. An empty model part substitutes the
/// provider's default model.
fn parse_route(config: &Config, route: &str, client_model: &str, token_estimate: u64) -> GatewayResult<RouteTarget> {
    let (provider_id, model_part) = route.split_once(':').unwrap_or((route, ""));

    let Some(provider) = config.providers.get(provider_id) else {
        log::warn!("Route '{route}' names unknown provider '{provider_id}'");
        return Err(GatewayError::RouteNotFound(client_model.to_string()));
    };

    let model = if model_part.is_empty() {
        match &provider.default_model {
            Some(default_model) => default_model.clone(),
            None => {
                log::warn!("Route '{route}' has no model and provider '{provider_id}' has no default");
                return Err(GatewayError::RouteNotFound(client_model.to_string()));
            }
        }
    } else {
        model_part.to_string()
    };

    Ok(RouteTarget {
        provider_id: provider_id.to_string(),
        provider: provider.clone(),
        model,
        token_estimate,
    })
}

/// Last resort: the first provider that declares the requested model, else
/// the first provider's default model.
fn fallback_to_providers(config: &Config, client_model: &str, token_estimate: u64) -> GatewayResult<RouteTarget> {
    if !client_model.is_empty() {
        for (provider_id, provider) in &config.providers {
            if provider.models.iter().any(|m| m == client_model) {
                return Ok(RouteTarget {
                    provider_id: provider_id.clone(),
                    provider: provider.clone(),
                    model: client_model.to_string(),
                    token_estimate,
                });
            }
        }
    }

    if let Some((provider_id, provider)) = config.providers.first()
        && let Some(default_model) = &provider.default_model
    {
        return Ok(RouteTarget {
            provider_id: provider_id.clone(),
            provider: provider.clone(),
            model: default_model.clone(),
            token_estimate,
        });
    }

    Err(GatewayError::RouteNotFound(client_model.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::normalize_anthropic;
    use indoc::indoc;
    use serde_json::json;

    fn test_config() -> Config {
        Config::from_toml(indoc! {r#"
            [providers.p1]
            type = "openai"
            base_url = "https://one.example.com"
            api_key = "k1"
            default_model = "m1"
            models = ["m1", "m1-mini"]

            [providers.p2]
            type = "anthropic"
            base_url = "https://two.example.com"
            api_key = "k2"
            default_model = "m2"
            models = ["m2"]
        "#})
        .unwrap()
    }

    fn routing(toml: &str) -> RoutingConfig {
        toml::from_str(toml).unwrap()
    }

    fn payload(model: &str, thinking: bool) -> NormalizedPayload {
        normalize_anthropic(&json!({
            "model": model,
            "thinking": thinking,
            "messages": [{"role": "user", "content": "hello there"}],
        }))
        .unwrap()
    }

    #[test]
    fn explicit_model_route_wins() {
        let config = test_config();
        let routing = routing(indoc! {r#"
            [defaults]
            completion = "p1:m1"

            [model_routes]
            "claude-3-opus" = "p2:m2"
        "#});

        let target = resolve_route(&config, &routing, &payload("claude-3-opus", false)).unwrap();
        assert_eq!(target.provider_id, "p2");
        assert_eq!(target.model, "m2");
    }

    #[test]
    fn long_context_route_overrides_completion() {
        let config = test_config();
        let routing = routing(indoc! {r#"
            [defaults]
            completion = "p1:m1"
            long_context_threshold = 60000

            [model_routes]
            "__long_context__" = "p2:m2"
        "#});

        let mut big = payload("claude-3-opus", false);
        // ~80k estimated input tokens.
        big.messages[0].text = "token ".repeat(80_000);

        let target = resolve_route(&config, &routing, &big).unwrap();
        assert_eq!(target.provider_id, "p2");
        assert_eq!(target.model, "m2");

        let small = payload("claude-3-opus", false);
        let target = resolve_route(&config, &routing, &small).unwrap();
        assert_eq!(target.provider_id, "p1");
        assert_eq!(target.model, "m1");
    }

    #[test]
    fn reasoning_beats_background_and_long_context() {
        let config = test_config();
        let routing = routing(indoc! {r#"
            [defaults]
            completion = "p1:m1"
            reasoning = "p2:m2"
            background = "p1:m1-mini"
            long_context_threshold = 1

            [model_routes]
            "__long_context__" = "p1:m1"
        "#});

        let target = resolve_route(&config, &routing, &payload("claude-3-5-haiku", true)).unwrap();
        assert_eq!(target.provider_id, "p2");
    }

    #[test]
    fn haiku_models_take_the_background_route() {
        let config = test_config();
        let routing = routing(indoc! {r#"
            [defaults]
            completion = "p1:m1"
            background = "p1:m1-mini"
        "#});

        let target = resolve_route(&config, &routing, &payload("claude-3-5-HAIKU", false)).unwrap();
        assert_eq!(target.model, "m1-mini");
    }

    #[test]
    fn empty_model_part_substitutes_the_provider_default() {
        let config = test_config();
        let routing = routing(indoc! {r#"
            [defaults]
            completion = "p2:"
        "#});

        let target = resolve_route(&config, &routing, &payload("anything", false)).unwrap();
        assert_eq!(target.provider_id, "p2");
        assert_eq!(target.model, "m2");
    }

    #[test]
    fn provider_fallback_matches_declared_models() {
        let config = test_config();
        let routing = RoutingConfig::default();

        let target = resolve_route(&config, &routing, &payload("m2", false)).unwrap();
        assert_eq!(target.provider_id, "p2");
        assert_eq!(target.model, "m2");

        // Unknown model: first provider's default.
        let target = resolve_route(&config, &routing, &payload("mystery", false)).unwrap();
        assert_eq!(target.provider_id, "p1");
        assert_eq!(target.model, "m1");
    }

    #[test]
    fn no_providers_is_route_not_found() {
        let config = Config::default();
        let routing = RoutingConfig::default();

        let error = resolve_route(&config, &routing, &payload("m", false)).unwrap_err();
        assert_eq!(error.code(), "route_not_found");
        assert_eq!(error.status_code().as_u16(), 400);
    }

    #[test]
    fn route_to_unknown_provider_is_route_not_found() {
        let config = test_config();
        let routing = routing(indoc! {r#"
            [defaults]
            completion = "ghost:m"
        "#});

        let error = resolve_route(&config, &routing, &payload("m", false)).unwrap_err();
        assert_eq!(error.code(), "route_not_found");
    }
}
