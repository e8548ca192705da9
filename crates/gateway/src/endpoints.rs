//! Custom endpoint resolution.
//!
//! Custom endpoints are served by one catch-all route backed by a live
//! lookup against the current configuration snapshot, so creating, editing,
//! disabling, or deleting an endpoint takes effect on the next request with
//! no route registration involved. Unmatched, disabled, and removed
//! endpoints all answer 404.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

use config::{Config, EndpointProtocol};

/// What a resolved custom path serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRoute {
    /// Anthropic Messages (`…/v1/messages`).
    Messages,
    /// OpenAI Chat Completions (`…/v1/chat/completions`).
    ChatCompletions,
    /// OpenAI Responses (`…/v1/responses`).
    Responses,
    /// Model listing (`…/v1/models`).
    Models,
}

/// A request path resolved against the live endpoint table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCustomEndpoint {
    /// Custom endpoint id (without the `custom:` prefix).
    pub endpoint_id: String,
    pub route: EndpointRoute,
}

/// Sub-paths served under each protocol's prefix. The doubled
/// `/v1/v1/messages` spelling is tolerated for legacy Anthropic clients.
fn expansions(protocol: EndpointProtocol) -> &'static [(&'static str, EndpointRoute)] {
    match protocol {
        EndpointProtocol::Anthropic => &[
            ("/v1/messages", EndpointRoute::Messages),
            ("/v1/v1/messages", EndpointRoute::Messages),
        ],
        EndpointProtocol::OpenaiChat => &[
            ("/v1/models", EndpointRoute::Models),
            ("/v1/chat/completions", EndpointRoute::ChatCompletions),
        ],
        EndpointProtocol::OpenaiResponses => &[
            ("/v1/models", EndpointRoute::Models),
            ("/v1/responses", EndpointRoute::Responses),
        ],
        // Auto serves both OpenAI shapes; the suffix picks the protocol
        // per-request.
        EndpointProtocol::OpenaiAuto => &[
            ("/v1/models", EndpointRoute::Models),
            ("/v1/chat/completions", EndpointRoute::ChatCompletions),
            ("/v1/responses", EndpointRoute::Responses),
        ],
    }
}

/// Resolve a raw request path against the current endpoint descriptors.
pub fn resolve_custom_path(config: &Config, raw_path: &str) -> Option<ResolvedCustomEndpoint> {
    let decoded = decode_path_segments(raw_path);

    for endpoint in &config.endpoints.custom {
        for path in &endpoint.paths {
            let prefix = path.path.trim_end_matches('/');

            for (suffix, route) in expansions(path.protocol) {
                if decoded != format!("{prefix}{suffix}") {
                    continue;
                }

                if !endpoint.enabled {
                    log::debug!("Custom endpoint '{}' matched but is disabled", endpoint.id);
                    return None;
                }

                return Some(ResolvedCustomEndpoint {
                    endpoint_id: endpoint.id.clone(),
                    route: *route,
                });
            }
        }
    }

    None
}

/// Percent-decode a path segment-wise, preserving the slashes themselves.
fn decode_path_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| match percent_decode_str(segment).decode_utf8() {
            Ok(decoded) => decoded,
            Err(_) => Cow::Borrowed(segment),
        })
        .collect::<Vec<_>>()
        .join("/")
}
