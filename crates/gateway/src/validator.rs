//! Strict-mode shape checking for Anthropic requests.
//!
//! Runs before normalization when the endpoint's validation mode is not
//! `off`. Rejections never reach an upstream; the pipeline answers 430 with
//! the failing check's code and records a sink event.

use http::{HeaderMap, Method, header};
use serde_json::Value;

use config::{ValidationConfig, ValidationMode};

/// A failed check: surfaced code, human message, and the JSON path at fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub code: &'static str,
    pub message: String,
    pub path: String,
}

impl ValidationFailure {
    fn new(code: &'static str, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: path.into(),
        }
    }
}

/// The request surface the validator inspects.
pub struct ValidationRequest<'a> {
    pub method: &'a Method,
    /// Raw query string without the leading `?`.
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: &'a Value,
}

/// Block types the Messages API accepts in message content.
const KNOWN_BLOCK_TYPES: &[&str] = &[
    "text",
    "image",
    "tool_use",
    "tool_result",
    "thinking",
    "redacted_thinking",
    "document",
];

const EXPERIMENTAL_PREFIXES: &[&str] = &["input_", "output_", "data_", "media_"];

/// Validate an Anthropic request against the configured mode.
pub fn validate_anthropic_request(
    config: &ValidationConfig,
    request: &ValidationRequest<'_>,
) -> Result<(), ValidationFailure> {
    if config.mode == ValidationMode::Off {
        return Ok(());
    }

    if request.method != Method::POST {
        return Err(ValidationFailure::new(
            "invalid_request",
            format!("method {} is not allowed, use POST", request.method),
            "",
        ));
    }

    check_query(request.query)?;
    check_headers(config, request.headers)?;

    let Some(body) = request.body.as_object() else {
        return Err(ValidationFailure::new("invalid_request", "request body must be a JSON object", ""));
    };

    if config.mode == ValidationMode::ClaudeCode {
        let user_id = body
            .get("metadata")
            .and_then(|m| m.get("user_id"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if user_id.is_empty() {
            return Err(ValidationFailure::new(
                "invalid_request",
                "metadata.user_id is required for Claude Code requests",
                "metadata.user_id",
            ));
        }
    }

    if body.get("model").and_then(Value::as_str).unwrap_or_default().is_empty() {
        return Err(ValidationFailure::new("invalid_request", "model must be a non-empty string", "model"));
    }

    let messages = body.get("messages").and_then(Value::as_array);
    let Some(messages) = messages.filter(|m| !m.is_empty()) else {
        return Err(ValidationFailure::new(
            "invalid_request",
            "messages must be a non-empty array",
            "messages",
        ));
    };

    for (i, message) in messages.iter().enumerate() {
        check_message(config, message, i)?;
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        for (i, tool) in tools.iter().enumerate() {
            if tool.get("name").and_then(Value::as_str).unwrap_or_default().is_empty() {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "tools require a non-empty name",
                    format!("tools[{i}].name"),
                ));
            }
        }
    }

    Ok(())
}

fn check_query(query: Option<&str>) -> Result<(), ValidationFailure> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return Ok(());
    };

    for pair in query.split('&') {
        let key = pair.split('=').next().unwrap_or(pair);
        if key != "beta" {
            return Err(ValidationFailure::new(
                "invalid_request",
                format!("unexpected query parameter '{key}'"),
                "",
            ));
        }
    }

    Ok(())
}

fn check_headers(config: &ValidationConfig, headers: &HeaderMap) -> Result<(), ValidationFailure> {
    if config.mode == ValidationMode::ClaudeCode {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !user_agent.contains("claude-cli/") && !user_agent.contains("Claude Code/") {
            return Err(ValidationFailure::new(
                "invalid_request",
                "this endpoint only accepts Claude Code clients",
                "",
            ));
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/json") {
        return Err(ValidationFailure::new(
            "invalid_request",
            "Content-Type must be application/json",
            "",
        ));
    }

    if !headers.contains_key("anthropic-version") {
        return Err(ValidationFailure::new(
            "invalid_request",
            "anthropic-version header is required",
            "",
        ));
    }

    Ok(())
}

fn check_message(config: &ValidationConfig, message: &Value, index: usize) -> Result<(), ValidationFailure> {
    let role = message.get("role").and_then(Value::as_str).unwrap_or_default();

    if role != "user" && role != "assistant" {
        return Err(ValidationFailure::new(
            "invalid_request",
            format!("message role must be 'user' or 'assistant', got '{role}'"),
            format!("messages[{index}].role"),
        ));
    }

    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        // String content has no block shapes to check.
        return Ok(());
    };

    for (block_index, block) in blocks.iter().enumerate() {
        let path = format!("messages[{index}].content[{block_index}]");
        check_block(config, role, block, &path)?;
    }

    Ok(())
}

fn check_block(config: &ValidationConfig, role: &str, block: &Value, path: &str) -> Result<(), ValidationFailure> {
    let block_type = block.get("type").and_then(Value::as_str).unwrap_or_default();

    if EXPERIMENTAL_PREFIXES.iter().any(|prefix| block_type.starts_with(prefix)) {
        let allowed = config.mode == ValidationMode::ClaudeCode || config.allow_experimental_blocks;
        if allowed {
            return Ok(());
        }
        return Err(ValidationFailure::new(
            "invalid_request",
            format!("experimental block type '{block_type}' is not allowed"),
            format!("{path}.type"),
        ));
    }

    if !KNOWN_BLOCK_TYPES.contains(&block_type) {
        return Err(ValidationFailure::new(
            "invalid_request",
            format!("unknown content block type '{block_type}'"),
            format!("{path}.type"),
        ));
    }

    match block_type {
        "tool_use" => {
            if role == "user" {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "user messages cannot contain tool_use blocks",
                    path.to_string(),
                ));
            }
            if !block.get("id").is_some_and(Value::is_string) {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "tool_use blocks require a string id",
                    format!("{path}.id"),
                ));
            }
            if !block.get("name").is_some_and(Value::is_string) {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "tool_use blocks require a string name",
                    format!("{path}.name"),
                ));
            }
            if block.get("input").is_none_or(Value::is_null) {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "tool_use blocks require a non-null input",
                    format!("{path}.input"),
                ));
            }
        }
        "tool_result" => {
            if role == "assistant" {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "assistant messages cannot contain tool_result blocks",
                    path.to_string(),
                ));
            }
            if block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .is_empty()
            {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "tool_result blocks require a non-empty tool_use_id",
                    format!("{path}.tool_use_id"),
                ));
            }
            let has_content = ["content", "text", "output", "result"]
                .iter()
                .any(|key| block.get(*key).is_some());
            if !has_content {
                return Err(ValidationFailure::new(
                    "invalid_request",
                    "tool_result blocks require a content field",
                    format!("{path}.content"),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}
