//! Anthropic Messages request decoding.

use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::payload::{
    NormalizedMessage, NormalizedPayload, NormalizedRole, ToolDescriptor, extract_parts, join_system, truthy,
};

/// Decode an Anthropic Messages body into the normalized payload.
pub fn normalize_anthropic(body: &Value) -> GatewayResult<NormalizedPayload> {
    let Some(object) = body.as_object() else {
        return Err(GatewayError::InvalidRequest("request body must be a JSON object".into()));
    };

    let mut system_parts = Vec::new();

    // Top-level system comes first: a string, a block, or a block sequence.
    let top_system = extract_parts(object.get("system"));
    if !top_system.text.is_empty() {
        system_parts.push(top_system.text);
    }

    let mut messages = Vec::new();

    if let Some(raw_messages) = object.get("messages").and_then(Value::as_array) {
        for raw in raw_messages {
            let role = raw.get("role").and_then(Value::as_str).unwrap_or("user");
            let parts = extract_parts(raw.get("content"));

            match role {
                "system" | "developer" => {
                    if !parts.text.is_empty() {
                        system_parts.push(parts.text);
                    }
                }
                "assistant" => messages.push(NormalizedMessage {
                    role: NormalizedRole::Assistant,
                    text: parts.text,
                    tool_calls: parts.tool_calls,
                    tool_results: Vec::new(),
                }),
                // `tool` and anything unrecognized fold into a user turn.
                _ => messages.push(NormalizedMessage {
                    role: NormalizedRole::User,
                    text: parts.text,
                    tool_calls: Vec::new(),
                    tool_results: parts.tool_results,
                }),
            }
        }
    }

    Ok(NormalizedPayload {
        model: object.get("model").and_then(Value::as_str).map(str::to_string),
        system: join_system(system_parts),
        messages,
        tools: decode_tools(object.get("tools")),
        stream: truthy(object.get("stream")),
        thinking: truthy(object.get("thinking")) || truthy(object.get("reasoning")),
        original: body.clone(),
    })
}

fn decode_tools(tools: Option<&Value>) -> Vec<ToolDescriptor> {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?;

            Some(ToolDescriptor {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ToolArguments;
    use serde_json::json;

    #[test]
    fn hoists_system_and_folds_tool_results() {
        let payload = normalize_anthropic(&json!({
            "model": "claude-sonnet-4",
            "system": [{"type": "text", "text": "Be terse."}],
            "messages": [
                {"role": "user", "content": "Look it up"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "On it."},
                    {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "42"},
                ]},
                {"role": "developer", "content": "Prefer metric units."},
            ],
            "stream": true,
        }))
        .unwrap();

        assert_eq!(payload.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(payload.system.as_deref(), Some("Be terse.\n\nPrefer metric units."));
        assert!(payload.stream);
        assert!(!payload.thinking);

        assert_eq!(payload.messages.len(), 3);
        assert_eq!(payload.messages[1].role, NormalizedRole::Assistant);
        assert_eq!(payload.messages[1].text, "On it.");
        assert_eq!(payload.messages[1].tool_calls[0].id, "toolu_1");
        assert!(matches!(
            payload.messages[1].tool_calls[0].arguments,
            ToolArguments::Parsed(ref v) if v == &json!({"q": "x"})
        ));

        assert_eq!(payload.messages[2].role, NormalizedRole::User);
        assert_eq!(payload.messages[2].tool_results[0].id, "toolu_1");
        assert_eq!(payload.messages[2].tool_results[0].content, json!(42));
    }

    #[test]
    fn thinking_object_sets_the_reasoning_hint() {
        let payload = normalize_anthropic(&json!({
            "model": "claude-opus-4",
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "enabled", "budget_tokens": 2048},
        }))
        .unwrap();

        assert!(payload.thinking);
        assert!(!payload.stream);
    }

    #[test]
    fn tools_keep_their_schema_verbatim() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let payload = normalize_anthropic(&json!({
            "model": "m",
            "messages": [],
            "tools": [{"name": "search", "description": "find things", "input_schema": schema}],
        }))
        .unwrap();

        assert_eq!(payload.tools.len(), 1);
        assert_eq!(payload.tools[0].name, "search");
        assert_eq!(
            payload.tools[0].input_schema,
            json!({"type": "object", "properties": {"q": {"type": "string"}}})
        );
    }

    #[test]
    fn non_object_body_is_invalid() {
        let error = normalize_anthropic(&json!([1, 2])).unwrap_err();
        assert_eq!(error.code(), "invalid_request");
    }
}
