//! OpenAI Responses request decoding.

use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::payload::{
    NormalizedMessage, NormalizedPayload, NormalizedRole, ToolCall, ToolDescriptor, ToolResult, extract_parts,
    join_system, parse_arguments, parse_result_content, synthesize_call_id, truthy,
};

/// Decode an OpenAI Responses body into the normalized payload.
///
/// `input` is either a plain string (one user turn) or a sequence of typed
/// items: messages, function calls, and function call outputs.
pub fn normalize_openai_responses(body: &Value) -> GatewayResult<NormalizedPayload> {
    let Some(object) = body.as_object() else {
        return Err(GatewayError::InvalidRequest("request body must be a JSON object".into()));
    };

    let mut system_parts = Vec::new();

    if let Some(instructions) = object.get("instructions").and_then(Value::as_str)
        && !instructions.is_empty()
    {
        system_parts.push(instructions.to_string());
    }

    let mut messages = Vec::new();

    match object.get("input") {
        Some(Value::String(text)) => messages.push(NormalizedMessage {
            role: NormalizedRole::User,
            text: text.clone(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }),
        Some(Value::Array(items)) => {
            for item in items {
                decode_item(item, &mut system_parts, &mut messages);
            }
        }
        _ => {}
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

fn decode_item(item: &Value, system_parts: &mut Vec<String>, messages: &mut Vec<NormalizedMessage>) {
    // Items without a type but with a role are plain messages.
    let item_type = item
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(if item.get("role").is_some() { "message" } else { "" });

    match item_type {
        "message" => {
            let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
            let parts = extract_parts(item.get("content"));

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
                _ => messages.push(NormalizedMessage {
                    role: NormalizedRole::User,
                    text: parts.text,
                    tool_calls: Vec::new(),
                    tool_results: parts.tool_results,
                }),
            }
        }
        "function_call" => {
            let call = ToolCall {
                id: item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(synthesize_call_id),
                name: item.get("name").and_then(Value::as_str).unwrap_or("tool").to_string(),
                arguments: parse_arguments(item.get("arguments")),
            };

            messages.push(NormalizedMessage {
                role: NormalizedRole::Assistant,
                text: String::new(),
                tool_calls: vec![call],
                tool_results: Vec::new(),
            });
        }
        "function_call_output" => {
            let result = ToolResult {
                id: item
                    .get("call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: item.get("name").and_then(Value::as_str).map(str::to_string),
                content: parse_result_content(
                    item.get("output")
                        .or_else(|| item.get("result"))
                        .cloned()
                        .unwrap_or(Value::Null),
                ),
            };

            messages.push(NormalizedMessage {
                role: NormalizedRole::User,
                text: String::new(),
                tool_calls: Vec::new(),
                tool_results: vec![result],
            });
        }
        _ => {}
    }
}

fn decode_tools(tools: Option<&Value>) -> Vec<ToolDescriptor> {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return Vec::new();
    };

    // Responses tools are flat: {type: "function", name, description, parameters}.
    tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function").filter(|v| v.is_object()).unwrap_or(tool);
            let name = function.get("name").and_then(Value::as_str)?;

            Some(ToolDescriptor {
                name: name.to_string(),
                description: function
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_input_becomes_one_user_turn() {
        let payload = normalize_openai_responses(&json!({
            "model": "gpt-4o",
            "instructions": "Answer briefly.",
            "input": "What is SSE?",
        }))
        .unwrap();

        assert_eq!(payload.system.as_deref(), Some("Answer briefly."));
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].text, "What is SSE?");
    }

    #[test]
    fn typed_items_decode_calls_and_outputs() {
        let payload = normalize_openai_responses(&json!({
            "model": "gpt-4o",
            "input": [
                {"type": "message", "role": "user", "content": [
                    {"type": "input_text", "text": "look this up"},
                ]},
                {"type": "function_call", "call_id": "call_9", "name": "search", "arguments": "{\"q\":\"sse\"}"},
                {"type": "function_call_output", "call_id": "call_9", "output": "\"found it\""},
            ],
        }))
        .unwrap();

        assert_eq!(payload.messages.len(), 3);
        assert_eq!(payload.messages[1].role, NormalizedRole::Assistant);
        assert_eq!(payload.messages[1].tool_calls[0].id, "call_9");
        assert_eq!(payload.messages[2].tool_results[0].id, "call_9");
        assert_eq!(payload.messages[2].tool_results[0].content, json!("found it"));
    }

    #[test]
    fn reasoning_object_sets_thinking() {
        let payload = normalize_openai_responses(&json!({
            "model": "o3",
            "input": "think hard",
            "reasoning": {"effort": "high"},
        }))
        .unwrap();

        assert!(payload.thinking);
    }

    #[test]
    fn flat_responses_tools_are_decoded() {
        let payload = normalize_openai_responses(&json!({
            "model": "gpt-4o",
            "input": "hi",
            "tools": [{"type": "function", "name": "search", "parameters": {"type": "object"}}],
        }))
        .unwrap();

        assert_eq!(payload.tools[0].name, "search");
    }
}
