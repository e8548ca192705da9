//! OpenAI Chat Completions request decoding.

use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::payload::{
    NormalizedMessage, NormalizedPayload, NormalizedRole, ToolDescriptor, ToolResult, extract_parts, join_system,
    parse_arguments, parse_result_content, synthesize_call_id, tool_call_from_block, truthy,
};

/// Decode an OpenAI Chat Completions body into the normalized payload.
pub fn normalize_openai_chat(body: &Value) -> GatewayResult<NormalizedPayload> {
    let Some(object) = body.as_object() else {
        return Err(GatewayError::InvalidRequest("request body must be a JSON object".into()));
    };

    let mut system_parts = Vec::new();
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
                "assistant" => {
                    let mut tool_calls = parts.tool_calls;

                    // Chat puts tool calls on the message, not in content.
                    if let Some(raw_calls) = raw.get("tool_calls").and_then(Value::as_array) {
                        tool_calls.extend(raw_calls.iter().map(tool_call_from_block));
                    }

                    // Legacy single function_call field.
                    if let Some(function_call) = raw.get("function_call").filter(|v| v.is_object()) {
                        tool_calls.push(crate::payload::ToolCall {
                            id: synthesize_call_id(),
                            name: function_call
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("tool")
                                .to_string(),
                            arguments: parse_arguments(function_call.get("arguments")),
                        });
                    }

                    messages.push(NormalizedMessage {
                        role: NormalizedRole::Assistant,
                        text: parts.text,
                        tool_calls,
                        tool_results: Vec::new(),
                    });
                }
                "tool" => {
                    let result = ToolResult {
                        id: raw
                            .get("tool_call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: raw.get("name").and_then(Value::as_str).map(str::to_string),
                        content: parse_result_content(raw.get("content").cloned().unwrap_or(Value::Null)),
                    };

                    messages.push(NormalizedMessage {
                        role: NormalizedRole::User,
                        text: String::new(),
                        tool_calls: Vec::new(),
                        tool_results: vec![result],
                    });
                }
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
            // Chat nests the definition under `function`; tolerate flat too.
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
                    .or_else(|| function.get("input_schema"))
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            })
        })
        .collect()
}
