//! Provider body builder: normalized payload → OpenAI Chat Completions.

use serde_json::{Map, Value, json};

use crate::payload::{NormalizedPayload, NormalizedRole};

/// Request keys copied verbatim from the source body when present.
const PASS_THROUGH_KEYS: &[&str] = &[
    "response_format",
    "parallel_tool_calls",
    "frequency_penalty",
    "presence_penalty",
    "logit_bias",
    "top_p",
    "top_k",
    "stop",
    "stop_sequences",
    "user",
    "seed",
    "n",
    "options",
];

/// Build an OpenAI Chat Completions body for the routed model.
///
/// `supports_metadata` reflects the target provider's feature table; `metadata`
/// is dropped for providers that reject unknown fields.
pub fn to_openai_chat_body(payload: &NormalizedPayload, model: &str, supports_metadata: bool) -> Value {
    let mut body = Map::new();

    body.insert("model".into(), json!(model));
    body.insert("stream".into(), json!(payload.stream));

    let mut messages = Vec::new();

    if let Some(system) = &payload.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in &payload.messages {
        match message.role {
            NormalizedRole::User => {
                // Tool results become one `tool` message per result; any text
                // rides along in a separate user message.
                for result in &message.tool_results {
                    let mut tool_message = Map::new();
                    tool_message.insert("role".into(), json!("tool"));
                    tool_message.insert("tool_call_id".into(), json!(result.id));
                    if let Some(name) = &result.name {
                        tool_message.insert("name".into(), json!(name));
                    }
                    tool_message.insert("content".into(), json!(result.content_string()));
                    messages.push(Value::Object(tool_message));
                }

                if !message.text.is_empty() || message.tool_results.is_empty() {
                    messages.push(json!({"role": "user", "content": message.text}));
                }
            }
            NormalizedRole::Assistant => {
                let mut assistant = Map::new();
                assistant.insert("role".into(), json!("assistant"));

                if message.tool_calls.is_empty() || !message.text.is_empty() {
                    assistant.insert("content".into(), json!(message.text));
                } else {
                    assistant.insert("content".into(), Value::Null);
                }

                if !message.tool_calls.is_empty() {
                    let calls: Vec<Value> = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_wire_string(),
                                },
                            })
                        })
                        .collect();
                    assistant.insert("tool_calls".into(), Value::Array(calls));
                }

                messages.push(Value::Object(assistant));
            }
        }
    }

    body.insert("messages".into(), Value::Array(messages));

    if !payload.tools.is_empty() {
        let tools: Vec<Value> = payload
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    },
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }

    let original = payload.original.as_object();

    if let Some(max_tokens) = original.and_then(|o| o.get("max_tokens")) {
        // Reasoning models take the budget through max_completion_tokens.
        let key = if payload.thinking { "max_completion_tokens" } else { "max_tokens" };
        body.insert(key.into(), max_tokens.clone());
    }

    for key in ["temperature", "tool_choice"] {
        if let Some(value) = original.and_then(|o| o.get(key)) {
            body.insert(key.into(), value.clone());
        }
    }

    for key in PASS_THROUGH_KEYS {
        if let Some(value) = original.and_then(|o| o.get(*key)) {
            body.insert((*key).into(), value.clone());
        }
    }

    if supports_metadata && let Some(metadata) = original.and_then(|o| o.get("metadata")) {
        body.insert("metadata".into(), metadata.clone());
    }

    Value::Object(body)
}
