//! Provider body builder: normalized payload → Anthropic Messages.

use serde_json::{Map, Value, json};

use crate::payload::{NormalizedPayload, NormalizedRole};

/// Anthropic requires a token budget; used when the source body has none.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Build an Anthropic Messages body for the routed model.
pub fn to_anthropic_body(payload: &NormalizedPayload, model: &str) -> Value {
    let mut body = Map::new();

    body.insert("model".into(), json!(model));
    body.insert("stream".into(), json!(payload.stream));

    if let Some(system) = &payload.system {
        body.insert("system".into(), json!(system));
    }

    let mut messages = Vec::new();

    for message in &payload.messages {
        let mut blocks = Vec::new();

        if !message.text.is_empty() {
            blocks.push(json!({"type": "text", "text": message.text}));
        }

        for call in &message.tool_calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments.to_wire_value(),
            }));
        }

        for result in &message.tool_results {
            blocks.push(json!({
                "type": "tool_result",
                "tool_use_id": result.id,
                "content": [{"type": "text", "text": result.content_string()}],
            }));
        }

        // Empty turns are omitted rather than sent as empty text blocks.
        if blocks.is_empty() {
            continue;
        }

        let role = match message.role {
            NormalizedRole::User => "user",
            NormalizedRole::Assistant => "assistant",
        };

        messages.push(json!({"role": role, "content": blocks}));
    }

    body.insert("messages".into(), Value::Array(messages));

    if !payload.tools.is_empty() {
        // No `type` field: Anthropic treats an omitted tool type as `custom`.
        let tools: Vec<Value> = payload
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }

    let original = payload.original.as_object();

    body.insert(
        "max_tokens".into(),
        original
            .and_then(|o| o.get("max_tokens"))
            .cloned()
            .unwrap_or_else(|| json!(DEFAULT_MAX_TOKENS)),
    );

    for key in ["temperature", "top_p", "top_k", "stop_sequences", "metadata", "thinking"] {
        if let Some(value) = original.and_then(|o| o.get(key)) {
            body.insert(key.into(), value.clone());
        }
    }

    Value::Object(body)
}
