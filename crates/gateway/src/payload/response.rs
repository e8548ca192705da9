//! Non-streaming response conversion between wire families.
//!
//! Same-family responses pass through the pipeline untouched; these
//! converters only run when the provider's family differs from the client's
//! declared protocol.

use serde_json::{Map, Value, json};

use crate::transform::{map_finish_to_stop_reason, map_stop_reason_to_finish, map_stop_reason_to_status};

/// Anthropic Messages response → OpenAI Chat Completions response.
pub fn anthropic_to_openai(body: &Value, model: &str) -> Value {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .map(|id| id.replace("msg_", "chatcmpl_"))
        .unwrap_or_else(|| format!("chatcmpl_{}", uuid::Uuid::new_v4().simple()));

    let blocks = body.get("content").and_then(Value::as_array);

    let text = collect_text(blocks, "text");
    let tool_calls: Vec<Value> = blocks
        .into_iter()
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .map(|block| {
            json!({
                "id": block.get("id").cloned().unwrap_or(Value::Null),
                "type": "function",
                "function": {
                    "name": block.get("name").cloned().unwrap_or(Value::Null),
                    "arguments": block
                        .get("input")
                        .map(|input| input.to_string())
                        .unwrap_or_else(|| "{}".to_string()),
                },
            })
        })
        .collect();

    let mut message = Map::new();
    message.insert("role".into(), json!("assistant"));
    message.insert(
        "content".into(),
        if text.is_empty() && !tool_calls.is_empty() {
            Value::Null
        } else {
            json!(text)
        },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".into(), Value::Array(tool_calls));
    }

    let stop_reason = body.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");

    let usage = body.get("usage").cloned().unwrap_or_else(|| json!({}));
    let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);

    json!({
        "id": id,
        "object": "chat.completion",
        "created": 0,
        "model": model,
        "choices": [{
            "index": 0,
            "message": Value::Object(message),
            "finish_reason": map_stop_reason_to_finish(stop_reason),
        }],
        "usage": {
            "prompt_tokens": input,
            "completion_tokens": output,
            "total_tokens": input + output,
        },
    })
}

/// OpenAI Chat Completions response → Anthropic Messages response.
pub fn openai_to_anthropic(body: &Value, model: &str) -> Value {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .map(|id| id.replace("chatcmpl_", "msg_"))
        .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple()));

    let message = body.pointer("/choices/0/message");

    let mut content = Vec::new();

    if let Some(text) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        content.push(json!({"type": "text", "text": text}));
    }

    for call in message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let arguments = call.pointer("/function/arguments").and_then(Value::as_str).unwrap_or("{}");
        let input: Value = serde_json::from_str(arguments).unwrap_or_else(|_| json!({}));

        content.push(json!({
            "type": "tool_use",
            "id": call.get("id").cloned().unwrap_or(Value::Null),
            "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
            "input": input,
        }));
    }

    let finish = body
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop");

    let usage = body.get("usage").cloned().unwrap_or_else(|| json!({}));
    let input = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cached = usage
        .pointer("/prompt_tokens_details/cached_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": map_finish_to_stop_reason(finish),
        "stop_sequence": null,
        "usage": {
            "input_tokens": input,
            "output_tokens": output,
            "cache_read_input_tokens": cached,
            "cache_creation_input_tokens": 0,
        },
    })
}

/// Anthropic Messages response → OpenAI Responses response.
pub fn anthropic_to_responses(body: &Value, model: &str) -> Value {
    let (response_id, item_id) = match body.get("id").and_then(Value::as_str) {
        Some(id) => (id.replace("msg_", "resp_"), id.replace("msg_", "item_")),
        None => {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            (format!("resp_{suffix}"), format!("item_{suffix}"))
        }
    };

    let blocks = body.get("content").and_then(Value::as_array);
    let text = collect_text(blocks, "text");

    let mut output = Vec::new();
    let mut message_content = Vec::new();

    for block in blocks.into_iter().flatten() {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text") {
                    message_content.push(json!({"type": "output_text", "text": text}));
                }
            }
            Some("tool_use") => output.push(json!({
                "id": item_id.as_str(),
                "type": "function_call",
                "call_id": block.get("id").cloned().unwrap_or(Value::Null),
                "name": block.get("name").cloned().unwrap_or(Value::Null),
                "arguments": block
                    .get("input")
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            })),
            _ => {}
        }
    }

    if !message_content.is_empty() {
        output.insert(
            0,
            json!({
                "id": item_id.as_str(),
                "type": "message",
                "role": "assistant",
                "content": message_content,
            }),
        );
    }

    let stop_reason = body.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn");

    let usage = body.get("usage").cloned().unwrap_or_else(|| json!({}));
    let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);

    json!({
        "id": response_id,
        "object": "response",
        "model": model,
        "status": map_stop_reason_to_status(stop_reason),
        "output": output,
        "output_text": text,
        "usage": {
            "input_tokens": input,
            "output_tokens": output_tokens,
            "total_tokens": input + output_tokens,
        },
    })
}

fn collect_text(blocks: Option<&Vec<Value>>, block_type: &str) -> String {
    blocks
        .into_iter()
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some(block_type))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect()
}
