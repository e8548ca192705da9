//! Rewrite direction: Anthropic Messages events → OpenAI Chat chunks.

use serde_json::{Value, json};

use crate::transform::{CurrentTool, StreamTransformer, emit_data_event, map_stop_reason_to_finish};

pub(super) fn handle_event(t: &mut StreamTransformer, event: &Value, out: &mut Vec<u8>) {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        "message_start" => {
            // Nothing is emitted; the message id seeds the chunk ids.
            if let Some(id) = event.pointer("/message/id").and_then(Value::as_str) {
                t.chunk_id = Some(id.replace("msg_", "chatcmpl_"));
            }
        }
        "content_block_start" => {
            if event.pointer("/content_block/type").and_then(Value::as_str) == Some("tool_use") {
                // Each tool block gets its own OpenAI tool-call index, so
                // parallel calls never collapse onto one entry.
                let index = t.tool_call_count;
                t.tool_call_count += 1;

                t.current_tool = Some(CurrentTool {
                    id: event
                        .pointer("/content_block/id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: event
                        .pointer("/content_block/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    index,
                });
            }
        }
        "content_block_delta" => match event.pointer("/delta/type").and_then(Value::as_str) {
            Some("text_delta") => {
                let text = event.pointer("/delta/text").and_then(Value::as_str).unwrap_or_default();
                emit_chunk(t, out, json!({"content": text}), None);
            }
            Some("input_json_delta") => {
                if let Some(tool) = t.current_tool.clone() {
                    let partial = event
                        .pointer("/delta/partial_json")
                        .and_then(Value::as_str)
                        .unwrap_or_default();

                    emit_chunk(
                        t,
                        out,
                        json!({
                            "tool_calls": [{
                                "index": tool.index,
                                "id": tool.id,
                                "type": "function",
                                "function": {"name": tool.name, "arguments": partial},
                            }],
                        }),
                        None,
                    );
                }
            }
            _ => {}
        },
        "content_block_stop" => {
            t.current_tool = None;
        }
        // Usage was captured from the untranslated event.
        "message_delta" => {}
        "message_stop" => {
            let finish = t
                .stop_reason
                .as_deref()
                .map(map_stop_reason_to_finish)
                .unwrap_or("stop")
                .to_string();

            emit_chunk(t, out, json!({}), Some(&finish));
            t.finalized = true;
        }
        // Vendor events (ping, error) have no chat equivalent.
        _ => {}
    }
}

fn emit_chunk(t: &mut StreamTransformer, out: &mut Vec<u8>, delta: Value, finish_reason: Option<&str>) {
    let id = t
        .chunk_id
        .get_or_insert_with(|| format!("chatcmpl_{}", uuid::Uuid::new_v4().simple()))
        .clone();

    emit_data_event(
        out,
        &json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": 0,
            "model": t.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        }),
    );
}
