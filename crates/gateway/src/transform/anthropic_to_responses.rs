//! Rewrite direction: Anthropic Messages events → OpenAI Responses events.

use serde_json::{Map, Value, json};

use crate::transform::{StreamTransformer, emit_data_event, map_stop_reason_to_status};

pub(super) fn handle_event(t: &mut StreamTransformer, event: &Value, out: &mut Vec<u8>) {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        "message_start" => {
            let message_id = event.pointer("/message/id").and_then(Value::as_str);

            let (response_id, output_id) = match message_id {
                Some(id) => (id.replace("msg_", "resp_"), id.replace("msg_", "item_")),
                None => {
                    let suffix = uuid::Uuid::new_v4().simple().to_string();
                    (format!("resp_{suffix}"), format!("item_{suffix}"))
                }
            };

            emit_data_event(
                out,
                &json!({
                    "type": "response.created",
                    "response": {
                        "id": response_id,
                        "object": "response",
                        "model": t.model,
                        "status": "in_progress",
                    },
                }),
            );

            t.responses_target.response_id = Some(response_id);
            t.responses_target.output_id = Some(output_id);
            t.responses_target.created_sent = true;
        }
        "content_block_start" => {
            let index = event.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let block = event
                .get("content_block")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let block_type = block.get("type").and_then(Value::as_str).unwrap_or("text").to_string();
            let item_type = if block_type == "text" { "output_text" } else { &block_type };

            let mut item = Map::new();
            item.insert("id".into(), json!(t.output_id()));
            item.insert("type".into(), json!(item_type));
            if block_type == "tool_use" {
                if let Some(id) = block.get("id") {
                    item.insert("call_id".into(), id.clone());
                }
                if let Some(name) = block.get("name") {
                    item.insert("name".into(), name.clone());
                }
            }

            emit_data_event(
                out,
                &json!({
                    "type": "response.output_item.added",
                    "index": index,
                    "item": Value::Object(item),
                }),
            );

            t.responses_target.record_block(index, block, block_type == "tool_use");
        }
        "content_block_delta" => {
            let index = event.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;

            match event.pointer("/delta/type").and_then(Value::as_str) {
                Some("text_delta") => {
                    let text = event.pointer("/delta/text").and_then(Value::as_str).unwrap_or_default();

                    t.responses_target.accumulated_text.push_str(text);
                    if let Some(entry) = t.responses_target.block_at(index)
                        && let Some(Value::String(existing)) = entry.block.get_mut("text")
                    {
                        existing.push_str(text);
                    }

                    emit_data_event(
                        out,
                        &json!({
                            "type": "response.output_item.content_part.delta",
                            "index": index,
                            "delta": {"type": "text_delta", "text": text},
                        }),
                    );
                }
                Some("input_json_delta") => {
                    let partial = event
                        .pointer("/delta/partial_json")
                        .and_then(Value::as_str)
                        .unwrap_or_default();

                    if let Some(entry) = t.responses_target.block_at(index)
                        && let Some(accum) = entry.input_json_accum.as_mut()
                    {
                        accum.push_str(partial);
                    }

                    emit_data_event(
                        out,
                        &json!({
                            "type": "response.output_item.content_part.delta",
                            "index": index,
                            "delta": {"type": "input_json_delta", "partial_json": partial},
                        }),
                    );
                }
                _ => {}
            }
        }
        // Usage was captured from the untranslated event.
        "message_delta" => {}
        "message_stop" => {
            let stop_reason = t.stop_reason.clone().unwrap_or_else(|| "end_turn".to_string());
            let usage = t.usage;

            let mut usage_json = json!({
                "input_tokens": usage.input,
                "output_tokens": usage.output,
                "total_tokens": usage.input + usage.output,
                "prompt_tokens": usage.input,
                "completion_tokens": usage.output,
            });
            let cached = usage.cache_read + usage.cache_creation;
            if cached > 0 && let Some(object) = usage_json.as_object_mut() {
                object.insert("cached_tokens".into(), json!(cached));
            }

            let final_blocks = t.responses_target.final_blocks();
            let response_id = t.response_id();
            let output_id = t.output_id();

            let mut completed = json!({
                "type": "response.completed",
                "status": map_stop_reason_to_status(&stop_reason),
                "status_code": 200,
                "stop_reason": stop_reason,
                "usage": usage_json,
                "response": {
                    "id": response_id,
                    "type": "message",
                    "role": "assistant",
                    "content": final_blocks.clone(),
                },
                "output": [{
                    "id": output_id,
                    "type": "output_message",
                    "role": "assistant",
                    "content": final_blocks,
                }],
            });

            if !t.responses_target.accumulated_text.is_empty()
                && let Some(object) = completed.as_object_mut()
            {
                object.insert("output_text".into(), json!(t.responses_target.accumulated_text));
            }

            emit_data_event(out, &completed);
            t.finalized = true;
        }
        // Vendor events (ping, error) have no responses equivalent.
        _ => {}
    }
}

impl StreamTransformer {
    fn response_id(&mut self) -> String {
        self.responses_target
            .response_id
            .get_or_insert_with(|| format!("resp_{}", uuid::Uuid::new_v4().simple()))
            .clone()
    }

    fn output_id(&mut self) -> String {
        self.responses_target
            .output_id
            .get_or_insert_with(|| format!("item_{}", uuid::Uuid::new_v4().simple()))
            .clone()
    }
}
