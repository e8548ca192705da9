//! Rewrite direction: OpenAI Responses events → Anthropic Messages events.

use serde_json::{Value, json};

use crate::transform::{StreamTransformer, ToolBlockKey, emit_anthropic_event};

pub(super) fn handle_event(t: &mut StreamTransformer, event: &Value, out: &mut Vec<u8>) {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    // Anthropic framing opens on the first event, whatever it is.
    let source_id = event
        .pointer("/response/id")
        .or_else(|| event.get("id"))
        .and_then(Value::as_str);
    t.anthropic_target.ensure_message_start(out, source_id, &t.model);

    match event_type {
        "response.created" => {}
        "response.output_item.added" => {
            let item = event.get("item").cloned().unwrap_or(Value::Null);
            let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();

            if matches!(item_type, "function_call" | "tool_use") {
                let call_id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let key = ToolBlockKey::ItemId(
                    item.get("id")
                        .and_then(Value::as_str)
                        .unwrap_or(&call_id)
                        .to_string(),
                );

                if t.anthropic_target.find_tool(&key).is_none() {
                    let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    t.anthropic_target.open_tool_block(out, key, call_id, name);
                }
            }
        }
        "response.output_text.delta" | "response.content_part.delta" | "response.output_item.content_part.delta" => {
            // The delta is either a bare string or a typed object.
            match event.get("delta") {
                Some(Value::String(text)) => emit_text_delta(t, text, out),
                Some(delta @ Value::Object(_)) => match delta.get("type").and_then(Value::as_str) {
                    Some("input_json_delta") => {
                        let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
                        emit_tool_delta(t, event, partial, out);
                    }
                    _ => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            emit_text_delta(t, text, out);
                        }
                    }
                },
                _ => {}
            }
        }
        "response.function_call_arguments.delta" => {
            let partial = event.get("delta").and_then(Value::as_str).unwrap_or_default();
            emit_tool_delta(t, event, partial, out);
        }
        "response.completed" | "response.done" => {
            t.anthropic_target.close_all_blocks(out);

            let stop_reason = t
                .stop_reason
                .clone()
                .or_else(|| {
                    event
                        .get("status")
                        .or_else(|| event.pointer("/response/status"))
                        .and_then(Value::as_str)
                        .map(|status| map_status_to_stop_reason(status).to_string())
                })
                .unwrap_or_else(|| "end_turn".to_string());

            let usage = t.usage;
            t.anthropic_target.emit_terminal(out, &stop_reason, &usage);
            t.finalized = true;
        }
        _ => {}
    }
}

fn emit_text_delta(t: &mut StreamTransformer, text: &str, out: &mut Vec<u8>) {
    if text.is_empty() {
        return;
    }

    t.anthropic_target.ensure_text_block(out);
    emit_anthropic_event(
        out,
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text},
        }),
    );
}

fn emit_tool_delta(t: &mut StreamTransformer, event: &Value, partial: &str, out: &mut Vec<u8>) {
    if partial.is_empty() {
        return;
    }

    // Correlate by item id when present; otherwise the most recent tool.
    let index = event
        .get("item_id")
        .and_then(Value::as_str)
        .and_then(|id| t.anthropic_target.find_tool(&ToolBlockKey::ItemId(id.to_string())))
        .or_else(|| t.anthropic_target.last_tool())
        .map(|tool| tool.index);

    let Some(index) = index else {
        return;
    };

    emit_anthropic_event(
        out,
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "input_json_delta", "partial_json": partial},
        }),
    );
}

/// Responses terminal status → Anthropic stop reason.
fn map_status_to_stop_reason(status: &str) -> &str {
    match status {
        "requires_action" => "tool_use",
        "incomplete" => "max_tokens",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use crate::transform::{StreamFormat, StreamTransformer, Usage};
    use serde_json::Value;

    fn run(input: &str) -> (StreamTransformer, Vec<(String, Value)>) {
        let mut t = StreamTransformer::new(StreamFormat::OpenaiResponses, StreamFormat::Anthropic, "claude-sonnet-4");
        let result = t.transform(input.as_bytes());
        let out = String::from_utf8(result.out).unwrap();

        let mut events = Vec::new();
        let mut current_event = String::new();
        for line in out.lines() {
            if let Some(name) = line.strip_prefix("event: ") {
                current_event = name.to_string();
            } else if let Some(data) = line.strip_prefix("data: ") {
                events.push((current_event.clone(), serde_json::from_str(data).unwrap()));
            }
        }

        (t, events)
    }

    #[test]
    fn text_stream_produces_valid_anthropic_framing() {
        let (t, events) = run(concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\",\"status\":\"in_progress\"}}\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"status\":\"completed\",\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}}\n",
        ));

        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        assert_eq!(events[0].1["message"]["id"], "msg_1");
        assert_eq!(events[2].1["delta"]["text"], "Hi");
        assert_eq!(events[4].1["delta"]["stop_reason"], "end_turn");
        assert_eq!(
            t.final_usage(),
            Usage {
                input: 3,
                output: 1,
                cache_read: 0,
                cache_creation: 0
            }
        );
    }

    #[test]
    fn function_call_items_become_tool_use_blocks() {
        let (_, events) = run(concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_2\"}}\n",
            "data: {\"type\":\"response.output_item.added\",\"output_index\":0,\"item\":{\"id\":\"fc_1\",\"type\":\"function_call\",\"call_id\":\"call_7\",\"name\":\"search\"}}\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"item_id\":\"fc_1\",\"delta\":\"{\\\"q\\\":\\\"x\\\"}\"}\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"status\":\"requires_action\"}}\n",
        ));

        let (_, start) = events.iter().find(|(n, _)| n == "content_block_start").unwrap();
        assert_eq!(start["index"], 1);
        assert_eq!(start["content_block"]["type"], "tool_use");
        assert_eq!(start["content_block"]["id"], "call_7");
        assert_eq!(start["content_block"]["name"], "search");

        let (_, delta) = events.iter().find(|(n, _)| n == "content_block_delta").unwrap();
        assert_eq!(delta["delta"]["partial_json"], "{\"q\":\"x\"}");

        let (_, message_delta) = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn done_after_completed_emits_nothing_extra() {
        let (t, events) = run(concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_3\"}}\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"status\":\"completed\"}}\n",
            "data: [DONE]\n",
            "\n",
        ));

        let stops = events.iter().filter(|(n, _)| n == "message_stop").count();
        assert_eq!(stops, 1);
        assert!(t.is_finalized());
    }
}
