//! Rewrite direction: OpenAI Chat chunks → Anthropic Messages events.

use serde_json::{Value, json};

use crate::transform::{StreamTransformer, ToolBlockKey, emit_anthropic_event, map_finish_to_stop_reason};

pub(super) fn handle_event(t: &mut StreamTransformer, event: &Value, out: &mut Vec<u8>) {
    let Some(choice) = event.pointer("/choices/0") else {
        // Usage-only chunks contribute metadata, nothing on the wire.
        return;
    };

    let source_id = event.get("id").and_then(Value::as_str);
    t.anthropic_target.ensure_message_start(out, source_id, &t.model);

    let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

    // `reasoning_content` is merged into the primary text block.
    for key in ["content", "reasoning_content"] {
        let Some(text) = delta.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            continue;
        };

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

    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            handle_tool_call(t, call, out);
        }
    }

    // Legacy single function_call: synthesized tool call at OpenAI index 0.
    if let Some(function_call) = delta.get("function_call").filter(|v| v.is_object()) {
        handle_legacy_function_call(t, function_call, out);
    }

    if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
        t.anthropic_target.close_all_blocks(out);

        let stop_reason = map_finish_to_stop_reason(finish).to_string();
        let usage = t.usage;
        t.anthropic_target.emit_terminal(out, &stop_reason, &usage);
        t.finalized = true;
    }
}

fn handle_tool_call(t: &mut StreamTransformer, call: &Value, out: &mut Vec<u8>) {
    let key = ToolBlockKey::OpenaiIndex(call.get("index").and_then(Value::as_u64).unwrap_or(0));

    // First sighting carries the id and allocates a fresh block index.
    if t.anthropic_target.find_tool(&key).is_none() {
        let Some(id) = call.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            return;
        };

        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        t.anthropic_target.open_tool_block(out, key.clone(), id.to_string(), name);
    }

    emit_arguments_delta(t, &key, call.pointer("/function/arguments"), out);
}

fn handle_legacy_function_call(t: &mut StreamTransformer, function_call: &Value, out: &mut Vec<u8>) {
    let key = ToolBlockKey::OpenaiIndex(0);

    if t.anthropic_target.find_tool(&key).is_none() {
        let name = function_call
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = format!("call_{}", t.anthropic_target.tool_count() + 1);

        t.anthropic_target.open_tool_block(out, key.clone(), id, name);
    }

    emit_arguments_delta(t, &key, function_call.get("arguments"), out);
}

fn emit_arguments_delta(t: &mut StreamTransformer, key: &ToolBlockKey, arguments: Option<&Value>, out: &mut Vec<u8>) {
    let Some(partial) = arguments.and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return;
    };

    let Some(tool) = t.anthropic_target.find_tool(key) else {
        return;
    };

    emit_anthropic_event(
        out,
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": tool.index,
            "delta": {"type": "input_json_delta", "partial_json": partial},
        }),
    );
}
