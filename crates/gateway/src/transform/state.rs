//! Per-stream mutable state for the rewrite directions.

use serde_json::{Map, Value, json};

use crate::transform::{Usage, emit_anthropic_event};

/// Bookkeeping for streams that emit Anthropic framing (openai-chat → and
/// openai-responses → directions share it).
#[derive(Debug, Default)]
pub(crate) struct AnthropicTargetState {
    pub message_start_sent: bool,
    pub text_block_open: bool,
    /// Highest allocated content-block index. Text owns index 0; tool blocks
    /// allocate upward from 1.
    next_block_index: u32,
    /// Opened tool blocks in registration order.
    tools: Vec<ToolBlock>,
}

#[derive(Debug)]
pub(crate) struct ToolBlock {
    pub key: ToolBlockKey,
    pub index: u32,
    pub id: String,
    pub name: String,
}

/// How the source stream identifies a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ToolBlockKey {
    /// OpenAI Chat `tool_calls[i].index`.
    OpenaiIndex(u64),
    /// OpenAI Responses output item id.
    ItemId(String),
}

impl AnthropicTargetState {
    /// Emit `message_start` once. The message id derives from the source
    /// event id when one exists.
    pub fn ensure_message_start(&mut self, out: &mut Vec<u8>, source_id: Option<&str>, model: &str) {
        if self.message_start_sent {
            return;
        }
        self.message_start_sent = true;

        let id = match source_id {
            Some(id) => id
                .replace("chatcmpl_", "msg_")
                .replace("resp_", "msg_"),
            None => format!("msg_{}", uuid::Uuid::new_v4().simple()),
        };

        emit_anthropic_event(
            out,
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": id,
                    "type": "message",
                    "model": model,
                    "role": "assistant",
                    "content": [],
                    "stop_reason": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        );
    }

    /// Open the text block (index 0) once.
    pub fn ensure_text_block(&mut self, out: &mut Vec<u8>) {
        if self.text_block_open {
            return;
        }
        self.text_block_open = true;

        emit_anthropic_event(
            out,
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""},
            }),
        );
    }

    /// Allocate and announce a tool block. Returns its content-block index.
    pub fn open_tool_block(&mut self, out: &mut Vec<u8>, key: ToolBlockKey, id: String, name: String) -> u32 {
        self.next_block_index += 1;
        let index = self.next_block_index;

        emit_anthropic_event(
            out,
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": id, "name": name},
            }),
        );

        self.tools.push(ToolBlock { key, index, id, name });
        index
    }

    pub fn find_tool(&self, key: &ToolBlockKey) -> Option<&ToolBlock> {
        self.tools.iter().find(|tool| &tool.key == key)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// The most recently opened tool block, for argument deltas that carry
    /// no correlation key.
    pub fn last_tool(&self) -> Option<&ToolBlock> {
        self.tools.last()
    }

    /// Close every open block: text first, then tools in registration order.
    pub fn close_all_blocks(&mut self, out: &mut Vec<u8>) {
        if self.text_block_open {
            self.text_block_open = false;
            emit_anthropic_event(
                out,
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": 0}),
            );
        }

        for tool in self.tools.drain(..) {
            emit_anthropic_event(
                out,
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": tool.index}),
            );
        }
    }

    /// Emit the terminal `message_delta` + `message_stop` pair.
    pub fn emit_terminal(&mut self, out: &mut Vec<u8>, stop_reason: &str, usage: &Usage) {
        emit_anthropic_event(
            out,
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {
                    "input_tokens": usage.input,
                    "output_tokens": usage.output,
                    "cache_read_input_tokens": usage.cache_read,
                    "cache_creation_input_tokens": usage.cache_creation,
                },
            }),
        );
        emit_anthropic_event(out, "message_stop", &json!({"type": "message_stop"}));
    }
}

/// State for the anthropic → openai-responses direction.
#[derive(Debug, Default)]
pub(crate) struct ResponsesTargetState {
    pub response_id: Option<String>,
    pub output_id: Option<String>,
    pub created_sent: bool,
    pub accumulated_text: String,
    /// Content blocks recorded at `content_block_start`, indexed by the
    /// Anthropic block index.
    pub blocks: Vec<ResponsesBlockEntry>,
}

/// One recorded content block plus its argument accumulator.
#[derive(Debug)]
pub(crate) struct ResponsesBlockEntry {
    pub block: Map<String, Value>,
    pub input_json_accum: Option<String>,
}

impl ResponsesTargetState {
    pub fn block_at(&mut self, index: usize) -> Option<&mut ResponsesBlockEntry> {
        self.blocks.get_mut(index)
    }

    /// Record a block at the Anthropic block index, padding any gaps.
    pub fn record_block(&mut self, index: usize, block: Map<String, Value>, is_tool: bool) {
        let entry = ResponsesBlockEntry {
            block,
            input_json_accum: is_tool.then(String::new),
        };

        if index < self.blocks.len() {
            self.blocks[index] = entry;
        } else {
            while self.blocks.len() < index {
                self.blocks.push(ResponsesBlockEntry {
                    block: Map::new(),
                    input_json_accum: None,
                });
            }
            self.blocks.push(entry);
        }
    }

    /// Final content blocks: tool blocks get their accumulated arguments
    /// parsed into `input` (falling back to `{}`), accumulators dropped.
    pub fn final_blocks(&mut self) -> Vec<Value> {
        self.blocks
            .drain(..)
            .map(|entry| {
                let mut block = entry.block;
                if let Some(accum) = entry.input_json_accum {
                    let input = serde_json::from_str(&accum).unwrap_or_else(|_| json!({}));
                    block.insert("input".into(), input);
                }
                Value::Object(block)
            })
            .collect()
    }
}
