//! The streaming transformer.
//!
//! A stateful SSE rewriter created once per streaming response. Upstream
//! bytes go in, client-format bytes come out, and token usage, TTFT, and the
//! stop reason are extracted along the way. When source and target formats
//! agree the transformer still frames every line for metadata but echoes the
//! original bytes unchanged.

use serde_json::Value;

mod anthropic_to_openai;
mod anthropic_to_responses;
mod openai_to_anthropic;
mod responses_to_anthropic;
mod state;

pub(crate) use state::{AnthropicTargetState, ResponsesTargetState, ToolBlockKey};

/// One of the three supported SSE dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Anthropic,
    OpenaiChat,
    OpenaiResponses,
}

impl StreamFormat {
    fn is_openai_family(self) -> bool {
        matches!(self, StreamFormat::OpenaiChat | StreamFormat::OpenaiResponses)
    }
}

/// Accumulated token usage. Later upstream reports overwrite earlier ones
/// field by field; nothing is summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

impl Usage {
    /// Merge a wire `usage` object into the accumulator, accepting every
    /// supported field-name variant.
    pub(crate) fn merge_from(&mut self, usage: &Value) -> bool {
        let mut any = false;

        if let Some(v) = read_u64(usage, &["input_tokens", "prompt_tokens"]) {
            self.input = v;
            any = true;
        }
        if let Some(v) = read_u64(usage, &["output_tokens", "completion_tokens"]) {
            self.output = v;
            any = true;
        }
        if let Some(v) = read_u64(usage, &["cache_read_input_tokens", "cached_tokens"]).or_else(|| {
            usage
                .pointer("/prompt_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
        }) {
            self.cache_read = v;
            any = true;
        }
        if let Some(v) = read_u64(usage, &["cache_creation_input_tokens"]) {
            self.cache_creation = v;
            any = true;
        }

        any
    }
}

fn read_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| value.get(key).and_then(Value::as_u64))
}

/// Per-chunk transformation result.
#[derive(Debug, Default)]
pub struct Transformed {
    /// Bytes to relay to the client.
    pub out: Vec<u8>,

    /// True when this chunk carried the stream's first model content.
    pub ttft: bool,

    /// Usage snapshot, present when this chunk updated it.
    pub usage: Option<Usage>,

    /// Stop reason, present when this chunk surfaced it.
    pub stop_reason: Option<String>,
}

/// A classified SSE line. Classification happens once; translation and
/// metadata extraction both match on this.
enum SseLine<'a> {
    Empty,
    Event,
    Done,
    Data(Value),
    /// `id:`, `retry:`, comments, or undecodable data lines.
    Other(&'a [u8]),
}

fn classify(line: &[u8]) -> SseLine<'_> {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if line.starts_with(b"event:") {
        return SseLine::Event;
    }

    if let Some(rest) = line.strip_prefix(b"data:") {
        let payload = rest.strip_prefix(b" ").unwrap_or(rest);

        if payload == b"[DONE]" {
            return SseLine::Done;
        }

        return match serde_json::from_slice(payload) {
            Ok(value) => SseLine::Data(value),
            Err(_) => SseLine::Other(line),
        };
    }

    SseLine::Other(line)
}

/// The per-stream finite-state machine.
pub struct StreamTransformer {
    source: StreamFormat,
    target: StreamFormat,
    model: String,

    buffer: Vec<u8>,
    usage: Usage,
    first_content_seen: bool,
    /// Bytes of model-produced text seen, for output-token estimation when
    /// the upstream never reports usage.
    content_len: usize,
    finalized: bool,
    stop_reason: Option<String>,
    /// Swallow the blank lines that trail a consumed `[DONE]`.
    skip_trailing_blank: bool,

    anthropic_target: AnthropicTargetState,
    responses_target: ResponsesTargetState,
    /// Tool context for Anthropic-source streams.
    current_tool: Option<CurrentTool>,
    /// Tool-use blocks seen so far; assigns OpenAI tool-call indexes.
    tool_call_count: u64,
    /// Chunk id for OpenAI-chat output, derived from `message_start`.
    chunk_id: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CurrentTool {
    pub id: String,
    pub name: String,
    /// OpenAI `tool_calls[].index` for this block.
    pub index: u64,
}

impl StreamTransformer {
    pub fn new(source: StreamFormat, target: StreamFormat, model: impl Into<String>) -> Self {
        Self {
            source,
            target,
            model: model.into(),
            buffer: Vec::new(),
            usage: Usage::default(),
            first_content_seen: false,
            content_len: 0,
            finalized: false,
            stop_reason: None,
            skip_trailing_blank: false,
            anthropic_target: AnthropicTargetState::default(),
            responses_target: ResponsesTargetState::default(),
            current_tool: None,
            tool_call_count: 0,
            chunk_id: None,
        }
    }

    /// Feed upstream bytes; returns client bytes plus extracted metadata.
    pub fn transform(&mut self, chunk: &[u8]) -> Transformed {
        self.buffer.extend_from_slice(chunk);

        let mut result = Transformed::default();
        let usage_before = self.usage;
        let stop_before = self.stop_reason.clone();

        // Split on newlines, retaining the trailing incomplete line.
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line: Vec<u8> = self.buffer[start..end].to_vec();
            start = end + 1;

            self.process_line(&line, &mut result);
        }
        self.buffer.drain(..start);

        if self.usage != usage_before {
            result.usage = Some(self.usage);
        }
        if self.stop_reason != stop_before {
            result.stop_reason = self.stop_reason.clone();
        }

        result
    }

    /// Usage captured so far (and final once the stream ends).
    pub fn final_usage(&self) -> Usage {
        self.usage
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Bytes of model-produced text observed on the stream.
    pub fn content_length(&self) -> usize {
        self.content_len
    }

    /// Whether the stream emitted its terminal frames.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Close an aborted stream: clients expecting Anthropic framing get the
    /// synthesized terminal frames with whatever state is held.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.target == StreamFormat::Anthropic && !self.finalized {
            self.synthesize_anthropic_terminal(&mut out);
        }
        out
    }

    fn passthrough(&self) -> bool {
        self.source == self.target
            // Chat/Responses mixups (auto-escalation) stay byte-identical;
            // only metadata extraction switches dialect.
            || (self.source.is_openai_family() && self.target.is_openai_family())
    }

    fn process_line(&mut self, line: &[u8], result: &mut Transformed) {
        match classify(line) {
            SseLine::Empty => {
                if self.skip_trailing_blank {
                    return;
                }
                result.out.push(b'\n');
            }
            SseLine::Event => {
                // Regenerated for Anthropic targets from the `type` field;
                // echoed only in pass-through mode.
                self.skip_trailing_blank = false;
                if self.passthrough() {
                    result.out.extend_from_slice(line);
                    result.out.push(b'\n');
                }
            }
            SseLine::Done => {
                self.skip_trailing_blank = false;
                if self.passthrough() {
                    result.out.extend_from_slice(line);
                    result.out.push(b'\n');
                } else {
                    self.handle_done(result);
                }
            }
            SseLine::Data(event) => {
                self.skip_trailing_blank = false;

                // A chat-declared source that emits `response.*` events is an
                // OpenAI Responses stream; switch for the remainder.
                if self.source == StreamFormat::OpenaiChat
                    && event
                        .get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.starts_with("response."))
                {
                    self.source = StreamFormat::OpenaiResponses;
                }

                self.extract_metadata(&event, result);

                if self.passthrough() {
                    result.out.extend_from_slice(line);
                    result.out.push(b'\n');
                } else {
                    self.translate(&event, result);
                }
            }
            SseLine::Other(raw) => {
                self.skip_trailing_blank = false;
                result.out.extend_from_slice(raw);
                result.out.push(b'\n');
            }
        }
    }

    fn handle_done(&mut self, result: &mut Transformed) {
        if self.target == StreamFormat::Anthropic {
            if !self.finalized {
                self.synthesize_anthropic_terminal(&mut result.out);
            }
            // Anthropic has no sentinel; drop the line and the blank
            // lines that follow it.
            self.skip_trailing_blank = true;
        } else {
            // Translated OpenAI-family output regenerates the sentinel.
            result.out.extend_from_slice(b"data: [DONE]\n");
        }
    }

    fn synthesize_anthropic_terminal(&mut self, out: &mut Vec<u8>) {
        let stop_reason = self
            .stop_reason
            .as_deref()
            .map(|reason| match self.source {
                StreamFormat::Anthropic => reason.to_string(),
                _ => map_finish_to_stop_reason(reason).to_string(),
            })
            .unwrap_or_else(|| "end_turn".to_string());

        self.anthropic_target.ensure_message_start(out, None, &self.model);
        self.anthropic_target.close_all_blocks(out);
        self.anthropic_target.emit_terminal(out, &stop_reason, &self.usage);
        self.finalized = true;
    }

    /// Metadata is read from the untranslated source event.
    fn extract_metadata(&mut self, event: &Value, result: &mut Transformed) {
        match self.source {
            StreamFormat::Anthropic => {
                let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

                if event_type == "content_block_delta"
                    && event.pointer("/delta/type").and_then(Value::as_str) == Some("text_delta")
                {
                    self.latch_ttft(result);
                    if let Some(text) = event.pointer("/delta/text").and_then(Value::as_str) {
                        self.content_len += text.len();
                    }
                }

                if matches!(event_type, "message_delta" | "message_stop") {
                    if let Some(usage) = event.get("usage") {
                        self.usage.merge_from(usage);
                    }
                    if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                        self.stop_reason = Some(reason.to_string());
                    }
                }
            }
            StreamFormat::OpenaiChat => {
                let delta = event.pointer("/choices/0/delta");

                let mut content_bytes = 0;
                if let Some(delta) = delta {
                    for key in ["content", "reasoning_content"] {
                        if let Some(text) = delta.get(key).and_then(Value::as_str) {
                            content_bytes += text.len();
                        }
                    }
                }
                if content_bytes > 0 {
                    self.latch_ttft(result);
                    self.content_len += content_bytes;
                }

                if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
                    self.usage.merge_from(usage);
                }
                if let Some(usage) = event.pointer("/choices/0/delta/usage") {
                    self.usage.merge_from(usage);
                }

                if let Some(reason) = event.pointer("/choices/0/finish_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
            }
            StreamFormat::OpenaiResponses => {
                let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

                if matches!(
                    event_type,
                    "response.output_text.delta"
                        | "response.content_part.delta"
                        | "response.output_item.content_part.delta"
                ) {
                    self.latch_ttft(result);
                    let text = match event.get("delta") {
                        Some(Value::String(text)) => Some(text.as_str()),
                        Some(delta) => delta.get("text").and_then(Value::as_str),
                        None => None,
                    };
                    self.content_len += text.map(str::len).unwrap_or(0);
                }

                if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
                    self.usage.merge_from(usage);
                }
                if let Some(usage) = event.pointer("/response/usage").filter(|u| !u.is_null()) {
                    self.usage.merge_from(usage);
                }

                if let Some(reason) = event
                    .get("stop_reason")
                    .or_else(|| event.pointer("/response/stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.stop_reason = Some(reason.to_string());
                }
            }
        }
    }

    fn latch_ttft(&mut self, result: &mut Transformed) {
        if !self.first_content_seen {
            self.first_content_seen = true;
            result.ttft = true;
        }
    }

    fn translate(&mut self, event: &Value, result: &mut Transformed) {
        match (self.source, self.target) {
            (StreamFormat::Anthropic, StreamFormat::OpenaiChat) => {
                anthropic_to_openai::handle_event(self, event, &mut result.out);
            }
            (StreamFormat::Anthropic, StreamFormat::OpenaiResponses) => {
                anthropic_to_responses::handle_event(self, event, &mut result.out);
            }
            (StreamFormat::OpenaiChat, StreamFormat::Anthropic) => {
                openai_to_anthropic::handle_event(self, event, &mut result.out);
            }
            (StreamFormat::OpenaiResponses, StreamFormat::Anthropic) => {
                responses_to_anthropic::handle_event(self, event, &mut result.out);
            }
            // Remaining pairs are pass-through and never reach here.
            _ => {}
        }
    }
}

/// Serialize one event for an Anthropic client: `event:` line regenerated
/// from the payload type.
pub(crate) fn emit_anthropic_event(out: &mut Vec<u8>, event_type: &str, payload: &Value) {
    out.extend_from_slice(b"event: ");
    out.extend_from_slice(event_type.as_bytes());
    out.extend_from_slice(b"\ndata: ");
    out.extend_from_slice(render(payload).as_bytes());
    out.extend_from_slice(b"\n\n");
}

/// Serialize one event for an OpenAI-family client.
pub(crate) fn emit_data_event(out: &mut Vec<u8>, payload: &Value) {
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(render(payload).as_bytes());
    out.extend_from_slice(b"\n\n");
}

fn render(payload: &Value) -> String {
    sonic_rs::to_string(payload).unwrap_or_else(|e| {
        log::error!("Failed to serialize stream event: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    })
}

/// Anthropic stop reason → OpenAI finish reason.
pub(crate) fn map_stop_reason_to_finish(reason: &str) -> &str {
    match reason {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        "stop_sequence" | "end_turn" => "stop",
        other => other,
    }
}

/// OpenAI finish reason → Anthropic stop reason.
pub(crate) fn map_finish_to_stop_reason(reason: &str) -> &str {
    match reason {
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        "stop" => "end_turn",
        other => other,
    }
}

/// Anthropic stop reason → OpenAI Responses terminal status.
pub(crate) fn map_stop_reason_to_status(reason: &str) -> &str {
    match reason {
        "tool_use" => "requires_action",
        "max_tokens" | "stop_sequence" => "incomplete",
        _ => "completed",
    }
}
