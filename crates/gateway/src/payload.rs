//! The normalized request payload.
//!
//! Three wire formats (Anthropic Messages, OpenAI Chat Completions, OpenAI
//! Responses) collapse into this single representation, which is all the
//! router, the token estimator, and the provider body builders consume. The
//! raw request body is retained in [`NormalizedPayload::original`] so that
//! provider-specific fields survive same-family forwarding.

use serde_json::Value;

pub(crate) mod from_anthropic;
pub(crate) mod from_openai_chat;
pub(crate) mod from_openai_responses;
pub mod response;
pub(crate) mod to_anthropic;
pub(crate) mod to_openai;

pub use from_anthropic::normalize_anthropic;
pub use from_openai_chat::normalize_openai_chat;
pub use from_openai_responses::normalize_openai_responses;
pub use to_anthropic::to_anthropic_body;
pub use to_openai::to_openai_chat_body;

/// The intermediate representation of a request.
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
    /// Client-requested model. Missing model is the pipeline's error to raise.
    pub model: Option<String>,

    /// Concatenation of every system/developer segment, joined with `\n\n`.
    pub system: Option<String>,

    /// Conversation turns. Only `user` and `assistant` appear here; other
    /// roles are folded during normalization.
    pub messages: Vec<NormalizedMessage>,

    /// Tool descriptors with their schemas verbatim.
    pub tools: Vec<ToolDescriptor>,

    /// Streaming requested.
    pub stream: bool,

    /// Reasoning-mode hint (`thinking` or `reasoning` on the wire).
    pub thinking: bool,

    /// The source body, untouched, for pass-through of provider-specific
    /// fields.
    pub original: Value,
}

/// One conversation turn.
#[derive(Debug, Clone, Default)]
pub struct NormalizedMessage {
    pub role: NormalizedRole,

    /// Accumulated text of every text-bearing block.
    pub text: String,

    /// Tool invocations. Assistant turns only.
    pub tool_calls: Vec<ToolCall>,

    /// Tool outputs. User turns only (the `tool` role folds here).
    pub tool_results: Vec<ToolResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizedRole {
    #[default]
    User,
    Assistant,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Tool arguments: parsed when the wire value was valid JSON, raw otherwise.
#[derive(Debug, Clone)]
pub enum ToolArguments {
    Raw(String),
    Parsed(Value),
}

impl ToolArguments {
    /// Wire value for OpenAI-shaped bodies: always a JSON string.
    pub fn to_wire_string(&self) -> String {
        match self {
            ToolArguments::Raw(raw) => raw.clone(),
            ToolArguments::Parsed(value) => value.to_string(),
        }
    }

    /// Wire value for Anthropic bodies: always structured `input`.
    pub fn to_wire_value(&self) -> Value {
        match self {
            ToolArguments::Raw(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default())),
            ToolArguments::Parsed(value) => value.clone(),
        }
    }
}

/// A tool output supplied by the client.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Id of the tool call this result answers.
    pub id: String,
    pub name: Option<String>,
    pub content: Value,
}

impl ToolResult {
    /// Wire value for OpenAI `tool` messages and Anthropic `tool_result`
    /// blocks: plain strings stay as-is, everything else renders as JSON.
    pub fn content_string(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// A tool made available to the model.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema, verbatim from the source body.
    pub input_schema: Value,
}

/// Loose boolean coercion for wire flags: absent, `null`, `false`, `0`, and
/// `""` are false, anything else is true.
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Content parts collected from one message's content value.
#[derive(Debug, Default)]
pub(crate) struct ContentParts {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

impl ContentParts {
    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

/// Walk a content value: a string, an ordered block sequence, a single
/// block object, or null. Unknown block types are skipped.
pub(crate) fn extract_parts(content: Option<&Value>) -> ContentParts {
    let mut parts = ContentParts::default();

    match content {
        None | Some(Value::Null) => {}
        Some(Value::String(text)) => parts.push_text(text),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                extract_block(block, &mut parts);
            }
        }
        Some(block @ Value::Object(_)) => extract_block(block, &mut parts),
        Some(_) => {}
    }

    parts
}

fn extract_block(block: &Value, parts: &mut ContentParts) {
    let Some(block_type) = block.get("type").and_then(Value::as_str) else {
        // Blocks without a type but with text still count as text.
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            parts.push_text(text);
        }
        return;
    };

    match block_type {
        "text" | "input_text" | "output_text" => {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                parts.push_text(text);
            }
        }
        "tool_use" | "function_call" => parts.tool_calls.push(tool_call_from_block(block)),
        "tool_result" | "function_result" => parts.tool_results.push(tool_result_from_block(block)),
        _ => {}
    }
}

/// Build a [`ToolCall`] from a `tool_use`/`function_call` block. Name falls
/// back through `function.name` to the literal `"tool"`; a missing id is
/// synthesized.
pub(crate) fn tool_call_from_block(block: &Value) -> ToolCall {
    let id = block
        .get("id")
        .or_else(|| block.get("call_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(synthesize_call_id);

    let name = block
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| block.pointer("/function/name").and_then(Value::as_str))
        .unwrap_or("tool")
        .to_string();

    let raw_arguments = block
        .get("input")
        .or_else(|| block.get("arguments"))
        .or_else(|| block.pointer("/function/arguments"));

    ToolCall {
        id,
        name,
        arguments: parse_arguments(raw_arguments),
    }
}

/// String arguments are parsed when they hold valid JSON; parse failures keep
/// the raw string. Structured arguments pass through.
pub(crate) fn parse_arguments(raw: Option<&Value>) -> ToolArguments {
    match raw {
        None | Some(Value::Null) => ToolArguments::Parsed(Value::Object(Default::default())),
        Some(Value::String(text)) => match serde_json::from_str(text) {
            Ok(value) => ToolArguments::Parsed(value),
            Err(_) => ToolArguments::Raw(text.clone()),
        },
        Some(value) => ToolArguments::Parsed(value.clone()),
    }
}

fn tool_result_from_block(block: &Value) -> ToolResult {
    let id = block
        .get("tool_use_id")
        .or_else(|| block.get("tool_call_id"))
        .or_else(|| block.get("call_id"))
        .or_else(|| block.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let name = block.get("name").and_then(Value::as_str).map(str::to_string);

    // Content precedence: result, output, content, text.
    let content = block
        .get("result")
        .or_else(|| block.get("output"))
        .or_else(|| block.get("content"))
        .or_else(|| block.get("text"))
        .cloned()
        .unwrap_or(Value::Null);

    ToolResult {
        id,
        name,
        content: parse_result_content(content),
    }
}

/// JSON-looking string content is parsed; everything else passes through.
pub(crate) fn parse_result_content(content: Value) -> Value {
    match content {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

pub(crate) fn synthesize_call_id() -> String {
    format!("tool_call_{}", uuid::Uuid::new_v4().simple())
}

/// Join non-empty system segments with a blank line.
pub(crate) fn join_system(parts: Vec<String>) -> Option<String> {
    let joined: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
    if joined.is_empty() { None } else { Some(joined.join("\n\n")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthy_follows_loose_coercion() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(Some(&json!(false))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(1))));
        assert!(truthy(Some(&json!("enabled"))));
        assert!(truthy(Some(&json!({"budget_tokens": 1024}))));
    }

    #[test]
    fn extracts_text_from_every_container_shape() {
        assert_eq!(extract_parts(Some(&json!("plain"))).text, "plain");
        assert_eq!(extract_parts(Some(&json!({"type": "text", "text": "block"}))).text, "block");
        assert_eq!(
            extract_parts(Some(&json!([
                {"type": "text", "text": "a"},
                {"type": "input_text", "text": "b"},
                {"type": "output_text", "text": "c"},
            ])))
            .text,
            "abc"
        );
        assert_eq!(extract_parts(None).text, "");
    }

    #[test]
    fn unknown_block_types_are_skipped() {
        let parts = extract_parts(Some(&json!([
            {"type": "image", "source": {"data": "…"}},
            {"type": "text", "text": "kept"},
        ])));

        assert_eq!(parts.text, "kept");
        assert!(parts.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_parses_string_arguments_and_keeps_malformed_raw() {
        let parsed = tool_call_from_block(&json!({
            "type": "tool_use",
            "id": "toolu_1",
            "name": "search",
            "input": {"q": "x"},
        }));
        assert!(matches!(parsed.arguments, ToolArguments::Parsed(ref v) if v == &json!({"q": "x"})));

        let from_string = tool_call_from_block(&json!({
            "type": "function_call",
            "id": "call_1",
            "function": {"name": "search", "arguments": "{\"q\":\"x\"}"},
        }));
        assert_eq!(from_string.name, "search");
        assert!(matches!(from_string.arguments, ToolArguments::Parsed(ref v) if v == &json!({"q": "x"})));

        let malformed = tool_call_from_block(&json!({
            "type": "function_call",
            "function": {"arguments": "{not json"},
        }));
        assert_eq!(malformed.name, "tool");
        assert!(malformed.id.starts_with("tool_call_"));
        assert!(matches!(malformed.arguments, ToolArguments::Raw(ref s) if s == "{not json"));
    }

    #[test]
    fn tool_result_content_precedence_is_result_output_content_text() {
        let parts = extract_parts(Some(&json!([{
            "type": "tool_result",
            "tool_use_id": "toolu_1",
            "result": "from result",
            "output": "from output",
            "content": "from content",
        }])));

        assert_eq!(parts.tool_results[0].id, "toolu_1");
        assert_eq!(parts.tool_results[0].content, json!("from result"));
    }

    #[test]
    fn tool_result_json_string_content_is_parsed() {
        let parts = extract_parts(Some(&json!([{
            "type": "tool_result",
            "tool_use_id": "toolu_1",
            "content": "{\"ok\":true}",
        }])));

        assert_eq!(parts.tool_results[0].content, json!({"ok": true}));
    }

    #[test]
    fn join_system_drops_empty_parts() {
        assert_eq!(join_system(vec![]), None);
        assert_eq!(join_system(vec![String::new()]), None);
        assert_eq!(
            join_system(vec!["a".into(), String::new(), "b".into()]),
            Some("a\n\nb".into())
        );
    }
}
