//! Input-token estimation.
//!
//! Routing decisions only need a consistent estimate, not the upstream's own
//! count, so a single cl100k tokenizer serves every model.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::payload::{NormalizedPayload, ToolArguments};

static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        log::error!("Failed to initialize tokenizer, falling back to byte estimate: {e}");
        None
    }
});

/// Estimate the token count of a piece of text. The model is accepted for
/// interface compatibility; all models share one tokenizer.
pub fn estimate_text_tokens(text: &str, _model: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }

    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        // Rough bytes-per-token heuristic when the tokenizer is unavailable.
        None => (text.len() as u64).div_ceil(4),
    }
}

/// Estimate the input tokens of a normalized payload: system text, message
/// texts, and the JSON rendering of tool arguments and tool results.
pub fn estimate_input_tokens(payload: &NormalizedPayload, model: &str) -> u64 {
    let mut total = 0;

    if let Some(system) = &payload.system {
        total += estimate_text_tokens(system, model);
    }

    for message in &payload.messages {
        total += estimate_text_tokens(&message.text, model);

        for call in &message.tool_calls {
            let rendered = match &call.arguments {
                ToolArguments::Raw(raw) => raw.clone(),
                ToolArguments::Parsed(value) => value.to_string(),
            };
            total += estimate_text_tokens(&rendered, model);
        }

        for result in &message.tool_results {
            total += estimate_text_tokens(&result.content.to_string(), model);
        }
    }

    total
}
