//! Request validation gate settings.

use serde::Deserialize;

/// Validation settings for the Anthropic surface.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub mode: ValidationMode,

    /// In `anthropic-strict` mode, allow experimental content-block types
    /// (`input_*`, `output_*`, `data_*`, `media_*` prefixes).
    pub allow_experimental_blocks: bool,
}

/// Strictness of the request gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    /// No shape checking; requests go straight to normalization.
    #[default]
    Off,
    /// Claude Code clients: User-Agent and `metadata.user_id` are required,
    /// experimental block types are tolerated.
    ClaudeCode,
    /// Strict Anthropic schema; experimental blocks rejected unless
    /// `allow_experimental_blocks` is set.
    AnthropicStrict,
}
