//! Token counting and tool-output size limits.

use std::sync::OnceLock;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::warn;

/// Maximum tool output size in characters.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 1 << 20;

/// Maximum tool output size in `cl100k_base` tokens.
pub const MAX_TOOL_OUTPUT_TOKENS: usize = 16_000;

/// Approximate characters per token, used only when the encoder is
/// unavailable.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Special tokens of `cl100k_base`. Text containing one is refused rather
/// than counted as ordinary characters.
pub const CL100K_SPECIAL_TOKENS: [&str; 5] = [
    "<|endoftext|>",
    "<|fim_prefix|>",
    "<|fim_middle|>",
    "<|fim_suffix|>",
    "<|endofprompt|>",
];

/// `cl100k_base` token counter with a character-ratio fallback.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Self {
        let bpe = match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!("cl100k_base unavailable, estimating tokens from length: {e}");
                None
            }
        };
        Self { bpe }
    }

    /// Process-wide shared counter; the encoder is built on first use.
    pub fn shared() -> &'static TokenCounter {
        static COUNTER: OnceLock<TokenCounter> = OnceLock::new();
        COUNTER.get_or_init(TokenCounter::new)
    }

    /// Count `text` as ordinary text; special-token markup is not treated
    /// as a single token.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => (text.chars().count() as f64 / DEFAULT_CHARS_PER_TOKEN).ceil() as usize,
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The first `cl100k_base` special token appearing in `text`, if any.
pub fn find_special_token(text: &str) -> Option<&'static str> {
    CL100K_SPECIAL_TOKENS
        .into_iter()
        .find(|token| text.contains(token))
}

/// Tool output the model cannot be shown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolOutputError {
    #[error("This tool call created an output that was too long to handle!")]
    TooLong,
    #[error("Encountered text corresponding to disallowed special token '{0}'")]
    DisallowedSpecialToken(&'static str),
}

/// Reject tool output above [`MAX_TOOL_OUTPUT_CHARS`] or
/// [`MAX_TOOL_OUTPUT_TOKENS`], or containing a special token. The cheap
/// character check runs first so huge outputs never reach the tokenizer.
pub fn validate_tool_output(output: &str) -> Result<(), ToolOutputError> {
    if output.chars().count() > MAX_TOOL_OUTPUT_CHARS {
        return Err(ToolOutputError::TooLong);
    }
    if let Some(token) = find_special_token(output) {
        return Err(ToolOutputError::DisallowedSpecialToken(token));
    }
    if TokenCounter::shared().count(output) > MAX_TOOL_OUTPUT_TOKENS {
        return Err(ToolOutputError::TooLong);
    }
    Ok(())
}
