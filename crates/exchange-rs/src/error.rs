//! Error types for the exchange core and its provider collaborators.

use thiserror::Error;

/// Contract violations raised by [`Exchange`](crate::exchange::Exchange)
/// operations, plus provider failures that propagate out of `generate`.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("cannot add a {role} message directly after another {role} message")]
    RoleAlternation { role: crate::message::Role },

    #[error("invalid {role} message: {reason}")]
    InvalidMessage {
        role: crate::message::Role,
        reason: &'static str,
    },

    #[error("There are no messages to pop")]
    NoMessages,

    #[error("There must be at least one checkpoint to pop the first message")]
    NoCheckpointForFirstMessage,

    #[error("There are no checkpoints to pop")]
    NoCheckpoints,

    #[error("Our checkpoint data is out of sync: {0}")]
    LedgerDesync(String),

    #[error("max_tool_use must be greater than 0")]
    InvalidMaxToolUse,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failures reported by a [`Provider`](crate::providers::Provider).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("{0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Returned by the provider and moderator registries for an unknown key.
#[derive(Debug, Error)]
#[error("invalid {kind} '{name}', valid choices are: {}", .choices.join(", "))]
pub struct InvalidChoice {
    pub kind: &'static str,
    pub name: String,
    pub choices: Vec<&'static str>,
}
