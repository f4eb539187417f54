//! Convenience re-exports for common `exchange-rs` types.
//!
//! ```ignore
//! use exchange_rs::prelude::*;
//! ```
//!
//! Ledger internals, wire translators and the registries are left out;
//! import those from their modules directly.

pub use crate::json_schema_for;

pub use crate::checkpoint::{Checkpoint, CheckpointData};
pub use crate::config::{
    DEFAULT_MAX_TOOL_USE, DEFAULT_MODEL, ExchangeConfig, GenerationArgs, ModeratorConfig,
};
pub use crate::error::{ExchangeError, ProviderError};
pub use crate::exchange::{Exchange, ExchangeBuilder};
pub use crate::message::{Content, Message, Role, ToolResult, ToolUse};
pub use crate::moderators::{
    Moderator, PassiveModerator, SummarizerModerator, TruncateModerator,
};
pub use crate::providers::{CompletionRequest, OpenRouterProvider, Provider, ProviderFuture};
pub use crate::tools::{FnTool, Tool, ToolArgs, ToolDef, ToolFuture, ToolSet};
pub use crate::usage::{TokenUsageCollector, Usage, total_cost_message};
