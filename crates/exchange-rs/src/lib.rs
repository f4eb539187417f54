//! Checkpointed LLM conversations that stay inside a token budget.
//!
//! `exchange-rs` manages a single conversation with a language model: it
//! sends the message log to a [`Provider`](providers::Provider), executes
//! the tools the model requests, and records what every part of the log
//! cost in a [`CheckpointData`](checkpoint::CheckpointData) ledger. A
//! [`Moderator`](moderators::Moderator) consults that ledger before each
//! call and truncates or summarizes the oldest messages once the budget is
//! exceeded.
//!
//! # Getting started
//!
//! ```ignore
//! use exchange_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = Arc::new(OpenRouterProvider::from_env()?);
//!
//!     let tools = ToolSet::new().with(FnTool::new(
//!         ToolDef::new("add", "Add two numbers", json_schema_for::<AddArgs>()),
//!         |args: AddArgs| async move { Ok(args.a + args.b) },
//!     ));
//!
//!     let mut exchange = ExchangeConfig::new("openai/gpt-4o", "You are a helpful assistant.")
//!         .with_moderator(ModeratorConfig::summarizer(50_000))
//!         .build(provider, tools)?;
//!
//!     exchange.add(Message::user("What is 2 + 2?"))?;
//!     let reply = exchange.reply(DEFAULT_MAX_TOOL_USE).await?;
//!     println!("{}", reply.text());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`message`] | Roles, content parts, validated messages |
//! | [`checkpoint`] | Token-accounting ledger with logical indexing |
//! | [`exchange`] | Message log, generate/reply loop, ledger-aware edits |
//! | [`moderators`] | Passive, truncating and summarizing strategies |
//! | [`providers`] | Provider trait, OpenRouter client, retries |
//! | [`tools`] | Tool trait, closures as tools, dispatch |
//! | [`usage`] | Usage records, per-model collector, cost estimates |
//! | [`session`] | JSONL session files |

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod exchange;
pub mod message;
pub mod moderators;
pub mod prelude;
pub mod providers;
pub mod session;
pub mod tokens;
pub mod tools;
pub mod usage;

pub use schemars;

use schemars::JsonSchema;

/// Generate a JSON Schema `Value` from a Rust type that derives
/// `schemars::JsonSchema`, for use as a tool's parameter schema.
///
/// ```
/// use exchange_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct ReadArgs {
///     path: String,
///     #[serde(default)]
///     limit: Option<usize>,
/// }
///
/// let schema = json_schema_for::<ReadArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"path".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
