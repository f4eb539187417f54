//! Exchange configuration with sensible defaults.
//!
//! ```ignore
//! let config = ExchangeConfig::new("openai/gpt-4o", "You are a helpful assistant.")
//!     .with_max_tool_use(16)
//!     .with_moderator(ModeratorConfig::summarizer(50_000));
//! let exchange = config.build(provider, tools)?;
//! ```

use crate::error::InvalidChoice;
use crate::exchange::Exchange;
use crate::moderators::{self, Moderator};
use crate::providers::Provider;
use crate::tools::ToolSet;
use serde::Serialize;
use std::sync::Arc;

/// Default model for completions.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Default cap on tool round-trips within one `reply`.
pub const DEFAULT_MAX_TOOL_USE: usize = 128;

/// Default token budget for the truncate and summarizer moderators.
pub const DEFAULT_MAX_CONTEXT_TOKENS: i64 = 100_000;

// ── GenerationArgs ─────────────────────────────────────────────────

/// Sampling parameters forwarded to the provider. Unset fields are omitted
/// from request payloads.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl GenerationArgs {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

// ── ModeratorConfig ────────────────────────────────────────────────

/// Which moderator to build and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeratorConfig {
    /// Registry key: `"passive"`, `"truncate"` or `"summarizer"`.
    pub name: String,
    /// Token budget before the moderator starts evicting.
    pub max_tokens: i64,
    /// Model for system-prompt probes and summaries. Defaults to the
    /// exchange's model.
    pub model: Option<String>,
}

impl Default for ModeratorConfig {
    fn default() -> Self {
        Self {
            name: "truncate".into(),
            max_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            model: None,
        }
    }
}

impl ModeratorConfig {
    pub fn passive() -> Self {
        Self {
            name: "passive".into(),
            ..Default::default()
        }
    }

    pub fn truncate(max_tokens: i64) -> Self {
        Self {
            name: "truncate".into(),
            max_tokens,
            model: None,
        }
    }

    pub fn summarizer(max_tokens: i64) -> Self {
        Self {
            name: "summarizer".into(),
            max_tokens,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn build(&self) -> Result<Box<dyn Moderator>, InvalidChoice> {
        moderators::moderator_by_name(&self.name, self.max_tokens, self.model.clone())
    }
}

// ── ExchangeConfig ─────────────────────────────────────────────────

/// Everything needed to start an exchange apart from the provider and tools.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub model: String,
    pub system: String,
    pub max_tool_use: usize,
    pub generation: GenerationArgs,
    pub moderator: ModeratorConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            system: String::new(),
            max_tool_use: DEFAULT_MAX_TOOL_USE,
            generation: GenerationArgs::default(),
            moderator: ModeratorConfig::default(),
        }
    }
}

impl ExchangeConfig {
    pub fn new(model: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            ..Default::default()
        }
    }

    pub fn with_max_tool_use(mut self, max_tool_use: usize) -> Self {
        self.max_tool_use = max_tool_use;
        self
    }

    pub fn with_generation(mut self, generation: GenerationArgs) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_moderator(mut self, moderator: ModeratorConfig) -> Self {
        self.moderator = moderator;
        self
    }

    /// Build an empty exchange from this configuration.
    pub fn build(
        &self,
        provider: Arc<dyn Provider>,
        tools: ToolSet,
    ) -> Result<Exchange, InvalidChoice> {
        let moderator = self.moderator.build()?;
        Ok(Exchange::builder(provider, self.model.clone())
            .with_system(self.system.clone())
            .with_tools(tools)
            .with_generation_args(self.generation.clone())
            .with_boxed_moderator(moderator)
            .build())
    }
}
