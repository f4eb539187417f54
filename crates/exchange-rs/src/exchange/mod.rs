//! The exchange: a message log, its checkpoint ledger, and the
//! generate/reply loop that drives a [`Provider`].
//!
//! An [`Exchange`] owns its messages and ledger outright. Construction-time
//! fields (provider, model, system prompt, tools, moderator) are read-only;
//! derive a modified copy with [`Exchange::replace`].
//!
//! ```ignore
//! let mut exchange = Exchange::builder(provider, "openai/gpt-4o")
//!     .with_system("You are a helpful assistant.")
//!     .with_tools(tools)
//!     .build();
//! exchange.add(Message::user("What is 2 + 2?"))?;
//! let reply = exchange.reply(DEFAULT_MAX_TOOL_USE).await?;
//! ```

mod accounting;

use crate::checkpoint::CheckpointData;
use crate::config::GenerationArgs;
use crate::error::ExchangeError;
use crate::message::{Content, Message, Role, ToolResult, ToolUse};
use crate::moderators::{Moderator, PassiveModerator, TruncateModerator};
use crate::providers::{CompletionRequest, Provider};
use crate::tools::ToolSet;
use crate::usage::{TokenUsageCollector, Usage};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A conversation with one model, kept within a token budget by its
/// moderator.
#[derive(Debug)]
pub struct Exchange {
    provider: Arc<dyn Provider>,
    model: String,
    system: String,
    moderator: Box<dyn Moderator>,
    tools: ToolSet,
    messages: VecDeque<Message>,
    checkpoint_data: CheckpointData,
    generation: GenerationArgs,
    usage: TokenUsageCollector,
}

// ── Builder ────────────────────────────────────────────────────────

/// Builder for [`Exchange`]. Obtained from [`Exchange::builder`] or
/// [`Exchange::replace`].
#[derive(Debug)]
pub struct ExchangeBuilder {
    provider: Arc<dyn Provider>,
    model: String,
    system: String,
    moderator: Box<dyn Moderator>,
    tools: ToolSet,
    messages: VecDeque<Message>,
    checkpoint_data: CheckpointData,
    generation: GenerationArgs,
    usage: TokenUsageCollector,
}

impl ExchangeBuilder {
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_moderator(self, moderator: impl Moderator + 'static) -> Self {
        self.with_boxed_moderator(Box::new(moderator))
    }

    pub fn with_boxed_moderator(mut self, moderator: Box<dyn Moderator>) -> Self {
        self.moderator = moderator;
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Seed the message log. Messages are taken as-is; alternation is the
    /// caller's responsibility here, as with a restored session.
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages = messages.into_iter().collect();
        self
    }

    pub fn with_checkpoint_data(mut self, checkpoint_data: CheckpointData) -> Self {
        self.checkpoint_data = checkpoint_data;
        self
    }

    pub fn with_generation_args(mut self, generation: GenerationArgs) -> Self {
        self.generation = generation;
        self
    }

    /// Report usage into an existing collector instead of a fresh one.
    pub fn with_usage_collector(mut self, usage: TokenUsageCollector) -> Self {
        self.usage = usage;
        self
    }

    pub fn build(self) -> Exchange {
        Exchange {
            provider: self.provider,
            model: self.model,
            system: self.system,
            moderator: self.moderator,
            tools: self.tools,
            messages: self.messages,
            checkpoint_data: self.checkpoint_data,
            generation: self.generation,
            usage: self.usage,
        }
    }
}

// ── Exchange ───────────────────────────────────────────────────────

impl Exchange {
    /// Start building an empty exchange with a truncating moderator.
    pub fn builder(provider: Arc<dyn Provider>, model: impl Into<String>) -> ExchangeBuilder {
        ExchangeBuilder {
            provider,
            model: model.into(),
            system: String::new(),
            moderator: Box::new(TruncateModerator::default()),
            tools: ToolSet::new(),
            messages: VecDeque::new(),
            checkpoint_data: CheckpointData::new(),
            generation: GenerationArgs::default(),
            usage: TokenUsageCollector::new(),
        }
    }

    /// Copy this exchange into a builder for overriding fields.
    ///
    /// Messages, ledger and moderator state are deep-copied, so the copy and
    /// the original never observe each other's mutations. Tools and the usage
    /// collector are shared.
    pub fn replace(&self) -> ExchangeBuilder {
        ExchangeBuilder {
            provider: Arc::clone(&self.provider),
            model: self.model.clone(),
            system: self.system.clone(),
            moderator: self.moderator.boxed_clone(),
            tools: self.tools.clone(),
            messages: self.messages.clone(),
            checkpoint_data: self.checkpoint_data.clone(),
            generation: self.generation.clone(),
            usage: self.usage.clone(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn moderator(&self) -> &dyn Moderator {
        self.moderator.as_ref()
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn messages(&self) -> &VecDeque<Message> {
        &self.messages
    }

    pub fn checkpoint_data(&self) -> &CheckpointData {
        &self.checkpoint_data
    }

    pub(crate) fn checkpoint_data_mut(&mut self) -> &mut CheckpointData {
        &mut self.checkpoint_data
    }

    pub fn generation_args(&self) -> &GenerationArgs {
        &self.generation
    }

    pub fn usage_collector(&self) -> &TokenUsageCollector {
        &self.usage
    }

    /// Append a message. Consecutive messages must alternate roles; on
    /// violation the log is left unchanged.
    pub fn add(&mut self, message: Message) -> Result<(), ExchangeError> {
        if let Some(last) = self.messages.back()
            && last.role() == message.role()
        {
            return Err(ExchangeError::RoleAlternation {
                role: message.role(),
            });
        }
        self.messages.push_back(message);
        Ok(())
    }

    /// Whether the log is in a state a provider will accept.
    pub fn is_allowed_to_call_llm(&self) -> bool {
        self.messages
            .back()
            .is_some_and(|m| m.role() == Role::User)
    }

    /// Usage recorded so far, summed per model.
    pub fn token_usage(&self) -> BTreeMap<String, Usage> {
        self.usage.summary()
    }

    /// Moderate, call the provider once, and record the reply and its cost.
    pub async fn generate(&mut self) -> Result<Message, ExchangeError> {
        let mut moderator = std::mem::replace(&mut self.moderator, Box::new(PassiveModerator));
        let moderated = moderator.rewrite(self).await;
        self.moderator = moderator;
        moderated?;

        let tools = self.tools.definitions();
        let request = CompletionRequest {
            model: &self.model,
            system: &self.system,
            messages: self.messages.make_contiguous(),
            tools: &tools,
            generation: &self.generation,
        };
        let (message, usage) = self.provider.complete(request).await?;
        debug!(
            "Generated {} message with {} tool use(s); usage {usage}",
            message.role(),
            message.tool_use().len()
        );

        self.add(message.clone())?;
        self.add_checkpoints_from_usage(&usage)?;
        self.usage.collect(&self.model, usage);
        Ok(message)
    }

    /// Generate, then keep executing requested tools and generating again
    /// until the model answers without a tool use.
    ///
    /// After `max_tool_use` model calls that all requested tools, a synthetic
    /// assistant message announcing the limit is appended and returned.
    pub async fn reply(&mut self, max_tool_use: usize) -> Result<Message, ExchangeError> {
        if max_tool_use == 0 {
            return Err(ExchangeError::InvalidMaxToolUse);
        }
        let mut response = self.generate().await?;
        let mut curr_iter = 1;

        while response.has_tool_use() {
            let mut results = Vec::new();
            for tool_use in response.tool_use() {
                results.push(Content::ToolResult(self.call_function(tool_use).await));
            }
            self.add(Message::new(Role::User, results)?)?;

            if curr_iter >= max_tool_use {
                warn!("Tool use limit of {max_tool_use} reached, stopping");
                response = Message::assistant(format!(
                    "We've stopped executing additional tool calls because we reached the limit of {max_tool_use}"
                ));
                self.add(response.clone())?;
                break;
            }
            response = self.generate().await?;
            curr_iter += 1;
        }
        Ok(response)
    }

    /// Execute one tool request. Failures come back as an error-flagged
    /// result rather than an `Err`.
    pub async fn call_function(&self, tool_use: &ToolUse) -> ToolResult {
        self.tools.dispatch(tool_use).await
    }

    /// Run a tool on the caller's behalf and record the request/result pair
    /// as if the model had asked for it.
    pub async fn add_tool_use(&mut self, tool_use: ToolUse) -> Result<ToolResult, ExchangeError> {
        let result = self.call_function(&tool_use).await;
        info!("Manually added tool use '{}' ({})", tool_use.name, tool_use.id);
        self.add(Message::new(Role::Assistant, vec![Content::ToolUse(tool_use)])?)?;
        self.add(Message::new(
            Role::User,
            vec![Content::ToolResult(result.clone())],
        )?)?;
        Ok(result)
    }
}
