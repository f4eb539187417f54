//! Summarizing truncation.
//!
//! Selects the same leading messages as [`TruncateModerator`], but replays
//! them through a scratch exchange to get a summary, then splices that
//! summary back in as the new head of the log.

use super::{Moderator, ModeratorFuture, PassiveModerator, TruncateModerator};
use crate::checkpoint::CheckpointData;
use crate::config::DEFAULT_MAX_TOOL_USE;
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::message::{Message, Role};
use std::any::Any;
use tracing::{info, warn};

/// System prompt for the scratch exchange that writes summaries.
pub const SUMMARIZER_PROMPT: &str = "\
You are summarizing an earlier part of a conversation between a user and an \
assistant so the conversation can continue with less context. Focus on:
- What the user asked for and what was accomplished
- Key findings and decisions made
- Tool calls that were made and what they returned
- Failed approaches (what was tried and why it failed)
- Open questions and what remains to be done

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve names, identifiers, numbers, and error messages verbatim.
- Be concise. Write the summary as plain prose addressed to the assistant.";

/// Trigger appended when the evicted run ends on a plain assistant reply,
/// since the scratch exchange must end on a user turn.
const SUMMARIZE_REQUEST: &str = "Summarize the above conversation";

#[derive(Debug, Clone, Default)]
pub struct SummarizerModerator {
    truncate: TruncateModerator,
}

impl SummarizerModerator {
    pub fn new(max_tokens: i64) -> Self {
        Self {
            truncate: TruncateModerator::new(max_tokens),
        }
    }

    /// Measure and summarize with this model instead of the exchange's.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.truncate = self.truncate.with_model(model);
        self
    }

    pub fn model(&self) -> Option<&str> {
        self.truncate.model()
    }

    pub fn max_tokens(&self) -> i64 {
        self.truncate.max_tokens()
    }

    pub fn system_prompt_token_count(&self) -> i64 {
        self.truncate.system_prompt_token_count()
    }
}

impl Moderator for SummarizerModerator {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    fn rewrite<'a>(&'a mut self, exchange: &'a mut Exchange) -> ModeratorFuture<'a> {
        Box::pin(async move {
            self.truncate
                .update_system_prompt_token_count(exchange)
                .await?;

            let total = exchange.checkpoint_data().total_token_count();
            if total < self.max_tokens() {
                return Ok(());
            }

            let eviction = self.truncate.plan_eviction(exchange)?;
            if eviction.checkpoint_count() == 0 {
                warn!("Context at {total} tokens but nothing can be summarized");
                return Ok(());
            }
            let evicted = eviction.messages().len();
            let mut to_summarize = eviction.messages().to_vec();
            if let Some(last) = to_summarize.last()
                && last.role() == Role::Assistant
                && !last.has_tool_use()
            {
                to_summarize.push(Message::user(SUMMARIZE_REQUEST));
            }

            let model = self
                .model()
                .map(str::to_string)
                .unwrap_or_else(|| exchange.model().to_string());
            let mut summarizer = exchange
                .replace()
                .with_system(SUMMARIZER_PROMPT)
                .with_moderator(PassiveModerator)
                .with_model(model)
                .with_messages(to_summarize)
                .with_checkpoint_data(CheckpointData::new())
                .build();
            let summary = summarizer.reply(DEFAULT_MAX_TOOL_USE).await?;
            let token_count = summarizer
                .checkpoint_data()
                .last()
                .map(|cp| cp.token_count)
                .ok_or_else(|| {
                    ExchangeError::LedgerDesync("summary exchange recorded no checkpoints".into())
                })?;

            eviction.apply(exchange)?;

            let role = match exchange.messages().front() {
                Some(head) if head.role() == Role::User => Role::Assistant,
                _ => Role::User,
            };
            info!(
                "Summarized {evicted} message(s) at {total} tokens into a {token_count} token {role} message"
            );
            exchange.prepend_checkpointed_message(Message::text_for(role, summary.text()), token_count)
        })
    }

    fn boxed_clone(&self) -> Box<dyn Moderator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
