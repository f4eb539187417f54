//! FIFO truncation.
//!
//! Once the ledger's running total reaches the budget, whole checkpoints are
//! dropped from the front of the log until the total falls below it or the
//! ledger runs out. A
//! leading tool result is never left behind without its request.

use super::{Moderator, ModeratorFuture, PassiveModerator};
use crate::checkpoint::CheckpointData;
use crate::config::DEFAULT_MAX_CONTEXT_TOKENS;
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::message::Message;
use std::any::Any;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TruncateModerator {
    model: Option<String>,
    max_tokens: i64,
    system_prompt_token_count: i64,
    /// `(model, system prompt)` the cached count was measured for.
    measured_for: Option<(String, String)>,
}

impl Default for TruncateModerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_TOKENS)
    }
}

impl TruncateModerator {
    pub fn new(max_tokens: i64) -> Self {
        Self {
            model: None,
            max_tokens,
            system_prompt_token_count: 0,
            measured_for: None,
        }
    }

    /// Measure the system prompt with this model instead of the exchange's.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn max_tokens(&self) -> i64 {
        self.max_tokens
    }

    /// Cached cost of the system prompt and tool definitions.
    pub fn system_prompt_token_count(&self) -> i64 {
        self.system_prompt_token_count
    }

    /// Re-measure the system prompt when it or the model changed, and swap
    /// the new count into the exchange's running total in place of the old.
    ///
    /// Measuring sends a one-message probe (`"a"`, one token) through a
    /// scratch exchange; whatever the provider reports beyond that token is
    /// the fixed per-request overhead.
    pub(crate) async fn update_system_prompt_token_count(
        &mut self,
        exchange: &mut Exchange,
    ) -> Result<(), ExchangeError> {
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| exchange.model().to_string());
        let key = (model.clone(), exchange.system().to_string());
        if self.system_prompt_token_count != 0 && self.measured_for.as_ref() == Some(&key) {
            return Ok(());
        }

        let mut probe = exchange
            .replace()
            .with_messages([Message::user("a")])
            .with_checkpoint_data(CheckpointData::new())
            .with_moderator(PassiveModerator)
            .with_model(model)
            .build();
        probe.generate().await?;

        let previous = self.system_prompt_token_count;
        self.system_prompt_token_count = probe.checkpoint_data().total_token_count() - 1;
        self.measured_for = Some(key);
        exchange
            .checkpoint_data_mut()
            .adjust_total_token_count(self.system_prompt_token_count - previous);
        debug!(
            "System prompt measured at {} tokens (was {previous})",
            self.system_prompt_token_count
        );
        Ok(())
    }

    /// The leading checkpoints that must go for the exchange to fit the
    /// budget, planned on a scratch copy so the real ledger is untouched.
    pub(crate) fn plan_eviction(&self, exchange: &Exchange) -> Result<Eviction, ExchangeError> {
        let mut throwaway = exchange.replace().with_moderator(PassiveModerator).build();
        let mut eviction = Eviction::default();

        while throwaway.checkpoint_data().total_token_count() > self.max_tokens {
            if throwaway.checkpoint_data().is_empty() {
                warn!(
                    "Ledger exhausted at {} tokens, still above the {} token budget",
                    throwaway.checkpoint_data().total_token_count(),
                    self.max_tokens
                );
                break;
            }
            eviction.take(&mut throwaway)?;
        }

        // A tool result needs its request; evict orphans too.
        while throwaway
            .messages()
            .front()
            .is_some_and(Message::has_tool_result)
            && !throwaway.checkpoint_data().is_empty()
        {
            eviction.take(&mut throwaway)?;
        }
        Ok(eviction)
    }
}

/// Leading checkpoints chosen for removal and the messages they span.
#[derive(Debug, Default)]
pub(crate) struct Eviction {
    checkpoints: usize,
    messages: Vec<Message>,
}

impl Eviction {
    fn take(&mut self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        let (_, messages) = exchange.pop_first_checkpoint()?;
        self.checkpoints += 1;
        self.messages.extend(messages);
        Ok(())
    }

    pub(crate) fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn checkpoint_count(&self) -> usize {
        self.checkpoints
    }

    /// Pop the planned checkpoints off the real exchange.
    pub(crate) fn apply(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        for _ in 0..self.checkpoints {
            exchange.pop_first_checkpoint()?;
        }
        Ok(())
    }
}

impl Moderator for TruncateModerator {
    fn name(&self) -> &'static str {
        "truncate"
    }

    fn rewrite<'a>(&'a mut self, exchange: &'a mut Exchange) -> ModeratorFuture<'a> {
        Box::pin(async move {
            self.update_system_prompt_token_count(exchange).await?;

            let total = exchange.checkpoint_data().total_token_count();
            if total < self.max_tokens {
                return Ok(());
            }

            let eviction = self.plan_eviction(exchange)?;
            info!(
                "Context at {total} tokens exceeds the {} token budget; dropping {} oldest message(s)",
                self.max_tokens,
                eviction.messages().len()
            );
            eviction.apply(exchange)?;
            Ok::<(), ExchangeError>(())
        })
    }

    fn boxed_clone(&self) -> Box<dyn Moderator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::error::ProviderError;
    use crate::message::{Content, Role, ToolResult, ToolUse};
    use crate::providers::{CompletionRequest, Provider, ProviderFuture};
    use crate::usage::Usage;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Charges a flat overhead per request plus ten tokens per message.
    #[derive(Debug, Default)]
    struct Flat {
        probes: Mutex<Vec<(String, String)>>,
    }

    impl Provider for Flat {
        fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderFuture<'a> {
            Box::pin(async move {
                let overhead = 50 + request.system.len() as u64;
                if request.messages.len() == 1 && request.messages[0].text() == "a" {
                    self.probes
                        .lock()
                        .unwrap()
                        .push((request.model.to_string(), request.system.to_string()));
                    return Ok::<_, ProviderError>((
                        Message::assistant("probe"),
                        Usage::of(overhead + 1, 3, overhead + 1),
                    ));
                }
                let input = overhead + 10 * request.messages.len() as u64;
                Ok((Message::assistant("ok"), Usage::of(input, 10, input + 10)))
            })
        }
    }

    fn seeded(provider: Arc<Flat>, turns: usize, tokens_per_message: i64) -> Exchange {
        let mut messages = Vec::new();
        let mut data = CheckpointData::new();
        for i in 0..turns * 2 {
            messages.push(if i % 2 == 0 {
                Message::user(format!("q{i}"))
            } else {
                Message::assistant(format!("a{i}"))
            });
            data.push(Checkpoint::new(i, i, tokens_per_message)).unwrap();
        }
        data.set_total_token_count(tokens_per_message * (turns * 2) as i64);
        Exchange::builder(provider, "test-model")
            .with_system("sys")
            .with_moderator(PassiveModerator)
            .with_messages(messages)
            .with_checkpoint_data(data)
            .build()
    }

    #[tokio::test]
    async fn probe_runs_once_per_model_and_system() {
        let provider = Arc::new(Flat::default());
        let mut ex = seeded(provider.clone(), 1, 5);
        let mut moderator = TruncateModerator::new(1000);

        moderator.update_system_prompt_token_count(&mut ex).await.unwrap();
        assert_eq!(moderator.system_prompt_token_count(), 53);
        assert_eq!(ex.checkpoint_data().total_token_count(), 10 + 53);

        moderator.update_system_prompt_token_count(&mut ex).await.unwrap();
        assert_eq!(provider.probes.lock().unwrap().len(), 1);

        let mut other = ex.replace().with_system("a longer system").build();
        moderator.update_system_prompt_token_count(&mut other).await.unwrap();
        assert_eq!(moderator.system_prompt_token_count(), 65);
        assert_eq!(other.checkpoint_data().total_token_count(), 63 - 53 + 65);
        assert_eq!(provider.probes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn probe_uses_model_override() {
        let provider = Arc::new(Flat::default());
        let mut ex = seeded(provider.clone(), 1, 5);
        let mut moderator = TruncateModerator::new(1000).with_model("cheap");
        moderator.update_system_prompt_token_count(&mut ex).await.unwrap();
        assert_eq!(provider.probes.lock().unwrap()[0].0, "cheap");
        assert_eq!(ex.model(), "test-model");
    }

    #[tokio::test]
    async fn under_budget_is_noop() {
        let provider = Arc::new(Flat::default());
        let mut ex = seeded(provider, 3, 10);
        let mut moderator = TruncateModerator::new(1000);
        moderator.rewrite(&mut ex).await.unwrap();
        assert_eq!(ex.messages().len(), 6);
    }

    #[tokio::test]
    async fn over_budget_drops_oldest_checkpoints() {
        let provider = Arc::new(Flat::default());
        let mut ex = seeded(provider, 5, 40);
        ex.add(Message::user("latest")).unwrap();
        let mut moderator = TruncateModerator::new(300);

        // 400 seeded + 53 measured overhead
        moderator.rewrite(&mut ex).await.unwrap();
        assert!(ex.checkpoint_data().total_token_count() <= 300);
        assert_eq!(ex.messages().len(), 7);
        assert_eq!(ex.messages()[0].text(), "q4");
        assert_eq!(ex.checkpoint_data().offset(), 4);
        assert!(ex.checkpoint_data().is_consistent_with(ex.messages().len()));
        assert!(ex.is_allowed_to_call_llm());
    }

    #[test]
    fn plan_eviction_leaves_exchange_untouched() {
        let provider = Arc::new(Flat::default());
        let ex = seeded(provider, 4, 50);
        let moderator = TruncateModerator::new(200);
        let eviction = moderator.plan_eviction(&ex).unwrap();
        assert_eq!(eviction.checkpoint_count(), 4);
        assert_eq!(eviction.messages().len(), 4);
        assert_eq!(ex.messages().len(), 8);
        assert_eq!(ex.checkpoint_data().total_token_count(), 400);
    }

    #[tokio::test]
    async fn exhausted_ledger_with_wide_last_checkpoint_stops_cleanly() {
        let provider = Arc::new(Flat::default());
        let messages = vec![
            Message::user("u0"),
            Message::assistant("a1"),
            Message::user("u2"),
            Message::new(
                Role::Assistant,
                vec![Content::ToolUse(ToolUse::new("t1", "lookup", json!({})))],
            )
            .unwrap(),
            Message::new(
                Role::User,
                vec![Content::ToolResult(ToolResult {
                    tool_use_id: "t1".into(),
                    output: "found".into(),
                    is_error: false,
                })],
            )
            .unwrap(),
            Message::assistant("after the tool"),
        ];
        let mut data = CheckpointData::new();
        data.push(Checkpoint::new(0, 0, 10)).unwrap();
        data.push(Checkpoint::new(1, 1, 10)).unwrap();
        data.push(Checkpoint::new(2, 4, 30)).unwrap();
        data.set_total_token_count(50);
        let mut ex = Exchange::builder(provider, "test-model")
            .with_system("sys")
            .with_moderator(PassiveModerator)
            .with_messages(messages)
            .with_checkpoint_data(data)
            .build();

        // 50 seeded + 53 measured overhead; no amount of eviction gets under 10
        let mut moderator = TruncateModerator::new(10);
        moderator.rewrite(&mut ex).await.unwrap();

        let texts: Vec<_> = ex.messages().iter().map(Message::text).collect();
        assert_eq!(texts, vec!["after the tool"]);
        assert!(ex.checkpoint_data().is_empty());
        assert_eq!(ex.checkpoint_data().offset(), 0);
        assert_eq!(ex.checkpoint_data().total_token_count(), 53);
        assert!(ex.checkpoint_data().is_consistent_with(ex.messages().len()));
    }
}
