//! Ledger-aware edits to the message log.
//!
//! Every operation here keeps [`CheckpointData`](crate::checkpoint::CheckpointData)
//! consistent with the log: checkpoints address only messages that exist,
//! front removals advance the offset, and an emptied ledger resets it.

use super::Exchange;
use crate::checkpoint::Checkpoint;
use crate::error::ExchangeError;
use crate::message::{Content, Message, Role};
use crate::usage::Usage;
use tracing::{debug, trace};

impl Exchange {
    /// Attribute a completion's usage to the messages it covered.
    ///
    /// Called right after the provider's reply is appended. Everything after
    /// the last checkpoint except that reply is charged the growth in input
    /// tokens since the previous call; the reply itself is charged the output
    /// tokens. The running total is then replaced by the reported total.
    pub fn add_checkpoints_from_usage(&mut self, usage: &Usage) -> Result<(), ExchangeError> {
        let len = self.messages.len();
        if len == 0 {
            return Err(ExchangeError::LedgerDesync(
                "cannot checkpoint an empty message log".into(),
            ));
        }
        let new_start = match self.checkpoint_data.last_message_index()? {
            Some(last) => last + 1,
            None => 0,
        };
        if new_start > len - 1 {
            return Err(ExchangeError::LedgerDesync(format!(
                "last checkpoint ends at {} but the reply is at {}",
                new_start as i64 - 1,
                len - 1
            )));
        }

        let input = usage.input_tokens.unwrap_or(0) as i64;
        let output = usage.output_tokens.unwrap_or(0) as i64;
        let first_block = input - self.checkpoint_data.total_token_count();

        let data = &mut self.checkpoint_data;
        if len - new_start > 1 {
            data.push(Checkpoint::new(
                data.logical(new_start),
                data.logical(len - 2),
                first_block,
            ))?;
        }
        data.push(Checkpoint::new(
            data.logical(len - 1),
            data.logical(len - 1),
            output,
        ))?;
        data.set_total_token_count(usage.total_tokens.unwrap_or(0) as i64);
        trace!(
            "Checkpointed messages {}..{} (+{first_block}) and {} (+{output}); total {}",
            new_start,
            len - 2,
            len - 1,
            data.total_token_count()
        );
        Ok(())
    }

    /// Remove the newest message. If it closed the last checkpoint, that
    /// checkpoint is dropped too since its count no longer applies.
    pub fn pop_last_message(&mut self) -> Result<Message, ExchangeError> {
        let Some(last_physical) = self.messages.len().checked_sub(1) else {
            return Err(ExchangeError::NoMessages);
        };
        match self.checkpoint_data.last_message_index()? {
            Some(idx) if idx > last_physical => {
                return Err(ExchangeError::LedgerDesync(format!(
                    "last checkpoint ends at message {idx} but the log has {} messages",
                    self.messages.len()
                )));
            }
            Some(idx) if idx == last_physical => {
                self.checkpoint_data.pop_back();
            }
            _ => {}
        }
        self.messages.pop_back().ok_or(ExchangeError::NoMessages)
    }

    /// Remove the oldest message, dropping the first checkpoint if it began
    /// there.
    pub fn pop_first_message(&mut self) -> Result<Message, ExchangeError> {
        if self.messages.is_empty() {
            return Err(ExchangeError::NoMessages);
        }
        let Some(first) = self.checkpoint_data.first().copied() else {
            return Err(ExchangeError::NoCheckpointForFirstMessage);
        };
        if self.checkpoint_data.physical(first.start_index)? == 0 {
            self.checkpoint_data.pop_front();
        }
        let message = self.messages.pop_front().ok_or(ExchangeError::NoMessages)?;
        self.checkpoint_data.advance_offset();
        Ok(message)
    }

    /// Remove the newest checkpoint and every message it spans. Messages are
    /// returned oldest first.
    pub fn pop_last_checkpoint(&mut self) -> Result<(Checkpoint, Vec<Message>), ExchangeError> {
        let Some(last) = self.checkpoint_data.last().copied() else {
            return Err(ExchangeError::NoCheckpoints);
        };
        let start = self.checkpoint_data.physical(last.start_index)?;
        let checkpoint = self
            .checkpoint_data
            .pop_back()
            .ok_or(ExchangeError::NoCheckpoints)?;

        let mut removed = Vec::new();
        while self.messages.len() > start {
            if let Some(message) = self.messages.pop_back() {
                removed.push(message);
            }
        }
        removed.reverse();
        debug!(
            "Popped last checkpoint {}..={} ({} messages, {} tokens)",
            checkpoint.start_index,
            checkpoint.end_index,
            removed.len(),
            checkpoint.token_count
        );
        Ok((checkpoint, removed))
    }

    /// Remove the oldest checkpoint and every message up to its end.
    pub fn pop_first_checkpoint(&mut self) -> Result<(Checkpoint, Vec<Message>), ExchangeError> {
        let Some(first) = self.checkpoint_data.first().copied() else {
            return Err(ExchangeError::NoCheckpoints);
        };
        let end = self.checkpoint_data.physical(first.end_index)?;
        if end >= self.messages.len() {
            return Err(ExchangeError::LedgerDesync(format!(
                "first checkpoint ends at message {end} but the log has {} messages",
                self.messages.len()
            )));
        }
        let checkpoint = self
            .checkpoint_data
            .pop_front()
            .ok_or(ExchangeError::NoCheckpoints)?;

        let removed: Vec<Message> = self.messages.drain(..=end).collect();
        for _ in 0..removed.len() {
            self.checkpoint_data.advance_offset();
        }
        debug!(
            "Popped first checkpoint {}..={} ({} messages, {} tokens)",
            checkpoint.start_index,
            checkpoint.end_index,
            removed.len(),
            checkpoint.token_count
        );
        Ok((checkpoint, removed))
    }

    /// Insert a message at the head of the log as its own checkpoint worth
    /// `token_count` tokens.
    ///
    /// The running total is left unchanged until the next reported usage.
    pub fn prepend_checkpointed_message(
        &mut self,
        message: Message,
        token_count: i64,
    ) -> Result<(), ExchangeError> {
        if let Some(head) = self.messages.front()
            && head.role() == message.role()
        {
            return Err(ExchangeError::RoleAlternation {
                role: message.role(),
            });
        }
        let index = self.checkpoint_data.retreat_offset();
        self.checkpoint_data
            .push_front(Checkpoint::new(index, index, token_count))?;
        self.messages.push_front(message);
        Ok(())
    }

    /// Drop the unfinished turn: pop until the newest message is user text,
    /// then pop that too so the caller can ask for fresh input.
    pub fn rewind(&mut self) -> Result<(), ExchangeError> {
        while let Some(last) = self.messages.back() {
            let is_user_text = last.role() == Role::User
                && matches!(last.content().last(), Some(Content::Text { .. }));
            if is_user_text {
                break;
            }
            self.pop_last_message()?;
        }
        if !self.messages.is_empty() {
            self.pop_last_message()?;
        }
        debug!(
            "Rewound exchange to {} messages, {} checkpoints",
            self.messages.len(),
            self.checkpoint_data.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointData;
    use crate::error::ProviderError;
    use crate::message::{ToolResult, ToolUse};
    use crate::moderators::PassiveModerator;
    use crate::providers::{CompletionRequest, Provider, ProviderFuture};
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Unused;

    impl Provider for Unused {
        fn complete<'a>(&'a self, _request: CompletionRequest<'a>) -> ProviderFuture<'a> {
            Box::pin(async { Err::<(Message, Usage), _>(ProviderError::Api("offline".into())) })
        }
    }

    fn empty() -> Exchange {
        Exchange::builder(Arc::new(Unused), "test-model")
            .with_moderator(PassiveModerator)
            .build()
    }

    /// Simulate `generate`: append the reply, then account for it.
    fn turn(ex: &mut Exchange, user: Message, reply: Message, usage: Usage) {
        ex.add(user).unwrap();
        ex.add(reply).unwrap();
        ex.add_checkpoints_from_usage(&usage).unwrap();
    }

    fn conversation(turns: usize) -> Exchange {
        let mut ex = empty();
        let mut total = 0;
        for i in 0..turns {
            let input = total + 10;
            turn(
                &mut ex,
                Message::user(format!("question {i}")),
                Message::assistant(format!("answer {i}")),
                Usage::of(input, 5, input + 5),
            );
            total = input + 5;
        }
        ex
    }

    fn spans(ex: &Exchange) -> Vec<(usize, usize, i64)> {
        ex.checkpoint_data()
            .checkpoints()
            .map(|c| (c.start_index, c.end_index, c.token_count))
            .collect()
    }

    #[test]
    fn usage_splits_into_two_checkpoints() {
        let ex = conversation(2);
        assert_eq!(spans(&ex), vec![(0, 0, 10), (1, 1, 5), (2, 2, 10), (3, 3, 5)]);
        assert_eq!(ex.checkpoint_data().total_token_count(), 30);
    }

    #[test]
    fn usage_covers_multiple_unaccounted_messages() {
        let mut ex = empty();
        ex.add(Message::user("a")).unwrap();
        ex.add(Message::assistant("b")).unwrap();
        ex.add(Message::user("c")).unwrap();
        ex.add(Message::assistant("d")).unwrap();
        ex.add_checkpoints_from_usage(&Usage::of(30, 4, 34)).unwrap();
        assert_eq!(spans(&ex), vec![(0, 2, 30), (3, 3, 4)]);
    }

    #[test]
    fn usage_without_new_message_is_desync() {
        let mut ex = conversation(1);
        let err = ex.add_checkpoints_from_usage(&Usage::of(1, 1, 2)).unwrap_err();
        assert!(matches!(err, ExchangeError::LedgerDesync(_)));
        assert!(empty().add_checkpoints_from_usage(&Usage::default()).is_err());
    }

    #[test]
    fn pop_last_message_drops_closing_checkpoint() {
        let mut ex = conversation(2);
        let popped = ex.pop_last_message().unwrap();
        assert_eq!(popped.text(), "answer 1");
        assert_eq!(ex.checkpoint_data().len(), 3);
        assert_eq!(ex.checkpoint_data().total_token_count(), 25);

        ex.add(Message::assistant("unaccounted")).unwrap();
        ex.pop_last_message().unwrap();
        assert_eq!(ex.checkpoint_data().len(), 3);
    }

    #[test]
    fn pop_last_message_on_empty_fails() {
        assert!(matches!(
            empty().pop_last_message(),
            Err(ExchangeError::NoMessages)
        ));
    }

    #[test]
    fn pop_first_message_requires_checkpoint() {
        let mut ex = empty();
        assert!(matches!(
            ex.pop_first_message(),
            Err(ExchangeError::NoMessages)
        ));
        ex.add(Message::user("hi")).unwrap();
        assert!(matches!(
            ex.pop_first_message(),
            Err(ExchangeError::NoCheckpointForFirstMessage)
        ));
    }

    #[test]
    fn pop_first_message_advances_offset() {
        let mut ex = empty();
        ex.add(Message::user("a")).unwrap();
        ex.add(Message::assistant("b")).unwrap();
        ex.add(Message::user("c")).unwrap();
        ex.add(Message::assistant("d")).unwrap();
        ex.add_checkpoints_from_usage(&Usage::of(30, 4, 34)).unwrap();

        ex.pop_first_message().unwrap();
        assert_eq!(ex.checkpoint_data().offset(), 1);
        assert_eq!(ex.checkpoint_data().len(), 1);
        assert_eq!(ex.checkpoint_data().total_token_count(), 4);
        assert!(ex.checkpoint_data().is_consistent_with(ex.messages().len()));

        ex.pop_first_message().unwrap();
        ex.pop_first_message().unwrap();
        assert_eq!(ex.checkpoint_data().offset(), 3);
        ex.pop_first_message().unwrap();
        assert!(ex.messages().is_empty());
        assert_eq!(ex.checkpoint_data().offset(), 0);
    }

    #[test]
    fn pop_last_checkpoint_returns_messages_in_order() {
        let mut ex = empty();
        ex.add(Message::user("a")).unwrap();
        ex.add(Message::assistant("b")).unwrap();
        ex.add(Message::user("c")).unwrap();
        ex.add(Message::assistant("d")).unwrap();
        ex.add_checkpoints_from_usage(&Usage::of(30, 4, 34)).unwrap();

        let (cp, messages) = ex.pop_last_checkpoint().unwrap();
        assert_eq!((cp.start_index, cp.end_index), (3, 3));
        assert_eq!(messages.len(), 1);

        let (cp, messages) = ex.pop_last_checkpoint().unwrap();
        assert_eq!((cp.start_index, cp.end_index), (0, 2));
        let texts: Vec<_> = messages.iter().map(Message::text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(ex.messages().is_empty());
        assert_eq!(ex.checkpoint_data().total_token_count(), 0);
        assert!(matches!(
            ex.pop_last_checkpoint(),
            Err(ExchangeError::NoCheckpoints)
        ));
    }

    #[test]
    fn pop_first_checkpoint_removes_span() {
        let mut ex = conversation(3);
        let (cp, messages) = ex.pop_first_checkpoint().unwrap();
        assert_eq!(cp, Checkpoint::new(0, 0, 10));
        assert_eq!(messages[0].text(), "question 0");
        assert_eq!(ex.checkpoint_data().offset(), 1);
        assert_eq!(ex.messages().len(), 5);
        assert_eq!(ex.checkpoint_data().total_token_count(), 45 - 10);

        while !ex.checkpoint_data().is_empty() {
            ex.pop_first_checkpoint().unwrap();
            assert!(ex.checkpoint_data().is_consistent_with(ex.messages().len()));
        }
        assert!(ex.messages().is_empty());
        assert_eq!(ex.checkpoint_data().offset(), 0);
        assert!(matches!(
            ex.pop_first_checkpoint(),
            Err(ExchangeError::NoCheckpoints)
        ));
    }

    #[test]
    fn pop_first_checkpoint_checks_log_before_editing() {
        let mut data = CheckpointData::new();
        data.push(Checkpoint::new(0, 2, 30)).unwrap();
        data.set_total_token_count(30);
        let mut ex = empty()
            .replace()
            .with_messages([Message::user("a"), Message::assistant("b")])
            .with_checkpoint_data(data.clone())
            .build();

        let err = ex.pop_first_checkpoint().unwrap_err();
        assert!(matches!(err, ExchangeError::LedgerDesync(_)));
        assert_eq!(ex.messages().len(), 2);
        assert_eq!(ex.checkpoint_data(), &data);
    }

    #[test]
    fn prepend_then_pop_first_checkpoint_restores_log() {
        let mut ex = conversation(2);
        ex.pop_first_checkpoint().unwrap();
        ex.pop_first_checkpoint().unwrap();
        let messages_before: Vec<_> = ex.messages().iter().cloned().collect();
        let spans_before = spans(&ex);
        let total_before = ex.checkpoint_data().total_token_count();

        ex.prepend_checkpointed_message(Message::assistant("summary"), 7)
            .unwrap();
        assert_eq!(ex.messages()[0].text(), "summary");
        assert_eq!(ex.checkpoint_data().first(), Some(&Checkpoint::new(1, 1, 7)));
        assert_eq!(ex.checkpoint_data().offset(), 1);
        assert_eq!(ex.checkpoint_data().total_token_count(), total_before);
        assert!(ex.checkpoint_data().is_consistent_with(ex.messages().len()));

        let (cp, removed) = ex.pop_first_checkpoint().unwrap();
        assert_eq!(cp.token_count, 7);
        assert_eq!(removed[0].text(), "summary");
        assert_eq!(ex.messages().iter().cloned().collect::<Vec<_>>(), messages_before);
        assert_eq!(spans(&ex), spans_before);
        assert_eq!(ex.checkpoint_data().offset(), 2);
        // popping always subtracts, so the never-added summary cost comes off
        assert_eq!(ex.checkpoint_data().total_token_count(), total_before - 7);
    }

    #[test]
    fn prepend_at_zero_offset_shifts_ledger() {
        let mut ex = conversation(1);
        ex.pop_first_message().unwrap();
        assert_eq!(ex.checkpoint_data().offset(), 1);
        ex.prepend_checkpointed_message(Message::user("summary"), 3)
            .unwrap();
        assert_eq!(ex.checkpoint_data().offset(), 0);

        ex.prepend_checkpointed_message(Message::assistant("older"), 2)
            .unwrap();
        assert_eq!(spans(&ex), vec![(0, 0, 2), (1, 1, 3), (2, 2, 5)]);
        assert!(ex.checkpoint_data().is_consistent_with(3));
    }

    #[test]
    fn prepend_on_empty_exchange() {
        let mut ex = empty();
        ex.prepend_checkpointed_message(Message::user("summary"), 12)
            .unwrap();
        assert_eq!(spans(&ex), vec![(0, 0, 12)]);
        assert_eq!(ex.checkpoint_data().total_token_count(), 0);
        assert_eq!(ex.checkpoint_data().offset(), 0);
    }

    #[test]
    fn prepend_rejects_same_role_as_head() {
        let mut ex = conversation(1);
        let err = ex
            .prepend_checkpointed_message(Message::user("summary"), 1)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::RoleAlternation { .. }));
        assert_eq!(ex.messages().len(), 2);
    }

    #[test]
    fn rewind_drops_dangling_tool_turn() {
        let mut ex = conversation(1);
        ex.add(Message::user("run the tool")).unwrap();
        ex.add(
            Message::new(
                Role::Assistant,
                vec![Content::ToolUse(ToolUse::new("t", "dummy", json!({})))],
            )
            .unwrap(),
        )
        .unwrap();
        ex.add_checkpoints_from_usage(&Usage::of(30, 5, 35)).unwrap();
        ex.add(
            Message::new(
                Role::User,
                vec![Content::ToolResult(ToolResult {
                    tool_use_id: "t".into(),
                    output: "done".into(),
                    is_error: false,
                })],
            )
            .unwrap(),
        )
        .unwrap();

        ex.rewind().unwrap();
        assert_eq!(ex.messages().len(), 2);
        assert_eq!(ex.messages().back().unwrap().text(), "answer 0");
        assert_eq!(ex.checkpoint_data().len(), 2);
        assert!(ex.checkpoint_data().is_consistent_with(2));
    }

    #[test]
    fn rewind_on_empty_is_noop() {
        let mut ex = empty();
        ex.rewind().unwrap();
        assert!(ex.messages().is_empty());
    }

    #[test]
    fn restored_ledger_is_respected() {
        let mut data = CheckpointData::new();
        data.push(Checkpoint::new(0, 1, 20)).unwrap();
        data.set_total_token_count(20);
        let mut ex = empty()
            .replace()
            .with_messages([Message::user("a"), Message::assistant("b")])
            .with_checkpoint_data(data)
            .build();
        ex.add(Message::user("c")).unwrap();
        ex.add(Message::assistant("d")).unwrap();
        ex.add_checkpoints_from_usage(&Usage::of(26, 3, 29)).unwrap();
        assert_eq!(spans(&ex), vec![(0, 1, 20), (2, 2, 6), (3, 3, 3)]);
    }
}
