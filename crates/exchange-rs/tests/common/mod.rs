//! Mock providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use exchange_rs::prelude::*;
use serde_json::json;

pub const MODEL: &str = "gpt-4o-2024-05-13";
pub const SYSTEM: &str = "You are a helpful assistant.";

// ── Scripted provider ────────────────────────────────────────────────

/// Replies with queued `(message, usage)` pairs in order and counts calls.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<(Message, Usage)>>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<(Message, Usage)>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Provider for ScriptedProvider {
    fn complete<'a>(&'a self, _request: CompletionRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Api("script exhausted".into()))
        })
    }
}

pub fn tool_request(id: &str, name: &str, parameters: serde_json::Value) -> Message {
    Message::new(
        Role::Assistant,
        vec![Content::ToolUse(ToolUse::new(id, name, parameters))],
    )
    .unwrap()
}

pub fn tool_response(id: &str, output: &str) -> Message {
    Message::new(
        Role::User,
        vec![Content::ToolResult(ToolResult {
            tool_use_id: id.to_string(),
            output: output.to_string(),
            is_error: false,
        })],
    )
    .unwrap()
}

pub fn dummy_tool() -> FnTool {
    FnTool::new(
        ToolDef::new("dummy_tool", "An example tool", json!({"type": "object"})),
        |_: serde_json::Value| async { Ok("dummy response") },
    )
}

/// `(start, end)` of every checkpoint.
pub fn index_pairs(exchange: &Exchange) -> Vec<(usize, usize)> {
    exchange
        .checkpoint_data()
        .checkpoints()
        .map(|cp| (cp.start_index, cp.end_index))
        .collect()
}

pub fn assert_alternates(exchange: &Exchange) {
    let messages = exchange.messages();
    for i in 1..messages.len() {
        assert_ne!(
            messages[i - 1].role(),
            messages[i].role(),
            "messages {} and {i} share a role",
            i - 1
        );
    }
}

pub fn assert_ledger_consistent(exchange: &Exchange) {
    assert!(
        exchange
            .checkpoint_data()
            .is_consistent_with(exchange.messages().len()),
        "ledger {:?} out of step with {} messages",
        exchange.checkpoint_data(),
        exchange.messages().len()
    );
}

// ── Scripted homework conversation ───────────────────────────────────

pub const SYSTEM_PROMPT_TOKENS: u64 = 100;
pub const SUMMARY_TEXT: &str = "Summary message here";

/// A 30-message conversation: even indices are user turns, odd indices the
/// assistant's scripted replies.
pub fn conversation() -> Vec<Message> {
    let call = |id: &str, name: &str, params: serde_json::Value| tool_request(id, name, params);
    vec![
        Message::user("Hi, can you help me with my homework?"),
        Message::assistant("Of course! What do you need help with?"),
        Message::user("I need help with math problems."),
        Message::assistant("Sure, I can help with that. Let's get started."),
        Message::user("What is 2 + 2, 3*3, 9/5, 2*20, 14/2?"),
        call("1", "add", json!({"a": 2, "b": 2})),
        tool_response("1", "4"),
        call("2", "multiply", json!({"a": 3, "b": 3})),
        tool_response("2", "9"),
        call("3", "divide", json!({"a": 9, "b": 5})),
        tool_response("3", "1.8"),
        call("4", "multiply", json!({"a": 2, "b": 20})),
        tool_response("4", "40"),
        call("5", "divide", json!({"a": 14, "b": 2})),
        tool_response("5", "7"),
        Message::assistant("I'm done calculating the answers to your math questions."),
        Message::user("Can you also help with my science homework?"),
        Message::assistant("Yes, I can help with science too."),
        Message::user(
            "What is the speed of light? The frequency of a photon? The mass of an electron?",
        ),
        call("6", "speed_of_light", json!({})),
        tool_response("6", "299,792,458 m/s"),
        call("7", "photon_frequency", json!({})),
        tool_response("7", "2.418 x 10^14 Hz"),
        call("8", "electron_mass", json!({})),
        tool_response("8", "9.10938356 x 10^-31 kg"),
        Message::assistant("I'm done calculating the answers to your science questions."),
        Message::user("That's great! How about history?"),
        Message::assistant("Of course, I can help with history as well."),
        Message::user("Thanks! You're very helpful."),
        Message::assistant("You're welcome! I'm here to help."),
    ]
}

/// Tool messages cost 10 tokens, text messages two per character.
fn message_cost(message: &Message) -> u64 {
    if message.has_tool_use() || message.has_tool_result() {
        10
    } else {
        message.text().chars().count() as u64 * 2
    }
}

#[derive(Debug)]
struct LinearState {
    next: usize,
    summarize_next: bool,
    summarized_count: usize,
}

/// Walks the assistant side of [`conversation`], charging a fixed
/// 100-token system prompt plus [`message_cost`] for every message sent.
///
/// The one-message `"a"` probe reports exactly 101 tokens. With
/// `summarize_over` set, the call after any completion above that total
/// answers with [`SUMMARY_TEXT`] instead of advancing the script.
#[derive(Debug)]
pub struct LinearProvider {
    script: Vec<Message>,
    summarize_over: Option<u64>,
    state: Mutex<LinearState>,
}

impl LinearProvider {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn summarizing_over(total: u64) -> Arc<Self> {
        Self::build(Some(total))
    }

    fn build(summarize_over: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            script: conversation(),
            summarize_over,
            state: Mutex::new(LinearState {
                next: 1,
                summarize_next: false,
                summarized_count: 0,
            }),
        })
    }

    pub fn summarized_count(&self) -> usize {
        self.state.lock().unwrap().summarized_count
    }

    fn reply(&self, messages: &[Message]) -> Result<(Message, Usage), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.summarize_next {
            state.summarize_next = false;
            state.summarized_count += 1;
            let output = SUMMARY_TEXT.len() as u64 * 2;
            return Ok((
                Message::assistant(SUMMARY_TEXT),
                Usage::of(40, output, 40 + output),
            ));
        }

        if messages.first().is_some_and(Message::has_tool_result) {
            return Err(ProviderError::Api(
                "ToolResult should not be the first message".into(),
            ));
        }
        if messages.len() == 1 && messages[0].text() == "a" {
            return Ok((
                Message::assistant("Getting system prompt size"),
                Usage::of(80 + 1, 20, SYSTEM_PROMPT_TOKENS + 1),
            ));
        }

        let message = self
            .script
            .get(state.next)
            .cloned()
            .ok_or_else(|| ProviderError::Api("conversation script exhausted".into()))?;
        let input = SYSTEM_PROMPT_TOKENS + messages.iter().map(message_cost).sum::<u64>();
        let output = message_cost(&message);
        let total = input + output;
        if self.summarize_over.is_some_and(|limit| total > limit) {
            state.summarize_next = true;
        }
        state.next += 2;
        Ok((message, Usage::of(input, output, total)))
    }
}

impl Provider for LinearProvider {
    fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move { self.reply(request.messages) })
    }
}

/// Feed every user turn of [`conversation`] through `generate`, checking
/// alternation and ledger consistency after each call.
pub async fn drive_conversation(exchange: &mut Exchange, mut after_each: impl FnMut(&Exchange)) {
    let script = conversation();
    let mut i = 0;
    while i < script.len() {
        exchange.add(script[i].clone()).unwrap();
        let message = exchange.generate().await.unwrap();
        if message.text() != SUMMARY_TEXT {
            i += 2;
        }
        assert_alternates(exchange);
        assert_ledger_consistent(exchange);
        after_each(exchange);
    }
}
