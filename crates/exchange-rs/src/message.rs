//! Conversation messages and their content parts.
//!
//! A [`Message`] is a single turn: a [`Role`] plus an ordered list of
//! [`Content`] parts. Messages are validated on construction (and on
//! deserialization) so that a user turn never carries a tool request and an
//! assistant turn never carries a tool result.

use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Role ───────────────────────────────────────────────────────────

/// Who produced a message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

// ── Content parts ──────────────────────────────────────────────────

/// A request from the model to invoke a tool.
///
/// `is_error` is set by provider translation when the request itself could
/// not be interpreted (bad function name, unparseable arguments); dispatch
/// then short-circuits with `error_message` instead of calling the tool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ToolUse {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters,
            is_error: false,
            error_message: None,
        }
    }

    /// A tool request that failed translation and must not be executed.
    pub fn errored(
        id: impl Into<String>,
        name: impl Into<String>,
        parameters: serde_json::Value,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters,
            is_error: true,
            error_message: Some(error_message.into()),
        }
    }
}

/// The output of a tool invocation, paired to its request by `tool_use_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

/// One part of a message body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    Text { text: String },
    ToolUse(ToolUse),
    ToolResult(ToolResult),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

// ── Message ────────────────────────────────────────────────────────

/// A single validated conversation turn.
///
/// Fields are read-only after construction; the exchange only ever appends
/// or removes whole messages.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "MessageRecord")]
pub struct Message {
    role: Role,
    id: String,
    created: i64,
    content: Vec<Content>,
}

/// Unvalidated wire shape; `id` and `created` are filled in when absent.
#[derive(Deserialize)]
struct MessageRecord {
    role: Role,
    #[serde(default = "new_message_id")]
    id: String,
    #[serde(default = "now_timestamp")]
    created: i64,
    content: Vec<Content>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = ExchangeError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        validate(record.role, &record.content)?;
        Ok(Self {
            role: record.role,
            id: record.id,
            created: record.created,
            content: record.content,
        })
    }
}

fn new_message_id() -> String {
    let hex: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(24)
        .collect();
    format!("msg_{hex}")
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn validate(role: Role, content: &[Content]) -> Result<(), ExchangeError> {
    let has_text = content.iter().any(|c| matches!(c, Content::Text { .. }));
    let has_use = content.iter().any(|c| matches!(c, Content::ToolUse(_)));
    let has_result = content.iter().any(|c| matches!(c, Content::ToolResult(_)));

    let reason = match role {
        Role::User if has_use => Some("user message must not contain a tool use"),
        Role::User if !(has_text || has_result) => {
            Some("user message must include a text or tool result part")
        }
        Role::Assistant if has_result => Some("assistant message must not contain a tool result"),
        Role::Assistant if !(has_text || has_use) => {
            Some("assistant message must include a text or tool use part")
        }
        _ => None,
    };

    match reason {
        Some(reason) => Err(ExchangeError::InvalidMessage { role, reason }),
        None => Ok(()),
    }
}

impl Message {
    /// Build a message from parts, checking the role/content invariant.
    pub fn new(role: Role, content: Vec<Content>) -> Result<Self, ExchangeError> {
        validate(role, &content)?;
        Ok(Self {
            role,
            id: new_message_id(),
            created: now_timestamp(),
            content,
        })
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            id: new_message_id(),
            created: now_timestamp(),
            content: vec![Content::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            id: new_message_id(),
            created: now_timestamp(),
            content: vec![Content::text(text)],
        }
    }

    /// A single-turn text message for whichever role is given.
    pub fn text_for(role: Role, text: impl Into<String>) -> Self {
        match role {
            Role::User => Self::user(text),
            Role::Assistant => Self::assistant(text),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unix timestamp (seconds) of creation.
    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }

    /// All text parts joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_use(&self) -> Vec<&ToolUse> {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::ToolUse(tu) => Some(tu),
                _ => None,
            })
            .collect()
    }

    pub fn tool_result(&self) -> Vec<&ToolResult> {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::ToolResult(tr) => Some(tr),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(|c| matches!(c, Content::ToolUse(_)))
    }

    pub fn has_tool_result(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, Content::ToolResult(_)))
    }

    /// Whether the final content part is plain text.
    pub fn ends_with_text(&self) -> bool {
        matches!(self.content.last(), Some(Content::Text { .. }))
    }
}
