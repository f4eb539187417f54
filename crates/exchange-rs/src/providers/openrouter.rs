//! OpenAI-compatible chat completions via [OpenRouter](https://openrouter.ai/).
//!
//! Translation is split into pure functions ([`messages_to_openai`],
//! [`tools_to_openai`], [`openai_response_to_message`],
//! [`usage_from_response`]) so it can be tested without a network.

use super::retry::{RetryConfig, retry_provider_call};
use super::{CompletionRequest, Provider, ProviderFuture};
use crate::error::ProviderError;
use crate::message::{Content, Message, Role, ToolUse};
use crate::tools::ToolDef;
use crate::usage::Usage;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Environment variable holding the API key.
pub const OPENROUTER_KEY_ENV: &str = "OPENROUTER_KEY";

// ── Translation ────────────────────────────────────────────────────

fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Convert the message log into OpenAI chat messages.
///
/// Tool results become separate `role: "tool"` messages following the turn
/// that carried them.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());
    for message in messages {
        let mut converted = serde_json::Map::new();
        converted.insert("role".into(), json!(message.role().to_string()));
        let mut tool_calls = Vec::new();
        let mut tool_messages = Vec::new();

        for content in message.content() {
            match content {
                Content::Text { text } => {
                    converted.insert("content".into(), json!(text));
                }
                Content::ToolUse(tool_use) => tool_calls.push(json!({
                    "id": tool_use.id,
                    "type": "function",
                    "function": {
                        "name": sanitize_function_name(&tool_use.name),
                        "arguments": tool_use.parameters.to_string(),
                    },
                })),
                Content::ToolResult(result) => tool_messages.push(json!({
                    "role": "tool",
                    "content": result.output,
                    "tool_call_id": result.tool_use_id,
                })),
            }
        }

        if !tool_calls.is_empty() {
            converted.insert("tool_calls".into(), Value::Array(tool_calls));
        }
        if converted.contains_key("content") || converted.contains_key("tool_calls") {
            wire.push(Value::Object(converted));
        }
        wire.extend(tool_messages);
    }
    wire
}

/// Convert tool definitions into OpenAI function specs. Names must be unique.
pub fn tools_to_openai(tools: &[ToolDef]) -> Result<Vec<Value>, ProviderError> {
    let mut seen = HashSet::new();
    tools
        .iter()
        .map(|tool| {
            if !seen.insert(tool.name.as_str()) {
                return Err(ProviderError::DuplicateTool(tool.name.clone()));
            }
            Ok(json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            }))
        })
        .collect()
}

/// Convert the first choice of a chat completion into an assistant message.
///
/// Tool calls with an invalid function name or unparseable arguments are
/// kept as errored [`ToolUse`] parts so dispatch can report them back to
/// the model.
pub fn openai_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = response
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::Parse("response has no choices".into()))?;

    let mut content = Vec::new();
    if let Some(text) = original.get("content").and_then(Value::as_str)
        && !text.is_empty()
    {
        content.push(Content::text(text));
    }

    let tool_calls = original
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for call in tool_calls {
        let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let arguments = call
            .pointer("/function/arguments")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let tool_use = if !is_valid_function_name(name) {
            ToolUse::errored(
                id,
                name,
                json!(arguments),
                format!(
                    "The provided function name '{name}' had invalid characters, \
                     it must match this regex [a-zA-Z0-9_-]+"
                ),
            )
        } else {
            match serde_json::from_str::<Value>(arguments) {
                Ok(parameters) => ToolUse::new(id, name, parameters),
                Err(_) => ToolUse::errored(
                    id,
                    name,
                    json!(arguments),
                    format!("Could not interpret tool use parameters for id {id}: {arguments}"),
                ),
            }
        };
        content.push(Content::ToolUse(tool_use));
    }

    Message::new(Role::Assistant, content)
        .map_err(|_| ProviderError::Parse("response contained neither text nor tool calls".into()))
}

/// Extract token usage, synthesizing the total when absent.
pub fn usage_from_response(response: &Value) -> Usage {
    let field = |name: &str| response.pointer(&format!("/usage/{name}")).and_then(Value::as_u64);
    Usage::new(
        field("prompt_tokens"),
        field("completion_tokens"),
        field("total_tokens"),
    )
}

/// Assemble the request body. Reasoning models in the `o1` family reject a
/// system message, so it is left out for them.
pub fn build_payload(request: &CompletionRequest<'_>) -> Result<Value, ProviderError> {
    let model_name = request.model.rsplit('/').next().unwrap_or(request.model);
    let mut messages = Vec::new();
    if !model_name.starts_with("o1") && !request.system.is_empty() {
        messages.push(json!({"role": "system", "content": request.system}));
    }
    messages.extend(messages_to_openai(request.messages));

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(tools_to_openai(request.tools)?);
    }
    if let Value::Object(generation) = serde_json::to_value(request.generation)
        .map_err(|e| ProviderError::Parse(format!("failed to encode generation args: {e}")))?
        && let Value::Object(body) = &mut payload
    {
        body.extend(generation);
    }
    Ok(payload)
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP provider for the OpenRouter chat completions API.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("referer", &self.referer)
            .field("title", &self.title)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_headers(api_key, "https://github.com/exchange-rs", "exchange-rs")
    }

    /// Read the key from `OPENROUTER_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var(OPENROUTER_KEY_ENV)
            .map_err(|_| ProviderError::Config(format!("{OPENROUTER_KEY_ENV} not set")))?;
        Self::new(api_key)
    }

    /// Create a provider with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent("exchange-rs/0.1")
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, payload: &Value) -> Result<Value, ProviderError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;
        if let Some(message) = parsed.pointer("/error/message").and_then(Value::as_str) {
            return Err(ProviderError::Api(message.to_string()));
        }
        Ok(parsed)
    }
}

impl Provider for OpenRouterProvider {
    fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            let payload = build_payload(&request)?;
            debug!(
                "LLM request: model={}, messages={}, tools={}",
                request.model,
                request.messages.len(),
                request.tools.len(),
            );
            trace!("Request payload size: {} bytes", payload.to_string().len());

            let response = retry_provider_call(&self.retry, || self.post(&payload)).await?;

            let usage = usage_from_response(&response);
            debug!("Token usage: {usage}");
            let message = openai_response_to_message(&response)?;
            debug!(
                "LLM output: {} chars text, {} tool call(s)",
                message.text().len(),
                message.tool_use().len()
            );
            Ok::<_, ProviderError>((message, usage))
        })
    }
}
