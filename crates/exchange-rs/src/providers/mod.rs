//! Model providers.
//!
//! A [`Provider`] turns a system prompt, message log and tool definitions
//! into one assistant [`Message`] plus the [`Usage`] it cost. The exchange
//! treats providers as opaque; wire-format translation and retries live in
//! the implementations.

pub mod openrouter;
pub mod retry;

use crate::config::GenerationArgs;
use crate::error::{InvalidChoice, ProviderError};
use crate::message::Message;
use crate::tools::ToolDef;
use crate::usage::Usage;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use openrouter::OpenRouterProvider;

/// Boxed future returned by [`Provider::complete`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(Message, Usage), ProviderError>> + Send + 'a>>;

/// Borrowed view of everything a completion needs.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDef],
    pub generation: &'a GenerationArgs,
}

pub trait Provider: Send + Sync + fmt::Debug {
    fn complete<'a>(&'a self, request: CompletionRequest<'a>) -> ProviderFuture<'a>;
}

// ── Registry ───────────────────────────────────────────────────────

/// Constructs a provider from the process environment.
pub type ProviderFactory = fn() -> Result<Arc<dyn Provider>, ProviderError>;

fn openrouter_from_env() -> Result<Arc<dyn Provider>, ProviderError> {
    Ok(Arc::new(OpenRouterProvider::from_env()?))
}

const PROVIDERS: &[(&str, ProviderFactory)] = &[("openrouter", openrouter_from_env)];

/// Registered provider names.
pub fn provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|(name, _)| *name).collect()
}

/// Look up a provider factory by name.
pub fn provider_by_name(name: &str) -> Result<ProviderFactory, InvalidChoice> {
    PROVIDERS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, factory)| *factory)
        .ok_or_else(|| InvalidChoice {
            kind: "provider",
            name: name.to_string(),
            choices: provider_names(),
        })
}
