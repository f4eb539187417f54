//! Context moderators.
//!
//! A [`Moderator`] runs before every `generate` and may evict or rewrite
//! history to keep the exchange within a token budget. Whatever it does, it
//! must leave the log ending on a user message with roles alternating.
//!
//! | Name         | Strategy                                         |
//! |--------------|--------------------------------------------------|
//! | `passive`    | never touches the exchange                       |
//! | `truncate`   | drops the oldest checkpoints (FIFO)              |
//! | `summarizer` | replaces the oldest checkpoints with a summary   |

pub mod passive;
pub mod summarizer;
pub mod truncate;

pub use passive::PassiveModerator;
pub use summarizer::{SUMMARIZER_PROMPT, SummarizerModerator};
pub use truncate::TruncateModerator;

use crate::error::{ExchangeError, InvalidChoice};
use crate::exchange::Exchange;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Moderator::rewrite`].
pub type ModeratorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), ExchangeError>> + Send + 'a>>;

pub trait Moderator: Send + Sync + fmt::Debug {
    /// Registry key for this strategy.
    fn name(&self) -> &'static str;

    /// Bring `exchange` back under budget before the next model call.
    fn rewrite<'a>(&'a mut self, exchange: &'a mut Exchange) -> ModeratorFuture<'a>;

    /// Clone including any cached state.
    fn boxed_clone(&self) -> Box<dyn Moderator>;

    /// For inspecting concrete moderator state.
    fn as_any(&self) -> &dyn Any;
}

// ── Registry ───────────────────────────────────────────────────────

/// Builds a moderator from a token budget and an optional model override.
pub type ModeratorFactory = fn(i64, Option<String>) -> Box<dyn Moderator>;

fn passive(_max_tokens: i64, _model: Option<String>) -> Box<dyn Moderator> {
    Box::new(PassiveModerator)
}

fn truncate(max_tokens: i64, model: Option<String>) -> Box<dyn Moderator> {
    let moderator = TruncateModerator::new(max_tokens);
    Box::new(match model {
        Some(model) => moderator.with_model(model),
        None => moderator,
    })
}

fn summarizer(max_tokens: i64, model: Option<String>) -> Box<dyn Moderator> {
    let moderator = SummarizerModerator::new(max_tokens);
    Box::new(match model {
        Some(model) => moderator.with_model(model),
        None => moderator,
    })
}

const MODERATORS: &[(&str, ModeratorFactory)] = &[
    ("passive", passive),
    ("truncate", truncate),
    ("summarizer", summarizer),
];

/// Registered moderator names.
pub fn moderator_names() -> Vec<&'static str> {
    MODERATORS.iter().map(|(name, _)| *name).collect()
}

/// Construct a moderator by registry key.
pub fn moderator_by_name(
    name: &str,
    max_tokens: i64,
    model: Option<String>,
) -> Result<Box<dyn Moderator>, InvalidChoice> {
    MODERATORS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, factory)| factory(max_tokens, model))
        .ok_or_else(|| InvalidChoice {
            kind: "moderator",
            name: name.to_string(),
            choices: moderator_names(),
        })
}
