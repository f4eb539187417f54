use super::{Moderator, ModeratorFuture};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use std::any::Any;

/// Leaves the exchange untouched. Used for scratch exchanges that must never
/// be pruned.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveModerator;

impl Moderator for PassiveModerator {
    fn name(&self) -> &'static str {
        "passive"
    }

    fn rewrite<'a>(&'a mut self, _exchange: &'a mut Exchange) -> ModeratorFuture<'a> {
        Box::pin(async { Ok::<(), ExchangeError>(()) })
    }

    fn boxed_clone(&self) -> Box<dyn Moderator> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
