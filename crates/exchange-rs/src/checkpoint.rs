//! Token-accounting ledger over the message log.
//!
//! A [`Checkpoint`] records that a contiguous, inclusive run of messages cost
//! `token_count` tokens. Indices are *logical*: they stay stable while
//! messages are removed from the front of the log, and convert to positions
//! in the current log by subtracting [`CheckpointData::offset`].
//!
//! ```text
//! logical:   3   4   5   6
//! physical:  0   1   2   3        (offset = 3)
//!           [cp 3..4][cp 5..5][cp 6..6]
//! ```
//!
//! Every mutation keeps checkpoints sorted and non-overlapping, and resets
//! the offset to zero whenever the ledger empties.

use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Inclusive `[start_index, end_index]` run of messages and its token cost.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub start_index: usize,
    pub end_index: usize,
    pub token_count: i64,
}

impl Checkpoint {
    pub fn new(start_index: usize, end_index: usize, token_count: i64) -> Self {
        Self {
            start_index,
            end_index,
            token_count,
        }
    }

    /// Number of messages spanned.
    pub fn message_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }
}

/// Ordered checkpoints plus the provider-reported running total.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointData {
    total_token_count: i64,
    checkpoints: VecDeque<Checkpoint>,
    message_index_offset: usize,
}

impl CheckpointData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last reported total, adjusted by pops and prepends since.
    pub fn total_token_count(&self) -> i64 {
        self.total_token_count
    }

    pub fn set_total_token_count(&mut self, total: i64) {
        self.total_token_count = total;
    }

    pub fn adjust_total_token_count(&mut self, delta: i64) {
        self.total_token_count += delta;
    }

    pub fn offset(&self) -> usize {
        self.message_index_offset
    }

    pub fn checkpoints(&self) -> impl ExactSizeIterator<Item = &Checkpoint> {
        self.checkpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn first(&self) -> Option<&Checkpoint> {
        self.checkpoints.front()
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.checkpoints.back()
    }

    /// Convert a logical index into a position in the current log.
    pub fn physical(&self, logical: usize) -> Result<usize, ExchangeError> {
        logical.checked_sub(self.message_index_offset).ok_or_else(|| {
            ExchangeError::LedgerDesync(format!(
                "logical index {logical} precedes offset {}",
                self.message_index_offset
            ))
        })
    }

    /// Convert a position in the current log into a logical index.
    pub fn logical(&self, physical: usize) -> usize {
        physical + self.message_index_offset
    }

    /// Physical index of the last accounted message, if any.
    pub fn last_message_index(&self) -> Result<Option<usize>, ExchangeError> {
        self.checkpoints
            .back()
            .map(|cp| self.physical(cp.end_index))
            .transpose()
    }

    /// Append a checkpoint after every existing one.
    pub fn push(&mut self, checkpoint: Checkpoint) -> Result<(), ExchangeError> {
        if checkpoint.start_index > checkpoint.end_index {
            return Err(ExchangeError::LedgerDesync(format!(
                "checkpoint start {} is after end {}",
                checkpoint.start_index, checkpoint.end_index
            )));
        }
        if let Some(last) = self.checkpoints.back()
            && checkpoint.start_index <= last.end_index
        {
            return Err(ExchangeError::LedgerDesync(format!(
                "checkpoint {}..={} overlaps previous checkpoint ending at {}",
                checkpoint.start_index, checkpoint.end_index, last.end_index
            )));
        }
        self.checkpoints.push_back(checkpoint);
        Ok(())
    }

    /// Insert a checkpoint before every existing one.
    pub fn push_front(&mut self, checkpoint: Checkpoint) -> Result<(), ExchangeError> {
        if let Some(first) = self.checkpoints.front()
            && checkpoint.end_index >= first.start_index
        {
            return Err(ExchangeError::LedgerDesync(format!(
                "checkpoint {}..={} overlaps next checkpoint starting at {}",
                checkpoint.start_index, checkpoint.end_index, first.start_index
            )));
        }
        self.checkpoints.push_front(checkpoint);
        Ok(())
    }

    /// Remove the last checkpoint and subtract its tokens from the total.
    ///
    /// Messages leave from the back, so the offset is untouched unless the
    /// ledger empties.
    pub fn pop_back(&mut self) -> Option<Checkpoint> {
        let checkpoint = self.checkpoints.pop_back()?;
        self.total_token_count -= checkpoint.token_count;
        if self.checkpoints.is_empty() {
            self.message_index_offset = 0;
        }
        Some(checkpoint)
    }

    /// Remove the first checkpoint and subtract its tokens from the total.
    ///
    /// The caller advances the offset once per message it removes.
    pub fn pop_front(&mut self) -> Option<Checkpoint> {
        let checkpoint = self.checkpoints.pop_front()?;
        self.total_token_count -= checkpoint.token_count;
        Some(checkpoint)
    }

    /// Record that one message left the front of the log.
    pub fn advance_offset(&mut self) {
        self.message_index_offset += 1;
        if self.checkpoints.is_empty() {
            self.message_index_offset = 0;
        }
    }

    /// Make room for one message inserted at the front of the log and return
    /// the logical index it occupies.
    ///
    /// With a zero offset there is no spare logical slot, so existing
    /// checkpoints shift right by one instead.
    pub fn retreat_offset(&mut self) -> usize {
        if self.message_index_offset == 0 {
            for checkpoint in &mut self.checkpoints {
                checkpoint.start_index += 1;
                checkpoint.end_index += 1;
            }
        } else {
            self.message_index_offset -= 1;
        }
        self.message_index_offset
    }

    /// Clear checkpoints, offset and total.
    pub fn reset(&mut self) {
        self.checkpoints.clear();
        self.message_index_offset = 0;
        self.total_token_count = 0;
    }

    /// Whether the ledger is sorted, non-overlapping, and addresses only
    /// positions inside a log of `message_count` messages.
    pub fn is_consistent_with(&self, message_count: usize) -> bool {
        if self.checkpoints.is_empty() && self.message_index_offset != 0 {
            return false;
        }
        let mut previous_end: Option<usize> = None;
        for cp in &self.checkpoints {
            if cp.start_index > cp.end_index || cp.start_index < self.message_index_offset {
                return false;
            }
            if previous_end.is_some_and(|end| cp.start_index <= end) {
                return false;
            }
            if cp.end_index - self.message_index_offset >= message_count {
                return false;
            }
            previous_end = Some(cp.end_index);
        }
        true
    }
}
