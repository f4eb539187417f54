//! Token usage reporting and cost estimation.
//!
//! Every `generate` call records its [`Usage`] in a [`TokenUsageCollector`]
//! keyed by model name. The collector is for reporting only; checkpoint
//! accounting never reads it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

// ── Usage ──────────────────────────────────────────────────────────

/// Token counts reported by a provider for one completion. Any field may be
/// missing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Build a usage record, synthesizing `total_tokens` from input and
    /// output when the provider omits it.
    pub fn new(
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        total_tokens: Option<u64>,
    ) -> Self {
        let total_tokens = total_tokens.or(match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Shorthand for a fully populated record.
    pub fn of(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self::new(Some(input_tokens), Some(output_tokens), Some(total_tokens))
    }

    /// Add another record's present fields to this one.
    fn accumulate(&mut self, other: &Usage) {
        fn add(acc: &mut Option<u64>, value: Option<u64>) {
            *acc = Some(acc.unwrap_or(0) + value.unwrap_or(0));
        }
        add(&mut self.input_tokens, other.input_tokens);
        add(&mut self.output_tokens, other.output_tokens);
        add(&mut self.total_tokens, other.total_tokens);
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<u64>| v.map_or_else(|| "n/a".to_string(), |v| v.to_string());
        write!(
            f,
            "(input: {}, output: {}, total: {})",
            show(self.input_tokens),
            show(self.output_tokens),
            show(self.total_tokens)
        )
    }
}

// ── Collector ──────────────────────────────────────────────────────

/// Append-only record of usage per model.
///
/// Clones share the same underlying record, so an exchange and every
/// exchange derived from it via `replace` report into one place.
#[derive(Clone, Debug, Default)]
pub struct TokenUsageCollector {
    records: Arc<Mutex<Vec<(String, Usage)>>>,
}

impl TokenUsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&self, model: &str, usage: Usage) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push((model.to_string(), usage));
    }

    /// Summed usage per model. Missing fields count as zero.
    pub fn summary(&self) -> BTreeMap<String, Usage> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut totals: BTreeMap<String, Usage> = BTreeMap::new();
        for (model, usage) in records.iter() {
            totals.entry(model.clone()).or_default().accumulate(usage);
        }
        totals
    }

    pub fn is_empty(&self) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

// ── Pricing ────────────────────────────────────────────────────────

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn estimate_cost(&self, usage: &Usage) -> f64 {
        (usage.input_tokens.unwrap_or(0) as f64 / 1_000_000.0) * self.input_per_million
            + (usage.output_tokens.unwrap_or(0) as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Approximate pricing for a model, or `None` when the model is unknown.
///
/// Matches on the name segment after the last `/` so org prefixes such as
/// `"anthropic/claude-3-5-sonnet"` resolve like the bare name.
pub fn pricing_for_model(model: &str) -> Option<ModelPricing> {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    let pricing = if name.contains("opus") {
        ModelPricing::new(15.0, 75.0)
    } else if name.contains("sonnet") {
        ModelPricing::new(3.0, 15.0)
    } else if name.contains("haiku") {
        ModelPricing::new(0.25, 1.25)
    } else if name.contains("gpt-4o-mini") {
        ModelPricing::new(0.15, 0.60)
    } else if name.contains("gpt-4o") {
        ModelPricing::new(2.50, 10.0)
    } else if name.contains("gpt-4-turbo") {
        ModelPricing::new(10.0, 30.0)
    } else if name.starts_with("o1-mini") {
        ModelPricing::new(3.0, 12.0)
    } else if name.starts_with("o1") {
        ModelPricing::new(15.0, 60.0)
    } else if name.contains("gemini") && name.contains("flash") {
        ModelPricing::new(0.075, 0.30)
    } else if name.contains("gemini") {
        ModelPricing::new(1.25, 5.0)
    } else if name.contains("deepseek") {
        ModelPricing::new(0.27, 1.10)
    } else {
        return None;
    };
    Some(pricing)
}

/// One line per model plus a grand total, e.g.
///
/// ```text
/// Cost for model gpt-4o (input: 1000, output: 50, total: 1050): $0.00
/// Total cost: $0.00
/// ```
pub fn total_cost_message(summary: &BTreeMap<String, Usage>) -> String {
    let mut message = String::new();
    let mut total_cost = 0.0;
    for (model, usage) in summary {
        match pricing_for_model(model) {
            Some(pricing) => {
                let cost = pricing.estimate_cost(usage);
                total_cost += cost;
                message.push_str(&format!("Cost for model {model} {usage}: ${cost:.2}\n"));
            }
            None => {
                message.push_str(&format!("Cost for model {model} {usage}: Not available\n"));
            }
        }
    }
    message.push_str(&format!("Total cost: ${total_cost:.2}"));
    message
}
