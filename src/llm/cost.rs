//! Token usage and cost accounting for model calls.
//!
//! Costs are derived from per-million-token prices configured on the model,
//! so a cost limit on the agent only bites when pricing is known.

use serde::{Deserialize, Serialize};

/// Token counts reported by a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u64,
    /// Number of tokens generated.
    pub completion_tokens: u64,
}

/// Prices in dollars per one million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost per 1M prompt tokens.
    pub input_per_million: f64,
    /// Cost per 1M completion tokens.
    pub output_per_million: f64,
}

impl Pricing {
    /// Create a pricing entry.
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Dollar cost of the given usage.
    pub fn cost_of(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (usage.completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Running totals across all calls made by one model client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Number of completed model calls.
    pub n_calls: u64,
    /// Accumulated prompt tokens.
    pub n_prompt_tokens: u64,
    /// Accumulated completion tokens.
    pub n_completion_tokens: u64,
    /// Accumulated cost in dollars.
    pub cost: f64,
}

impl UsageTotals {
    /// Record one completed call, with its usage when the provider reported it.
    pub fn record(&mut self, usage: Option<&Usage>, pricing: Option<&Pricing>) {
        self.n_calls += 1;
        if let Some(usage) = usage {
            self.n_prompt_tokens += usage.prompt_tokens;
            self.n_completion_tokens += usage.completion_tokens;
            if let Some(pricing) = pricing {
                self.cost += pricing.cost_of(usage);
            }
        }
    }
}
