//! Token usage accounting across a session's engine calls.

use crate::TokenUsage;

/// Accumulates the usage reported by each completion.
#[derive(Debug, Default)]
pub struct UsageTracker {
    total: TokenUsage,
    completions: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the usage from one completion.
    pub fn record(&mut self, usage: &TokenUsage) {
        self.total.prompt_tokens += usage.prompt_tokens;
        self.total.completion_tokens += usage.completion_tokens;
        self.completions += 1;
    }

    /// Cumulative usage across all recorded completions.
    pub fn total(&self) -> &TokenUsage {
        &self.total
    }

    /// Number of completions recorded.
    pub fn completions(&self) -> u64 {
        self.completions
    }

    pub fn reset(&mut self) {
        self.total = TokenUsage::default();
        self.completions = 0;
    }
}
