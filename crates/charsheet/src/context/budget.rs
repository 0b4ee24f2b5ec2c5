//! Generation budgets and text measurement.
//!
//! The budget is the largest measured size a summarization payload may
//! occupy: the backend's context window minus a reserve for the response.
//! It is recomputed every cycle because it depends on the active backend.
//!
//! Measurement goes through [`TextMeasure`] so that token-counted backends
//! can supply a real tokenizer. Backends without one fall back to
//! [`CharEstimate`], a fixed characters-per-token ratio.

use futures::future::BoxFuture;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default context window size in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

/// Shared fallback estimator used when a backend has no tokenizer.
pub static DEFAULT_ESTIMATE: CharEstimate = CharEstimate::new(DEFAULT_CHARS_PER_TOKEN);

/// Measures text in backend-dependent units (tokens or a proxy).
///
/// `padding` is added to the result; the assembler uses it as a fixed safety
/// margin on every trial measurement.
pub trait TextMeasure: Send + Sync {
    fn measure<'a>(&'a self, text: &'a str, padding: usize) -> BoxFuture<'a, usize>;
}

/// Character-count-derived token estimate.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimate {
    chars_per_token: f64,
}

impl CharEstimate {
    pub const fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }

    /// Estimated tokens for `text`, rounded up so any non-empty text costs
    /// at least one unit.
    pub fn estimate(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

impl Default for CharEstimate {
    fn default() -> Self {
        DEFAULT_ESTIMATE
    }
}

impl TextMeasure for CharEstimate {
    fn measure<'a>(&'a self, text: &'a str, padding: usize) -> BoxFuture<'a, usize> {
        let size = self.estimate(text) + padding;
        Box::pin(async move { size })
    }
}

/// Context window minus the response reserve.
///
/// # Example
///
/// ```
/// use charsheet::context::ContextBudget;
///
/// let budget = ContextBudget::new(8_192).with_output_reserve(1_024);
/// assert_eq!(budget.effective_max_tokens(), 7_168);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    /// Maximum context window in tokens.
    max_tokens: usize,
    /// Tokens reserved for the generated summary.
    output_reserve: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ContextBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            output_reserve: 0,
        }
    }

    /// Set tokens reserved for model output.
    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.output_reserve = tokens;
        self
    }

    /// Return the maximum context window size in tokens.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Effective budget: `max_tokens` minus the output reserve, saturating at 0.
    pub fn effective_max_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.output_reserve)
    }

    /// Usage snapshot for a measured payload size.
    pub fn usage(&self, measured: usize) -> ContextUsage {
        let effective = self.effective_max_tokens();
        let usage_pct = if effective > 0 {
            measured as f64 / effective as f64
        } else {
            1.0
        };
        ContextUsage {
            measured,
            budget: effective,
            usage_pct,
        }
    }
}

/// Snapshot of how much of the budget a payload occupies.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    /// Measured payload size.
    pub measured: usize,
    /// Effective budget it was measured against.
    pub budget: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "payload: ~{} units ({:.0}% of {})",
            self.measured,
            self.usage_pct * 100.0,
            self.budget,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_budget_subtracts_reserve() {
        let budget = ContextBudget::new(8_192).with_output_reserve(300);
        assert_eq!(budget.effective_max_tokens(), 7_892);
        assert_eq!(budget.max_tokens(), 8_192);
    }

    #[test]
    fn effective_budget_saturates_at_zero() {
        let budget = ContextBudget::new(1_000).with_output_reserve(5_000);
        assert_eq!(budget.effective_max_tokens(), 0);
        assert!((budget.usage(10).usage_pct - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_rounds_up() {
        let est = CharEstimate::new(4.0);
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("a"), 1);
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
    }

    #[test]
    fn calibrated_ratio_changes_estimate() {
        let text = "a".repeat(40_000);
        let default = CharEstimate::default().estimate(&text);
        let calibrated = CharEstimate::new(4.0).estimate(&text);
        assert!(calibrated < default);
    }

    #[tokio::test]
    async fn measure_adds_padding() {
        let est = CharEstimate::new(1.0);
        assert_eq!(est.measure("abc", 0).await, 3);
        assert_eq!(est.measure("abc", 64).await, 67);
    }

    #[test]
    fn usage_log_string_format() {
        let usage = ContextBudget::new(1_000).usage(500);
        let log = usage.to_log_string();
        assert!(log.contains("payload:"));
        assert!(log.contains("50%"));
    }
}
