//! Token counters used for history budgeting.

/// Deterministic text-to-token estimator.
///
/// Implementations must return the same count for the same string, and a
/// string must never count fewer tokens than any of its prefixes.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Average characters per token for English-like text.
const CHARS_PER_TOKEN: usize = 4;

/// `ceil(chars / 4)`. Cheap and monotone by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimate;

impl TokenCounter for CharEstimate {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}
