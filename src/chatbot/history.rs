//! Token-budgeted conversation history.
//!
//! The history sent to the model is `[system context, ...turns]`. Before each
//! model call the stored turns are extended with the new ones and the oldest
//! turns are dropped until the whole conversation fits 90% of the model's
//! context window. The remaining 10% is headroom for the model's own output.
//!
//! Eviction works on whole turns only. A turn is never truncated, so the
//! newest turn survives even when it alone exceeds the budget.

use std::fmt;

use tracing::debug;

use crate::chatbot::tokens::TokenCounter;
use crate::chatbot::turn::{ConversationTurn, Part};

/// Cost charged for every media part. This is the low-detail image price of
/// the OpenAI vision API; it is applied to all media regardless of detail.
pub const MEDIA_PART_TOKENS: usize = 65;

/// Percentage of the ceiling that history may occupy.
const WORKING_LIMIT_PERCENT: usize = 90;

/// A model's context window size in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    ceiling: usize,
}

impl TokenBudget {
    /// Returns `None` for a zero ceiling.
    pub fn new(ceiling: usize) -> Option<Self> {
        (ceiling > 0).then_some(Self { ceiling })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// The enforced limit: 90% of the ceiling, rounded down.
    pub fn limit(&self) -> usize {
        // Split so the product can't overflow near usize::MAX.
        self.ceiling / 100 * WORKING_LIMIT_PERCENT + self.ceiling % 100 * WORKING_LIMIT_PERCENT / 100
    }
}

/// Keeps conversations inside a [`TokenBudget`].
pub struct HistoryManager {
    budget: TokenBudget,
    counter: Box<dyn TokenCounter>,
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryManager")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl HistoryManager {
    pub fn new(budget: TokenBudget, counter: impl TokenCounter + 'static) -> Self {
        Self { budget, counter: Box::new(counter) }
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn part_tokens(&self, part: &Part) -> usize {
        match part {
            Part::Text { value } if value.is_empty() => 0,
            Part::Text { value } => self.counter.count_tokens(value),
            Part::Media { .. } => MEDIA_PART_TOKENS,
        }
    }

    pub fn turn_tokens(&self, turn: &ConversationTurn) -> usize {
        turn.content.iter().map(|p| self.part_tokens(p)).sum()
    }

    /// Cost of `[system(context), ...turns]`.
    pub fn history_tokens(&self, context: &str, turns: &[ConversationTurn]) -> usize {
        self.turn_tokens(&ConversationTurn::system(context))
            + turns.iter().map(|t| self.turn_tokens(t)).sum::<usize>()
    }

    /// Append `new_turns` to `current` and drop the oldest turns until the
    /// conversation, context included, fits the budget.
    ///
    /// The result is always a suffix of `current ++ new_turns`. The last turn
    /// is never dropped.
    pub fn update_history(
        &self,
        context: &str,
        current: &[ConversationTurn],
        new_turns: &[ConversationTurn],
    ) -> Vec<ConversationTurn> {
        let limit = self.budget.limit();
        let context_tokens = self.turn_tokens(&ConversationTurn::system(context));
        let costs: Vec<usize> = current
            .iter()
            .chain(new_turns)
            .map(|t| self.turn_tokens(t))
            .collect();

        let mut total = context_tokens + costs.iter().sum::<usize>();
        let mut start = 0;
        while costs.len() - start > 1 && total > limit {
            total -= costs[start];
            start += 1;
        }

        if start > 0 {
            debug!(
                "Evicted {} oldest turn(s), {} left ({}/{} tokens)",
                start,
                costs.len() - start,
                total,
                limit
            );
        }

        current
            .iter()
            .chain(new_turns)
            .skip(start)
            .cloned()
            .collect()
    }
}
