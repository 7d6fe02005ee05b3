//! Token estimation for budget enforcement.
//!
//! Every budget in the system (retrieval, composer blocks, whole prompt,
//! live window) is enforced against the same heuristic: roughly 4 chars
//! per token, rounded up, never less than 1. The cost function is a plain
//! fn pointer so callers can substitute a real tokenizer without touching
//! the budget logic.

use crate::turn::Turn;

/// A pluggable token cost function.
pub type TokenCostFn = fn(&str) -> usize;

/// Estimate token count for a text: `ceil(len / 4)`, minimum 1.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len().div_ceil(4)).max(1)
}

/// Cost of one whole turn under `cost`; window trimming charges turns
/// through this.
pub fn estimate_turn_tokens(turn: &Turn, cost: TokenCostFn) -> usize {
    cost(&turn.content)
}
