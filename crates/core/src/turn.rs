//! Conversation turn and live-window types.
//!
//! A `Turn` is the transient unit that flows through an exchange: the user
//! sends text, the backend answers, and the pair lands in the live `Window`.
//! The window is in-memory only, oldest-first, and grows by appending; the
//! durable record of a conversation is the episodic log, not this.

use serde::{Deserialize, Serialize};

use crate::token::{TokenCostFn, estimate_turn_tokens};

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (composed context)
    System,
    /// The end user
    User,
    /// The assistant's reply
    Assistant,
}

impl Role {
    /// The wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Select the largest suffix of `turns` that fits `budget` under `cost`.
///
/// Walks newest-first, accumulating whole turns until the next one would
/// overflow, then restores chronological order. Oldest turns drop first;
/// a turn is never split.
pub fn trim_to_budget(turns: &[Turn], budget: usize, cost: TokenCostFn) -> Vec<Turn> {
    let mut kept: Vec<Turn> = Vec::new();
    let mut used = 0usize;

    for turn in turns.iter().rev() {
        let t = estimate_turn_tokens(turn, cost);
        if used + t > budget {
            break;
        }
        used += t;
        kept.push(turn.clone());
    }

    kept.reverse();
    kept
}

/// The live conversation window.
///
/// Empty at process start; the exchange pipeline appends the user turn and
/// the assistant turn together once a reply succeeds, so the stored window
/// never contains a dangling user turn.
#[derive(Debug, Clone, Default)]
pub struct Window {
    turns: Vec<Turn>,
}

impl Window {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a completed user/assistant exchange.
    pub fn push_exchange(&mut self, user: Turn, assistant: Turn) {
        self.turns.push(user);
        self.turns.push(assistant);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop everything; the episodic log is unaffected.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The budget-trimmed view of this window (see [`trim_to_budget`]).
    pub fn trimmed(&self, budget: usize, cost: TokenCostFn) -> Vec<Turn> {
        trim_to_budget(&self.turns, budget, cost)
    }
}
