//! The episodic record type.
//!
//! One `Episode` per memorable event, serialized as a single JSON line in
//! the append-only log. Immutable once written; every field a reader needs
//! is on the record itself, so any line parses without its neighbors.

use serde::{Deserialize, Serialize};

/// A single entry in the episodic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Wall-clock seconds since the Unix epoch, assigned at append time.
    pub ts: i64,

    /// The remembered text, whitespace-trimmed.
    pub text: String,

    /// Categorical labels ("turn", "remember", "milestone", ...).
    #[serde(default)]
    pub tags: Vec<String>,

    /// Salience weight, 1 (incidental) to 5 (landmark).
    #[serde(default = "default_importance")]
    pub importance: u8,
}

fn default_importance() -> u8 {
    3
}

impl Episode {
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}
