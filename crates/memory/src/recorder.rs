//! Turn recorder: what a conversation turn is worth remembering.
//!
//! Every accepted turn becomes a routine episode. On top of that, two
//! cheap salience checks promote the raw text to a higher-importance
//! record: an explicit remember phrase, and any configured milestone
//! keyword.

use emberkeep_core::error::MemoryError;
use emberkeep_core::turn::Role;
use regex_lite::Regex;

use crate::log::EpisodeLog;

const REMEMBER_PATTERN: &str = r"(?i)\b(remember this|keep in mind)\b";

/// Records accepted turns into the episodic log.
pub struct TurnRecorder {
    milestone_keywords: Vec<String>,
}

impl TurnRecorder {
    /// Keywords are matched case-insensitively as substrings.
    pub fn new(milestone_keywords: Vec<String>) -> Self {
        Self {
            milestone_keywords: milestone_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    /// Log one accepted turn.
    ///
    /// Always appends a routine `turn` episode; additionally appends the
    /// raw text as a `remember` episode (importance 4) when the user asked
    /// for it, and as a `milestone` episode (importance 5) when a milestone
    /// keyword appears. Empty text records nothing.
    pub async fn record_turn(
        &self,
        log: &EpisodeLog,
        role: Role,
        text: &str,
    ) -> Result<(), MemoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        log.append(
            &format!("{}: {}", role.as_str(), text),
            &["turn", role.as_str()],
            2,
        )
        .await?;

        if has_remember_phrase(text) {
            log.append(text, &["remember"], 4).await?;
        }

        let lower = text.to_lowercase();
        if self.milestone_keywords.iter().any(|k| lower.contains(k)) {
            log.append(text, &["milestone"], 5).await?;
        }

        Ok(())
    }
}

fn has_remember_phrase(text: &str) -> bool {
    Regex::new(REMEMBER_PATTERN).is_ok_and(|re| re.is_match(text))
}
