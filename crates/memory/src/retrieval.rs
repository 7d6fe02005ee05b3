//! Keyword-relevance retrieval over the episodic log.
//!
//! Scoring is deliberately simple and fully deterministic: substring
//! occurrence counts of the query's word tokens, plus a flat importance
//! bonus. An episode with no keyword hit still carries its importance
//! weight, so salient memories surface even for oblique queries.

use emberkeep_core::Episode;
use emberkeep_core::token::TokenCostFn;
use regex_lite::Regex;

/// Parameters for one retrieval pass.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    /// Free-text query, tokenized to lowercase words of length > 2.
    pub text: String,

    /// Maximum number of bullets returned.
    pub max_items: usize,

    /// Token budget across all returned bullets.
    pub max_tokens: usize,

    /// When non-empty, an episode must share at least one of these tags.
    pub required_tags: Vec<String>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

impl Default for RetrievalQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            max_items: 4,
            max_tokens: 500,
            required_tags: Vec::new(),
        }
    }
}

/// Lowercase word tokens of the query, keeping only words longer than
/// two characters.
pub fn query_tokens(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    Regex::new(r"\w+")
        .map(|re| {
            re.find_iter(&lower)
                .map(|m| m.as_str().to_owned())
                .filter(|w| w.len() > 2)
                .collect()
        })
        .unwrap_or_default()
}

/// Relevance of one episode against pre-tokenized query words.
///
/// Sum of substring occurrence counts per token, plus 0.15 x importance.
/// The importance term applies whether or not any token matched.
pub fn score_episode(tokens: &[String], episode: &Episode) -> f64 {
    let text = episode.text.to_lowercase();
    let hits: usize = tokens.iter().map(|t| text.matches(t.as_str()).count()).sum();
    hits as f64 + 0.15 * f64::from(episode.importance)
}

/// Run one retrieval pass over `episodes`, returning formatted bullets.
///
/// Episodes scoring zero or below are dropped, the rest are stably sorted
/// by score descending (ties keep log order), and the top `max_items` are
/// greedily accumulated as `- text` bullets until the first one that would
/// exceed `max_tokens`.
pub fn retrieve_from<I>(episodes: I, query: &RetrievalQuery, cost: TokenCostFn) -> Vec<String>
where
    I: IntoIterator<Item = Episode>,
{
    let tokens = query_tokens(&query.text);

    let mut scored: Vec<(f64, Episode)> = Vec::new();
    for episode in episodes {
        if !query.required_tags.is_empty() && !episode.has_any_tag(&query.required_tags) {
            continue;
        }
        let score = score_episode(&tokens, &episode);
        if score > 0.0 {
            scored.push((score, episode));
        }
    }

    // Stable sort: equal scores keep their log order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut bullets: Vec<String> = Vec::new();
    let mut used = 0usize;
    for (_, episode) in scored.into_iter().take(query.max_items) {
        let bullet = format!("- {}", episode.text);
        let t = cost(&bullet);
        if used + t > query.max_tokens {
            break;
        }
        used += t;
        bullets.push(bullet);
    }
    bullets
}
