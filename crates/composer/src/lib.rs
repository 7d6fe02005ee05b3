//! System prompt composition from profile, recent turns, and retrieval.
//!
//! Assembles the system context from six fixed-order blocks:
//!
//! 1. **Core identity** (role line + profile fields), never trimmed
//! 2. **Facts** (optional capability, empty unless a source is attached)
//! 3. **Session focus** (one configured line)
//! 4. **Style** (static guidance)
//! 5. **Recent episodes** (newest first, per-block budget)
//! 6. **Related episodes** (retrieval hits, per-block budget)
//!
//! Blocks are joined with blank lines and empty blocks are omitted. After
//! joining, a whole-prompt hard cap applies: if the result is over budget,
//! all block lines are re-flattened in order and kept greedily from the
//! front. This second stage trims from the end, so the related block can
//! vanish entirely even when it fit its own budget; that interaction is
//! intentional and kept from the reference behavior.
//!
//! # Determinism
//!
//! Composition is deterministic: identical store contents and arguments
//! always produce identical output. No random or time-dependent logic is
//! used while composing.

use std::sync::Arc;

use tracing::debug;

use emberkeep_core::token::{TokenCostFn, estimate_tokens};
use emberkeep_memory::profile::Profile;
use emberkeep_memory::retrieval::{RetrievalQuery, retrieve_from};
use emberkeep_memory::{EpisodeLog, ProfileStore};

// ── Constants ─────────────────────────────────────────────────────────────

const ROLE_LINE: &str = "You are a personal assistant who keeps durable memory across sessions.";

const STYLE_BLOCK: &str = "### STYLE\n- Concise, direct, personable.\n- Accuracy first. Keep the warmth.";

// ── Types ─────────────────────────────────────────────────────────────────

/// Token budgets for composition.
#[derive(Debug, Clone)]
pub struct ComposerBudget {
    /// Hard cap on the whole composed prompt.
    pub system: usize,
    /// Soft cap on the recent-episodes block.
    pub recent: usize,
    /// Soft cap on the related-episodes block.
    pub related: usize,
}

impl Default for ComposerBudget {
    fn default() -> Self {
        Self {
            system: 1200,
            recent: 300,
            related: 400,
        }
    }
}

/// Statistics for a single composed block.
#[derive(Debug, Clone)]
pub struct BlockStats {
    /// Block name.
    pub name: &'static str,
    /// Tokens consumed by this block's budgeted lines.
    pub tokens: usize,
    /// Lines included after budget trimming.
    pub lines_included: usize,
    /// Lines available before trimming.
    pub lines_total: usize,
}

/// A note about content dropped during budget enforcement.
#[derive(Debug, Clone)]
pub struct DropNote {
    /// Which block (or "prompt" for the whole-prompt cap).
    pub block: &'static str,
    /// Number of lines dropped.
    pub lines_dropped: usize,
    /// Reason for dropping.
    pub reason: &'static str,
}

/// The composed prompt plus composition metadata.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    /// The system context text.
    pub text: String,
    /// Per-block statistics.
    pub stats: Vec<BlockStats>,
    /// What was dropped, and why.
    pub drops: Vec<DropNote>,
}

/// Optional source of extra persistent fact lines.
///
/// The facts block only renders when a source is attached and yields
/// lines; the default source yields none. This replaces probing a store
/// for a maybe-present method: absence is an explicit empty answer.
pub trait FactSource: Send + Sync {
    fn fact_lines(&self) -> Vec<String> {
        Vec::new()
    }
}

/// The default fact source: no extra facts.
pub struct NoFacts;

impl FactSource for NoFacts {}

// ── Composer ──────────────────────────────────────────────────────────────

/// Composes the system prompt. Holds handles to the durable stores and is
/// cheap to share; composition never mutates either store.
pub struct PromptComposer {
    profiles: Arc<ProfileStore>,
    log: Arc<EpisodeLog>,
    budget: ComposerBudget,
    focus: String,
    retrieve_max_items: usize,
    fact_source: Box<dyn FactSource>,
    cost: TokenCostFn,
}

impl PromptComposer {
    pub fn new(profiles: Arc<ProfileStore>, log: Arc<EpisodeLog>, budget: ComposerBudget) -> Self {
        Self {
            profiles,
            log,
            budget,
            focus: "Stay consistent; carry remembered context forward.".into(),
            retrieve_max_items: 4,
            fact_source: Box::new(NoFacts),
            cost: estimate_tokens,
        }
    }

    /// Replace the session-focus line. An empty focus omits the block.
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = focus.into();
        self
    }

    pub fn with_fact_source(mut self, source: Box<dyn FactSource>) -> Self {
        self.fact_source = source;
        self
    }

    pub fn with_retrieve_max_items(mut self, max_items: usize) -> Self {
        self.retrieve_max_items = max_items;
        self
    }

    /// Substitute the token cost function used for every budget here.
    pub fn with_cost_fn(mut self, cost: TokenCostFn) -> Self {
        self.cost = cost;
        self
    }

    /// Compose the system prompt.
    ///
    /// `related_query` of `None` (or blank) skips retrieval, as does
    /// `include_related = false`. `recent_n` bounds how many of the newest
    /// episodes the recent block may consider.
    pub async fn build(
        &self,
        related_query: Option<&str>,
        recent_n: usize,
        include_related: bool,
    ) -> ComposedPrompt {
        let mut stats: Vec<BlockStats> = Vec::new();
        let mut drops: Vec<DropNote> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();

        // ── Core identity (never trimmed at block level) ───────────────────
        let profile = self.profiles.load_or_default().await;
        let (core, core_stats) = render_core(&profile, self.cost);
        blocks.push(core);
        stats.push(core_stats);

        // ── Facts (capability, usually empty) ──────────────────────────────
        let (facts, facts_stats) = render_facts(&self.fact_source.fact_lines(), self.cost);
        if !facts.is_empty() {
            blocks.push(facts);
        }
        stats.push(facts_stats);

        // ── Session focus ──────────────────────────────────────────────────
        if !self.focus.trim().is_empty() {
            blocks.push(format!("### SESSION FOCUS\n- {}", self.focus.trim()));
        }

        // ── Style ──────────────────────────────────────────────────────────
        blocks.push(STYLE_BLOCK.to_string());

        // ── Recent episodes (newest first) ─────────────────────────────────
        let recent = self.log.recent(recent_n);
        let (recent_block, recent_stats, recent_drop) =
            render_recent(&recent, self.budget.recent, self.cost);
        if !recent_block.is_empty() {
            blocks.push(recent_block);
        }
        stats.push(recent_stats);
        if let Some(d) = recent_drop {
            debug!(lines_dropped = d.lines_dropped, "Recent episodes trimmed to block budget");
            drops.push(d);
        }

        // ── Related episodes (retrieval) ───────────────────────────────────
        let query = if include_related {
            related_query.map(str::trim).filter(|q| !q.is_empty())
        } else {
            None
        };
        if let Some(query) = query {
            let bullets = retrieve_from(
                self.log.read_all(),
                &RetrievalQuery {
                    text: query.to_string(),
                    max_items: self.retrieve_max_items,
                    max_tokens: self.budget.related,
                    required_tags: Vec::new(),
                },
                self.cost,
            );
            let (related_block, related_stats) = render_related(&bullets, self.cost);
            if !related_block.is_empty() {
                blocks.push(related_block);
            }
            stats.push(related_stats);
        }

        // ── Join, then enforce the whole-prompt hard cap ───────────────────
        let joined = blocks
            .iter()
            .filter(|b| !b.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");

        let text = if (self.cost)(&joined) > self.budget.system {
            let (flattened, dropped) = flatten_to_cap(&blocks, self.budget.system, self.cost);
            debug!(
                lines_dropped = dropped,
                cap = self.budget.system,
                "Composed prompt flattened to hard cap"
            );
            drops.push(DropNote {
                block: "prompt",
                lines_dropped: dropped,
                reason: "Whole-prompt hard cap reached",
            });
            flattened
        } else {
            joined
        };

        ComposedPrompt { text, stats, drops }
    }
}

// ── Block renderers ───────────────────────────────────────────────────────

fn render_core(profile: &Profile, cost: TokenCostFn) -> (String, BlockStats) {
    let fields = profile.ordered_fields();
    let mut out = String::from("### ROLE\n");
    out.push_str(ROLE_LINE);
    out.push_str("\n### CORE IDENTITY");
    for (key, value) in &fields {
        out.push_str(&format!("\n- {}: {}", capitalize(key), value));
    }
    let tokens = cost(&out);
    (
        out,
        BlockStats {
            name: "core",
            tokens,
            lines_included: fields.len(),
            lines_total: fields.len(),
        },
    )
}

fn render_facts(lines: &[String], cost: TokenCostFn) -> (String, BlockStats) {
    let stats = BlockStats {
        name: "facts",
        tokens: 0,
        lines_included: lines.len(),
        lines_total: lines.len(),
    };
    if lines.is_empty() {
        return (String::new(), stats);
    }
    let mut out = String::from("### FACTS");
    for line in lines {
        out.push_str(&format!("\n- {line}"));
    }
    let tokens = cost(&out);
    (out, BlockStats { tokens, ..stats })
}

fn render_recent(
    episodes: &[emberkeep_core::Episode],
    budget: usize,
    cost: TokenCostFn,
) -> (String, BlockStats, Option<DropNote>) {
    let mut bullets: Vec<String> = Vec::new();
    let mut used = 0usize;
    for episode in episodes {
        let bullet = format!("- {}", episode.text);
        let t = cost(&bullet);
        if used + t > budget {
            break;
        }
        used += t;
        bullets.push(bullet);
    }

    let dropped = episodes.len() - bullets.len();
    let stats = BlockStats {
        name: "recent",
        tokens: used,
        lines_included: bullets.len(),
        lines_total: episodes.len(),
    };
    let drop = (dropped > 0).then_some(DropNote {
        block: "recent",
        lines_dropped: dropped,
        reason: "Recent block budget reached",
    });

    if bullets.is_empty() {
        return (String::new(), stats, drop);
    }
    (
        format!("### RECENT EPISODES\n{}", bullets.join("\n")),
        stats,
        drop,
    )
}

fn render_related(bullets: &[String], cost: TokenCostFn) -> (String, BlockStats) {
    // Retrieval already enforced the related budget; this only renders.
    let tokens = bullets.iter().map(|b| cost(b)).sum();
    let stats = BlockStats {
        name: "related",
        tokens,
        lines_included: bullets.len(),
        lines_total: bullets.len(),
    };
    if bullets.is_empty() {
        return (String::new(), stats);
    }
    (
        format!("### RELATED EPISODES\n{}", bullets.join("\n")),
        stats,
    )
}

/// Flatten all block lines in order and keep greedily from the front,
/// stopping at the first line that would exceed the cap.
///
/// Blank separators between blocks do not survive this pass. Returns the
/// trimmed text and the number of lines dropped.
fn flatten_to_cap(blocks: &[String], cap: usize, cost: TokenCostFn) -> (String, usize) {
    let lines: Vec<&str> = blocks.iter().flat_map(|b| b.lines()).collect();

    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for &line in &lines {
        let t = cost(line);
        if used + t > cap {
            break;
        }
        used += t;
        kept.push(line);
    }

    let dropped = lines.len() - kept.len();
    (kept.join("\n"), dropped)
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
