//! # Emberkeep Memory
//!
//! The durable half of the context engine: a whole-file JSON profile store,
//! an append-only JSONL episodic log, keyword-relevance retrieval over that
//! log, and the turn recorder that decides what a conversation turn is worth
//! remembering.
//!
//! Everything here is plain files: one JSON object for the profile, one
//! JSON line per episode. Human-inspectable, recoverable line by line,
//! no database to corrupt.

pub mod log;
pub mod profile;
pub mod recorder;
pub mod retrieval;

pub use log::{EpisodeLog, Episodes};
pub use profile::{Profile, ProfileStore};
pub use recorder::TurnRecorder;
pub use retrieval::{RetrievalQuery, query_tokens, retrieve_from, score_episode};
