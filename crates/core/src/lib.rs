//! # Emberkeep Core
//!
//! Domain types, traits, and error definitions for the Emberkeep context &
//! memory engine. This crate has **zero framework dependencies**: it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The durable stores, the prompt composer, and the model backend are all
//! defined against types and traits in this crate. Implementations live in
//! their respective crates. This enables:
//! - Swapping the model backend via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod episode;
pub mod error;
pub mod token;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use backend::{GenRequest, ModelBackend, StreamDelta};
pub use episode::Episode;
pub use error::{BackendError, Error, MemoryError, Result};
pub use token::{TokenCostFn, estimate_tokens, estimate_turn_tokens};
pub use turn::{Role, Turn, Window, trim_to_budget};
