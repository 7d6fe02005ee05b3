//! Model backend implementations for Emberkeep.
//!
//! All backends implement the `emberkeep_core::ModelBackend` trait.
//! Today that means Ollama; the trait keeps the rest of the system
//! ignorant of which server actually generates text.

pub mod ollama;

pub use ollama::{GenOptions, OllamaBackend};
