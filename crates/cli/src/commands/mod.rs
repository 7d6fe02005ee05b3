//! Subcommand implementations.

pub mod chat;
pub mod log;
pub mod profile;
pub mod serve;
