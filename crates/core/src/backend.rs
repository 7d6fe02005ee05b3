//! ModelBackend trait, the abstraction over text-generation servers.
//!
//! A backend takes the composed system context plus the trimmed live window
//! and produces assistant text, either complete or as a stream of deltas.
//! The exchange pipeline calls it with **no locks held**; a backend may
//! legitimately block for minutes.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::turn::Turn;

/// A generation request: composed system context plus the trimmed window.
#[derive(Debug, Clone)]
pub struct GenRequest {
    /// The composed system context.
    pub system: String,

    /// The budget-trimmed live window, oldest first.
    pub turns: Vec<Turn>,
}

impl GenRequest {
    pub fn new(system: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            system: system.into(),
            turns,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone)]
pub struct StreamDelta {
    /// Partial content
    pub content: Option<String>,

    /// Whether this is the final chunk
    pub done: bool,
}

/// The model backend trait.
///
/// Implementations own their transport and protocol; callers only see
/// text in, text out. All methods may fail with a typed [`BackendError`]
/// that the caller can distinguish from memory-layer degradation.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a request and return the complete assistant text, trimmed.
    async fn generate(&self, request: GenRequest) -> std::result::Result<String, BackendError>;

    /// Send a request and get a stream of deltas.
    ///
    /// Default implementation calls `generate()` and wraps the result as a
    /// single final delta.
    async fn stream(
        &self,
        request: GenRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamDelta, BackendError>>,
        BackendError,
    > {
        let text = self.generate(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamDelta {
                content: Some(text),
                done: true,
            }))
            .await;
        Ok(rx)
    }

    /// Health check: can the backend be reached?
    async fn health_check(&self) -> std::result::Result<bool, BackendError> {
        Ok(true)
    }
}
