//! Conversation session management for Emberkeep.
//!
//! A [`SessionManager`] owns the live conversation window and the echo
//! state, and runs the exchange pipeline: echo guard, window trim,
//! prompt composition, backend call, then persistence. Everything
//! durable is all-or-nothing per exchange: if the backend fails or
//! returns nothing, neither the window nor the episodic log is touched.
//!
//! Locking discipline: window and echo state live behind one async
//! mutex, held only for bounded in-memory work. The backend call can
//! block for a long time and always runs with no locks held.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use emberkeep_composer::{ComposedPrompt, PromptComposer};
use emberkeep_core::backend::{GenRequest, ModelBackend};
use emberkeep_core::token::{estimate_tokens, TokenCostFn};
use emberkeep_core::turn::{trim_to_budget, Role, Turn, Window};
use emberkeep_core::Result;
use emberkeep_memory::{EpisodeLog, TurnRecorder};

/// What an exchange produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The backend produced a reply; window and log were updated.
    Reply(String),
    /// The input repeated the previous assistant output verbatim.
    /// Nothing was persisted.
    IgnoredEcho,
    /// Empty input or empty reply. Nothing was persisted.
    Empty,
}

struct SessionState {
    window: Window,
    last_assistant: Option<String>,
}

/// Orchestrates one conversation against one backend.
pub struct SessionManager {
    log: Arc<EpisodeLog>,
    recorder: TurnRecorder,
    composer: PromptComposer,
    backend: Arc<dyn ModelBackend>,
    state: Mutex<SessionState>,
    session_id: Uuid,
    window_tokens: usize,
    recent_n: usize,
    cost: TokenCostFn,
}

impl SessionManager {
    pub fn new(
        log: Arc<EpisodeLog>,
        recorder: TurnRecorder,
        composer: PromptComposer,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let session_id = Uuid::new_v4();
        info!(session = %session_id, backend = backend.name(), "Session initialized");

        Self {
            log,
            recorder,
            composer,
            backend,
            state: Mutex::new(SessionState {
                window: Window::new(),
                last_assistant: None,
            }),
            session_id,
            window_tokens: 900,
            recent_n: 5,
            cost: estimate_tokens,
        }
    }

    /// Set the live-window token budget.
    pub fn with_window_tokens(mut self, window_tokens: usize) -> Self {
        self.window_tokens = window_tokens;
        self
    }

    /// Set how many recent episodes the composed prompt carries.
    pub fn with_recent_n(mut self, recent_n: usize) -> Self {
        self.recent_n = recent_n;
        self
    }

    pub fn with_cost_fn(mut self, cost: TokenCostFn) -> Self {
        self.cost = cost;
        self
    }

    /// Run one exchange and return the complete reply.
    pub async fn handle_user_text(&self, text: &str) -> Result<ExchangeOutcome> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(ExchangeOutcome::Empty);
        }

        let Some(turns) = self.snapshot_turns(trimmed).await else {
            return Ok(ExchangeOutcome::IgnoredEcho);
        };

        let prompt = self.composer.build(Some(trimmed), self.recent_n, true).await;
        let reply = self
            .backend
            .generate(GenRequest::new(prompt.text, turns))
            .await?;

        self.finish_exchange(trimmed, reply.trim().to_string())
            .await
    }

    /// Run one exchange, forwarding content deltas to `on_delta` as they
    /// arrive.
    ///
    /// Persistence happens only once the stream has completed; a stream
    /// interrupted mid-reply leaves the window and log unmodified even
    /// though the caller already saw partial output.
    pub async fn handle_user_text_streamed<F>(
        &self,
        text: &str,
        mut on_delta: F,
    ) -> Result<ExchangeOutcome>
    where
        F: FnMut(&str),
    {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(ExchangeOutcome::Empty);
        }

        let Some(turns) = self.snapshot_turns(trimmed).await else {
            return Ok(ExchangeOutcome::IgnoredEcho);
        };

        let prompt = self.composer.build(Some(trimmed), self.recent_n, true).await;
        let mut rx = self
            .backend
            .stream(GenRequest::new(prompt.text, turns))
            .await?;

        let mut reply = String::new();
        while let Some(delta) = rx.recv().await {
            let delta = delta?;
            if let Some(content) = delta.content {
                on_delta(&content);
                reply.push_str(&content);
            }
            if delta.done {
                break;
            }
        }

        self.finish_exchange(trimmed, reply.trim().to_string())
            .await
    }

    /// Compose the system prompt as the next exchange would see it.
    pub async fn compose_system_prompt(
        &self,
        related_query: Option<&str>,
        recent_n: usize,
    ) -> ComposedPrompt {
        self.composer.build(related_query, recent_n, true).await
    }

    /// Drop the live window and the echo state.
    pub async fn reset_window(&self) {
        let mut state = self.state.lock().await;
        state.window.clear();
        state.last_assistant = None;
        info!(session = %self.session_id, "Conversation window reset");
    }

    pub async fn window_len(&self) -> usize {
        self.state.lock().await.window.len()
    }

    /// Echo check plus trimmed window snapshot, under the state lock.
    ///
    /// Returns `None` when the input merely echoes the previous assistant
    /// output.
    async fn snapshot_turns(&self, trimmed: &str) -> Option<Vec<Turn>> {
        let state = self.state.lock().await;

        if let Some(last) = &state.last_assistant {
            if last.trim() == trimmed {
                debug!(session = %self.session_id, "Ignoring echoed assistant output");
                return None;
            }
        }

        let mut turns = state.window.turns().to_vec();
        turns.push(Turn::user(trimmed));
        Some(trim_to_budget(&turns, self.window_tokens, self.cost))
    }

    /// Persist a completed exchange. Only called after the backend
    /// succeeded; an empty reply persists nothing.
    ///
    /// Episodic appends run first; a failed append surfaces with the
    /// window and echo state still unchanged.
    async fn finish_exchange(&self, trimmed: &str, reply: String) -> Result<ExchangeOutcome> {
        if reply.is_empty() {
            return Ok(ExchangeOutcome::Empty);
        }

        self.recorder
            .record_turn(&self.log, Role::User, trimmed)
            .await?;
        self.recorder
            .record_turn(&self.log, Role::Assistant, &reply)
            .await?;

        {
            let mut state = self.state.lock().await;
            state
                .window
                .push_exchange(Turn::user(trimmed), Turn::assistant(reply.as_str()));
            state.last_assistant = Some(reply.clone());
        }

        Ok(ExchangeOutcome::Reply(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use emberkeep_composer::ComposerBudget;
    use emberkeep_core::error::BackendError;
    use emberkeep_memory::ProfileStore;
    use tempfile::{tempdir, TempDir};

    struct FixedBackend {
        reply: String,
    }

    #[async_trait]
    impl ModelBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(
            &self,
            _request: GenRequest,
        ) -> std::result::Result<String, BackendError> {
            Ok(self.reply.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ModelBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(
            &self,
            _request: GenRequest,
        ) -> std::result::Result<String, BackendError> {
            Err(BackendError::Network("connection refused".into()))
        }
    }

    struct CapturingBackend {
        requests: Mutex<Vec<GenRequest>>,
    }

    #[async_trait]
    impl ModelBackend for CapturingBackend {
        fn name(&self) -> &str {
            "capturing"
        }

        async fn generate(
            &self,
            request: GenRequest,
        ) -> std::result::Result<String, BackendError> {
            self.requests.lock().await.push(request);
            Ok("ok".into())
        }
    }

    fn session_with(dir: &TempDir, backend: Arc<dyn ModelBackend>) -> SessionManager {
        let profiles = Arc::new(ProfileStore::new(dir.path().join("profile.json")));
        let log = Arc::new(EpisodeLog::new(dir.path().join("episodes.jsonl")));
        let recorder = TurnRecorder::new(vec!["milestone".into()]);
        let composer = PromptComposer::new(profiles, log.clone(), ComposerBudget::default());
        SessionManager::new(log, recorder, composer, backend)
    }

    #[tokio::test]
    async fn reply_updates_window_and_log() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "hello there".into(),
            }),
        );

        let outcome = session.handle_user_text("hi").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Reply("hello there".into()));
        assert_eq!(session.window_len().await, 2);

        let episodes: Vec<_> = session.log.read_all().collect();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].text, "user: hi");
        assert_eq!(episodes[1].text, "assistant: hello there");
    }

    #[tokio::test]
    async fn echo_of_last_reply_is_ignored_and_logs_nothing() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "the answer".into(),
            }),
        );

        session.handle_user_text("question").await.unwrap();
        let before: Vec<_> = session.log.read_all().collect();

        let outcome = session.handle_user_text("the answer").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::IgnoredEcho);

        let after: Vec<_> = session.log.read_all().collect();
        assert_eq!(before.len(), after.len());
        assert_eq!(session.window_len().await, 2);
    }

    #[tokio::test]
    async fn echo_comparison_ignores_surrounding_whitespace() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "the answer".into(),
            }),
        );

        session.handle_user_text("question").await.unwrap();
        let outcome = session.handle_user_text("  the answer  ").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::IgnoredEcho);
    }

    #[tokio::test]
    async fn backend_failure_persists_nothing() {
        let dir = tempdir().unwrap();
        let session = session_with(&dir, Arc::new(FailingBackend));

        let result = session.handle_user_text("hi").await;
        assert!(result.is_err());
        assert_eq!(session.window_len().await, 0);
        assert_eq!(session.log.read_all().count(), 0);
    }

    #[tokio::test]
    async fn failed_log_append_leaves_window_untouched() {
        let dir = tempdir().unwrap();
        let profiles = Arc::new(ProfileStore::new(dir.path().join("profile.json")));
        // Pointing the log at a directory makes every append fail.
        let log = Arc::new(EpisodeLog::new(dir.path().to_path_buf()));
        let recorder = TurnRecorder::new(vec!["milestone".into()]);
        let composer = PromptComposer::new(profiles, log.clone(), ComposerBudget::default());
        let session = SessionManager::new(
            log,
            recorder,
            composer,
            Arc::new(FixedBackend {
                reply: "hello".into(),
            }),
        );

        let result = session.handle_user_text("hi").await;
        assert!(result.is_err());
        assert_eq!(session.window_len().await, 0);

        // The echo state did not advance: the unrecorded reply is not
        // treated as the previous assistant output.
        let retry = session.handle_user_text("hello").await;
        assert!(!matches!(retry, Ok(ExchangeOutcome::IgnoredEcho)));
    }

    #[tokio::test]
    async fn empty_input_is_empty_outcome() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "unused".into(),
            }),
        );

        let outcome = session.handle_user_text("   \n").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Empty);
        assert_eq!(session.window_len().await, 0);
        assert_eq!(session.log.read_all().count(), 0);
    }

    #[tokio::test]
    async fn empty_reply_persists_nothing() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "   ".into(),
            }),
        );

        let outcome = session.handle_user_text("hi").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Empty);
        assert_eq!(session.window_len().await, 0);
        assert_eq!(session.log.read_all().count(), 0);
    }

    #[tokio::test]
    async fn window_is_trimmed_before_the_backend_call() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(CapturingBackend {
            requests: Mutex::new(Vec::new()),
        });
        let session = session_with(&dir, backend.clone()).with_window_tokens(15);

        // 40 chars context = 10 tokens; the "ok" reply costs 1.
        let first = "a".repeat(40);
        session.handle_user_text(&first).await.unwrap();

        let second = "b".repeat(40);
        session.handle_user_text(&second).await.unwrap();

        let requests = backend.requests.lock().await;
        let turns = &requests[1].turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "ok");
        assert_eq!(turns[1].content, second);
    }

    #[tokio::test]
    async fn composed_prompt_reaches_backend() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(CapturingBackend {
            requests: Mutex::new(Vec::new()),
        });
        let session = session_with(&dir, backend.clone());

        session.handle_user_text("hi").await.unwrap();

        let requests = backend.requests.lock().await;
        assert!(requests[0].system.contains("### ROLE"));
        assert!(requests[0].system.contains("### CORE IDENTITY"));
        assert!(requests[0].system.contains("### STYLE"));
    }

    #[tokio::test]
    async fn reset_clears_window_and_echo_state() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "the answer".into(),
            }),
        );

        session.handle_user_text("question").await.unwrap();
        session.reset_window().await;
        assert_eq!(session.window_len().await, 0);

        // The old reply is ordinary input again after a reset.
        let outcome = session.handle_user_text("the answer").await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Reply("the answer".into()));
    }

    #[tokio::test]
    async fn streamed_exchange_persists_after_completion() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "streamed reply".into(),
            }),
        );

        let mut seen = String::new();
        let outcome = session
            .handle_user_text_streamed("hi", |delta| seen.push_str(delta))
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Reply("streamed reply".into()));
        assert_eq!(seen, "streamed reply");
        assert_eq!(session.window_len().await, 2);
        assert_eq!(session.log.read_all().count(), 2);
    }

    #[tokio::test]
    async fn streamed_failure_persists_nothing() {
        let dir = tempdir().unwrap();
        let session = session_with(&dir, Arc::new(FailingBackend));

        let result = session.handle_user_text_streamed("hi", |_| {}).await;
        assert!(result.is_err());
        assert_eq!(session.window_len().await, 0);
        assert_eq!(session.log.read_all().count(), 0);
    }

    #[tokio::test]
    async fn compose_system_prompt_matches_pipeline_view() {
        let dir = tempdir().unwrap();
        let session = session_with(
            &dir,
            Arc::new(FixedBackend {
                reply: "unused".into(),
            }),
        );

        let prompt = session.compose_system_prompt(Some("anything"), 3).await;
        assert!(prompt.text.starts_with("### ROLE"));
    }
}
