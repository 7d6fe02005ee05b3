//! HTTP gateway for Emberkeep.
//!
//! Exposes the chat endpoint and a health probe over a small axum
//! router. The gateway adds what HTTP needs on top of the session
//! pipeline: a duplicate-request fence against client retries, and
//! extra-context ingestion for URLs and file uploads.
//!
//! The fence compares the raw request text, before any extra-context
//! framing; the session's echo guard compares trimmed text. A padded
//! echo therefore slips past the fence and surfaces as the echo
//! sentinel instead of an empty reply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use emberkeep_backend::OllamaBackend;
use emberkeep_composer::{ComposerBudget, PromptComposer};
use emberkeep_config::AppConfig;
use emberkeep_core::backend::ModelBackend;
use emberkeep_ingest::{frame_with_context, ContextIngestor, FileUpload};
use emberkeep_memory::{EpisodeLog, ProfileStore, TurnRecorder};
use emberkeep_session::{ExchangeOutcome, SessionManager};

/// The literal reply for an echoed input.
const ECHO_SENTINEL: &str = "(ignored echo)";

/// Duplicate-request fence state.
#[derive(Default)]
struct FenceState {
    last_user: Option<String>,
    accepted_at: Option<Instant>,
    last_reply: Option<String>,
}

impl FenceState {
    /// True when `raw` repeats the prior accepted input inside the fence
    /// window, or repeats the prior produced reply (no window on that arm).
    fn is_duplicate(&self, raw: &str, now: Instant, window: Duration) -> bool {
        if let (Some(last), Some(at)) = (self.last_user.as_deref(), self.accepted_at) {
            if last == raw && now.duration_since(at) <= window {
                return true;
            }
        }
        self.last_reply.as_deref() == Some(raw)
    }
}

/// Shared application state for the gateway.
pub struct GatewayState {
    session: SessionManager,
    ingest: ContextIngestor,
    fence: Mutex<FenceState>,
    fence_ms: u64,
    base_url: String,
    model: String,
    backend: Arc<dyn ModelBackend>,
}

type SharedState = Arc<GatewayState>;

/// Wire the full pipeline from configuration.
pub fn build_state(config: &AppConfig) -> SharedState {
    let profiles = Arc::new(ProfileStore::new(config.profile_path()));
    let log = Arc::new(EpisodeLog::new(config.episodes_path()));
    let recorder = TurnRecorder::new(config.memory.milestone_keywords.clone());

    let composer = PromptComposer::new(
        profiles,
        log.clone(),
        ComposerBudget {
            system: config.composer.system_tokens,
            recent: config.composer.recent_tokens,
            related: config.composer.related_tokens,
        },
    )
    .with_focus(config.composer.focus.clone())
    .with_retrieve_max_items(config.composer.retrieve_max_items);

    let backend: Arc<dyn ModelBackend> = Arc::new(OllamaBackend::new(&config.backend));

    let session = SessionManager::new(log, recorder, composer, backend.clone())
        .with_window_tokens(config.session.window_tokens)
        .with_recent_n(config.composer.recent_n);

    Arc::new(GatewayState {
        session,
        ingest: ContextIngestor::new(config.ingest.clone()),
        fence: Mutex::new(FenceState::default()),
        fence_ms: config.gateway.fence_ms,
        base_url: config.backend.base_url.clone(),
        model: config.backend.model.clone(),
        backend,
    })
}

/// Build the axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/ping", get(ping_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = build_state(&config);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    use_web: Option<bool>,
    #[serde(default)]
    files: Vec<FileUpload>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    let raw = payload.text;
    if raw.trim().is_empty() {
        return Ok(Json(ChatResponse {
            reply: String::new(),
        }));
    }

    // Fence on the raw text, before extra-context framing. A fenced
    // request does not slide the window.
    {
        let fence = state.fence.lock().await;
        let window = Duration::from_millis(state.fence_ms);
        if fence.is_duplicate(&raw, Instant::now(), window) {
            debug!("Duplicate request fenced");
            return Ok(Json(ChatResponse {
                reply: String::new(),
            }));
        }
    }

    let context = state
        .ingest
        .build_extra_context(
            payload.url.as_deref(),
            payload.use_web.unwrap_or(false),
            &payload.files,
        )
        .await;
    let framed = frame_with_context(&context, &raw);

    let outcome = match state.session.handle_user_text(&framed).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Fence state stays untouched so the client may retry.
            error!(error = %e, "Exchange failed");
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ));
        }
    };

    let (reply, produced) = match outcome {
        ExchangeOutcome::Reply(reply) => (reply, true),
        ExchangeOutcome::IgnoredEcho => (ECHO_SENTINEL.to_string(), false),
        ExchangeOutcome::Empty => (String::new(), false),
    };

    {
        let mut fence = state.fence.lock().await;
        fence.last_user = Some(raw);
        fence.accepted_at = Some(Instant::now());
        if produced {
            fence.last_reply = Some(reply.clone());
        }
    }

    Ok(Json(ChatResponse { reply }))
}

#[derive(Debug, Serialize)]
struct PingResponse {
    ok: bool,
    rtt_ms: u64,
    base: String,
    model: String,
}

async fn ping_handler(State(state): State<SharedState>) -> Json<PingResponse> {
    let started = Instant::now();
    let ok = state.backend.health_check().await.unwrap_or(false);
    let rtt_ms = started.elapsed().as_millis() as u64;

    Json(PingResponse {
        ok,
        rtt_ms,
        base: state.base_url.clone(),
        model: state.model.clone(),
    })
}
