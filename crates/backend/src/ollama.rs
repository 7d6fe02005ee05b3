//! Ollama backend implementation.
//!
//! Talks the native Ollama API: `/api/chat` with line-delimited JSON
//! streaming, a `/api/generate` fallback for servers too old to have
//! the chat endpoint, and `/api/tags` for health checks.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use emberkeep_config::BackendConfig;
use emberkeep_core::backend::{GenRequest, ModelBackend, StreamDelta};
use emberkeep_core::error::BackendError;
use emberkeep_core::turn::Role;

/// Generation options forwarded to the server under `options`.
///
/// Ollama treats every field as optional; we always send the full set so
/// behavior does not depend on server-side defaults.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GenOptions {
    pub num_ctx: u32,
    pub num_predict: u32,
    pub num_thread: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: u32,
}

impl From<&BackendConfig> for GenOptions {
    fn from(config: &BackendConfig) -> Self {
        Self {
            num_ctx: config.num_ctx,
            num_predict: config.num_predict,
            num_thread: config.num_thread,
            temperature: config.temperature,
            top_p: config.top_p,
            repeat_penalty: config.repeat_penalty,
            repeat_last_n: config.repeat_last_n,
        }
    }
}

/// A backend speaking the native Ollama HTTP API.
pub struct OllamaBackend {
    base_url: String,
    model: String,
    options: GenOptions,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a backend from configuration.
    pub fn new(config: &BackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            options: GenOptions::from(config),
            client,
        }
    }

    /// Convert a request into Ollama chat messages, system first.
    fn to_api_messages(request: &GenRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if !request.system.is_empty() {
            messages.push(ApiMessage {
                role: "system".into(),
                content: request.system.clone(),
            });
        }
        for turn in &request.turns {
            messages.push(ApiMessage {
                role: turn.role.as_str().into(),
                content: turn.content.clone(),
            });
        }
        messages
    }

    /// Flatten a request into the single-prompt format `/api/generate`
    /// expects: system context, then labeled turns, then an open
    /// `Assistant:` cue.
    fn flatten_prompt(request: &GenRequest) -> String {
        let mut prompt = String::new();
        if !request.system.is_empty() {
            prompt.push_str(&request.system);
            prompt.push_str("\n\n");
        }
        for turn in &request.turns {
            let label = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => continue,
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }
        prompt.push_str("Assistant:");
        prompt
    }

    /// Map a non-success status to a typed error.
    ///
    /// A 404 whose body names the model is a missing model; a bare 404 is
    /// an old server without `/api/chat`, which callers treat as the cue
    /// to fall back to `/api/generate`.
    fn classify_status(status: u16, body: &str, model: &str) -> BackendError {
        if status == 404 && body.contains(model) {
            BackendError::ModelNotFound(model.to_string())
        } else {
            BackendError::ApiError {
                status_code: status,
                message: body.to_string(),
            }
        }
    }

    fn transport_error(e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }

    /// Errors that warrant one fallback attempt against `/api/generate`.
    fn is_fallback_trigger(e: &BackendError) -> bool {
        matches!(
            e,
            BackendError::Network(_)
                | BackendError::Timeout(_)
                | BackendError::ApiError {
                    status_code: 404,
                    ..
                }
        )
    }

    /// POST `/api/chat`, returning the raw response once the status is ok.
    async fn post_chat(
        &self,
        request: &GenRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, BackendError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(request),
            "options": self.options,
            "stream": stream,
        });

        debug!(model = %self.model, stream, "Sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Chat endpoint returned error");
            return Err(Self::classify_status(status, &error_body, &self.model));
        }

        Ok(response)
    }

    /// Single-shot chat completion.
    async fn chat_once(&self, request: &GenRequest) -> std::result::Result<String, BackendError> {
        let response = self.post_chat(request, false).await?;

        let api_response: ChatResponse =
            response.json().await.map_err(|e| BackendError::ApiError {
                status_code: 200,
                message: format!("Failed to parse chat response: {e}"),
            })?;

        Ok(api_response
            .message
            .map(|m| m.content)
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Single-shot completion against the legacy `/api/generate` endpoint.
    async fn generate_once(
        &self,
        request: &GenRequest,
    ) -> std::result::Result<String, BackendError> {
        let url = format!("{}/api/generate", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "prompt": Self::flatten_prompt(request),
            "options": self.options,
            "stream": false,
        });

        debug!(model = %self.model, "Sending generate request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Generate endpoint returned error");
            return Err(Self::classify_status(status, &error_body, &self.model));
        }

        let api_response: GenerateResponse =
            response.json().await.map_err(|e| BackendError::ApiError {
                status_code: 200,
                message: format!("Failed to parse generate response: {e}"),
            })?;

        Ok(api_response.response.trim().to_string())
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenRequest) -> std::result::Result<String, BackendError> {
        match self.chat_once(&request).await {
            Ok(text) => Ok(text),
            Err(e) if Self::is_fallback_trigger(&e) => {
                warn!(error = %e, "Chat endpoint unavailable, falling back to /api/generate");
                self.generate_once(&request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn stream(
        &self,
        request: GenRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamDelta, BackendError>>,
        BackendError,
    > {
        let response = match self.post_chat(&request, true).await {
            Ok(response) => response,
            Err(e) if Self::is_fallback_trigger(&e) => {
                warn!(error = %e, "Chat endpoint unavailable, falling back to single-shot generate");
                let text = self.generate_once(&request).await?;
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let _ = tx
                    .send(Ok(StreamDelta {
                        content: Some(text),
                        done: true,
                    }))
                    .await;
                return Ok(rx);
            }
            Err(e) => return Err(e),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let model = self.model.clone();

        // Spawn task to read the line-delimited JSON stream
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(BackendError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                // Append new bytes to our line buffer
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<ChatStreamChunk>(&line) {
                        Ok(chunk) => {
                            let content = chunk
                                .message
                                .map(|m| m.content)
                                .filter(|c| !c.is_empty());

                            if content.is_some() || chunk.done {
                                let delta = StreamDelta {
                                    content,
                                    done: chunk.done,
                                };
                                if tx.send(Ok(delta)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }

                            if chunk.done {
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(
                                model = %model,
                                line = %line,
                                error = %e,
                                "Ignoring unparseable stream line"
                            );
                        }
                    }
                }
            }

            // Stream ended without a done marker
            let _ = tx
                .send(Ok(StreamDelta {
                    content: None,
                    done: true,
                }))
                .await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, BackendError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await
            .map_err(Self::transport_error)?;

        Ok(response.status().is_success())
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ApiChatMessage>,
}

/// A single line of a streaming `/api/chat` response.
#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    message: Option<ApiChatMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberkeep_core::turn::Turn;

    #[test]
    fn constructor_trims_trailing_slash() {
        let config = BackendConfig {
            base_url: "http://localhost:11434/".into(),
            ..BackendConfig::default()
        };
        let backend = OllamaBackend::new(&config);
        assert_eq!(backend.base_url, "http://localhost:11434");
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn options_mirror_config() {
        let options = GenOptions::from(&BackendConfig::default());
        assert_eq!(options.num_ctx, 2048);
        assert_eq!(options.num_predict, 256);
        assert!((options.temperature - 0.2).abs() < f32::EPSILON);

        let value = serde_json::to_value(options).unwrap();
        assert_eq!(value["num_thread"], 4);
        assert_eq!(value["repeat_last_n"], 128);
    }

    #[test]
    fn api_messages_put_system_first() {
        let request = GenRequest::new(
            "be helpful",
            vec![Turn::user("hi"), Turn::assistant("hello")],
        );
        let messages = OllamaBackend::to_api_messages(&request);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "be helpful");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }

    #[test]
    fn empty_system_is_omitted() {
        let request = GenRequest::new("", vec![Turn::user("hi")]);
        let messages = OllamaBackend::to_api_messages(&request);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn flatten_prompt_single_turn() {
        let request = GenRequest::new("You keep memory.", vec![Turn::user("what did I say?")]);
        assert_eq!(
            OllamaBackend::flatten_prompt(&request),
            "You keep memory.\n\nUser: what did I say?\nAssistant:"
        );
    }

    #[test]
    fn flatten_prompt_carries_history() {
        let request = GenRequest::new(
            "S",
            vec![Turn::user("a"), Turn::assistant("b"), Turn::user("c")],
        );
        assert_eq!(
            OllamaBackend::flatten_prompt(&request),
            "S\n\nUser: a\nAssistant: b\nUser: c\nAssistant:"
        );
    }

    // --- Stream parsing tests ---

    #[test]
    fn parse_stream_content_chunk() {
        let line = r#"{"model":"llama3.2","created_at":"2025-01-01T00:00:00Z","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        let chunk: ChatStreamChunk = serde_json::from_str(line).unwrap();
        assert_eq!(chunk.message.unwrap().content, "Hel");
        assert!(!chunk.done);
    }

    #[test]
    fn parse_stream_done_chunk() {
        let line = r#"{"model":"llama3.2","created_at":"2025-01-01T00:00:01Z","message":{"role":"assistant","content":""},"done":true,"total_duration":123456,"eval_count":42}"#;
        let chunk: ChatStreamChunk = serde_json::from_str(line).unwrap();
        assert!(chunk.done);
        assert!(chunk.message.unwrap().content.is_empty());
    }

    #[test]
    fn parse_chat_response() {
        let body = r#"{"model":"llama3.2","message":{"role":"assistant","content":"full reply"},"done":true}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.unwrap().content, "full reply");
    }

    #[test]
    fn parse_generate_response() {
        let body = r#"{"model":"llama3.2","response":"fallback reply","done":true}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.response, "fallback reply");
    }

    // --- Error mapping tests ---

    #[test]
    fn missing_model_maps_to_typed_error() {
        let body = r#"{"error":"model \"llama3.2\" not found, try pulling it first"}"#;
        let err = OllamaBackend::classify_status(404, body, "llama3.2");
        assert!(matches!(err, BackendError::ModelNotFound(m) if m == "llama3.2"));
    }

    #[test]
    fn endpoint_404_stays_api_error() {
        // An old server without /api/chat answers with a bare 404 page.
        let err = OllamaBackend::classify_status(404, "404 page not found", "llama3.2");
        assert!(matches!(
            err,
            BackendError::ApiError {
                status_code: 404,
                ..
            }
        ));
    }

    #[test]
    fn server_error_maps_to_api_error() {
        let err = OllamaBackend::classify_status(500, "boom", "llama3.2");
        assert!(matches!(
            err,
            BackendError::ApiError {
                status_code: 500,
                ..
            }
        ));
    }

    #[test]
    fn fallback_triggers_cover_missing_endpoint_only() {
        assert!(OllamaBackend::is_fallback_trigger(&BackendError::Network(
            "connection refused".into()
        )));
        assert!(OllamaBackend::is_fallback_trigger(
            &BackendError::ApiError {
                status_code: 404,
                message: String::new(),
            }
        ));
        assert!(!OllamaBackend::is_fallback_trigger(
            &BackendError::ModelNotFound("llama3.2".into())
        ));
        assert!(!OllamaBackend::is_fallback_trigger(
            &BackendError::ApiError {
                status_code: 500,
                message: String::new(),
            }
        ));
    }
}
