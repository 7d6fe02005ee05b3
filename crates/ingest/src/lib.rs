//! Extra-context ingestion for Emberkeep.
//!
//! Turns a URL and/or uploaded files into labeled text chunks that the
//! gateway prepends to the user request. Everything here degrades
//! rather than fails: an unreachable URL or a binary response becomes a
//! short note inside the chunk, never an error for the exchange.
//!
//! All sizes are counted in characters and capped before the text gets
//! anywhere near the prompt.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use emberkeep_config::IngestConfig;

/// File names longer than this are clipped.
const MAX_NAME_CHARS: usize = 80;

/// One uploaded file, as received by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

/// Fetches and shapes extra context.
pub struct ContextIngestor {
    config: IngestConfig,
    client: reqwest::Client,
}

impl ContextIngestor {
    pub fn new(config: IngestConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.url_timeout_secs))
            .user_agent(concat!("emberkeep/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// Build the combined extra-context text: the URL chunk (when
    /// requested), then one chunk per file, joined with blank lines.
    ///
    /// Returns an empty string when there is nothing to add.
    pub async fn build_extra_context(
        &self,
        url: Option<&str>,
        use_web: bool,
        files: &[FileUpload],
    ) -> String {
        let mut chunks: Vec<String> = Vec::new();

        if use_web {
            if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
                if is_http_url(url) {
                    let text = self.fetch_url_text(url).await;
                    if text.is_empty() {
                        chunks.push(format!(
                            "### URL: {url}\n(unable to fetch or not text/html)"
                        ));
                    } else {
                        chunks.push(format!("### URL: {url}\n{text}"));
                    }
                } else {
                    chunks.push(format!("### URL: {url}\n(only http(s) URLs are fetched)"));
                }
            }
        }

        let mut total_chars = 0usize;
        for file in files {
            let name = file.name.trim();
            let name = clip_chars(if name.is_empty() { "upload.txt" } else { name }, MAX_NAME_CHARS);
            let content = clip_chars(&file.content, self.config.max_file_chars);
            let content_chars = content.chars().count();

            // The file that crosses the total cap is dropped, and so is
            // everything after it.
            if total_chars + content_chars > self.config.max_total_chars {
                warn!(file = %name, "Dropping file over the total context cap");
                break;
            }
            total_chars += content_chars;

            chunks.push(format!("### FILE: {name}\n{content}"));
        }

        chunks.join("\n\n")
    }

    /// Fetch a URL and reduce it to plain text. Any failure returns an
    /// empty string.
    async fn fetch_url_text(&self, url: &str) -> String {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "URL fetch failed");
                return String::new();
            }
        };

        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "URL fetch returned error status");
            return String::new();
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if !(content_type.contains("text")
            || content_type.contains("html")
            || content_type.contains("json"))
        {
            debug!(url = %url, content_type = %content_type, "Skipping non-text content");
            return String::new();
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read URL body");
                return String::new();
            }
        };

        let text = if content_type.contains("html") {
            strip_html(&body)
        } else {
            body.trim().to_string()
        };

        clip_chars(&text, self.config.max_url_chars)
    }
}

/// Prepend extra context to the user request. Pass-through when the
/// context is empty.
pub fn frame_with_context(context: &str, text: &str) -> String {
    if context.is_empty() {
        return text.to_string();
    }
    format!("### EXTRA CONTEXT\n{context}\n\n### USER REQUEST\n{text}")
}

/// Reduce HTML to plain text: tags become spaces, basic entities are
/// unescaped, whitespace is collapsed.
pub fn strip_html(html: &str) -> String {
    let no_tags = match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(html, " ").into_owned(),
        Err(_) => html.to_string(),
    };
    collapse_whitespace(&unescape_entities(&no_tags))
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn clip_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// `&amp;` goes last so already-escaped sequences unescape exactly once.
fn unescape_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
