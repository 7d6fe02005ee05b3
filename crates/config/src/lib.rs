//! Configuration loading, validation, and management for Emberkeep.
//!
//! Loads configuration from `~/.emberkeep/config.toml` with environment
//! variable overrides (`EMBERKEEP_*`). A malformed override value is
//! ignored, never fatal: budgets and knobs always end up with a usable
//! positive value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The root configuration structure.
///
/// Maps directly to `~/.emberkeep/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the durable stores (profile.json, episodes.jsonl)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Model backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Prompt composer budgets
    #[serde(default)]
    pub composer: ComposerConfig,

    /// Live-window configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Memory store configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Extra-context ingestion limits
    #[serde(default)]
    pub ingest: IngestConfig,
}

fn default_data_dir() -> PathBuf {
    AppConfig::config_dir().join("data")
}

/// Connection and generation options for the model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the generation server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model tag to request
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    #[serde(default = "default_num_predict")]
    pub num_predict: u32,

    #[serde(default = "default_num_thread")]
    pub num_thread: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,

    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: u32,
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_num_ctx() -> u32 {
    2048
}
fn default_num_predict() -> u32 {
    256
}
fn default_num_thread() -> u32 {
    4
}
fn default_temperature() -> f32 {
    0.2
}
fn default_top_p() -> f32 {
    0.9
}
fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_repeat_last_n() -> u32 {
    128
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            num_ctx: default_num_ctx(),
            num_predict: default_num_predict(),
            num_thread: default_num_thread(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
        }
    }
}

/// Token budgets and counts for the prompt composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// Hard cap on the whole composed system prompt
    #[serde(default = "default_system_tokens")]
    pub system_tokens: usize,

    /// Soft cap on the recent-episodes block
    #[serde(default = "default_recent_tokens")]
    pub recent_tokens: usize,

    /// Soft cap on the related-episodes block
    #[serde(default = "default_related_tokens")]
    pub related_tokens: usize,

    /// How many recent episodes the composer pulls by default
    #[serde(default = "default_recent_n")]
    pub recent_n: usize,

    /// How many retrieval hits the related block may hold
    #[serde(default = "default_retrieve_max_items")]
    pub retrieve_max_items: usize,

    /// The session-focus line
    #[serde(default = "default_focus")]
    pub focus: String,
}

fn default_system_tokens() -> usize {
    1200
}
fn default_recent_tokens() -> usize {
    300
}
fn default_related_tokens() -> usize {
    400
}
fn default_recent_n() -> usize {
    5
}
fn default_retrieve_max_items() -> usize {
    4
}
fn default_focus() -> String {
    "Stay consistent; carry remembered context forward.".into()
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            system_tokens: default_system_tokens(),
            recent_tokens: default_recent_tokens(),
            related_tokens: default_related_tokens(),
            recent_n: default_recent_n(),
            retrieve_max_items: default_retrieve_max_items(),
            focus: default_focus(),
        }
    }
}

/// Live-window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Token budget for the trimmed conversation window
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
}

fn default_window_tokens() -> usize {
    900
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
        }
    }
}

/// Memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Keywords that mark a turn as a high-importance milestone
    #[serde(default = "default_milestone_keywords")]
    pub milestone_keywords: Vec<String>,
}

fn default_milestone_keywords() -> Vec<String> {
    ["milestone", "vow", "promise", "anniversary", "breakthrough"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            milestone_keywords: default_milestone_keywords(),
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Duplicate-request fence window in milliseconds
    #[serde(default = "default_fence_ms")]
    pub fence_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7860
}
fn default_fence_ms() -> u64 {
    1500
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            fence_ms: default_fence_ms(),
        }
    }
}

/// Limits on extra-context ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Timeout for URL fetches, in seconds
    #[serde(default = "default_url_timeout_secs")]
    pub url_timeout_secs: u64,

    /// Per-URL character cap
    #[serde(default = "default_max_url_chars")]
    pub max_url_chars: usize,

    /// Per-file character cap
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,

    /// Cap on all ingested file content combined
    #[serde(default = "default_max_total_chars")]
    pub max_total_chars: usize,
}

fn default_url_timeout_secs() -> u64 {
    6
}
fn default_max_url_chars() -> usize {
    15_000
}
fn default_max_file_chars() -> usize {
    20_000
}
fn default_max_total_chars() -> usize {
    60_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url_timeout_secs: default_url_timeout_secs(),
            max_url_chars: default_max_url_chars(),
            max_file_chars: default_max_file_chars(),
            max_total_chars: default_max_total_chars(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.emberkeep/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".emberkeep")
    }

    /// Apply `EMBERKEEP_*` environment overrides. Unparseable values are
    /// ignored; the existing value stays.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base) = std::env::var("EMBERKEEP_BASE") {
            self.backend.base_url = base;
        }
        if let Ok(model) = std::env::var("EMBERKEEP_MODEL") {
            self.backend.model = model;
        }
        if let Ok(dir) = std::env::var("EMBERKEEP_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        override_from_env("EMBERKEEP_NUM_CTX", &mut self.backend.num_ctx);
        override_from_env("EMBERKEEP_NUM_PREDICT", &mut self.backend.num_predict);
        override_from_env("EMBERKEEP_THREADS", &mut self.backend.num_thread);
        override_from_env("EMBERKEEP_REPEAT_PENALTY", &mut self.backend.repeat_penalty);
        override_from_env("EMBERKEEP_REPEAT_LAST_N", &mut self.backend.repeat_last_n);
        override_from_env("EMBERKEEP_SYSTEM_TOKENS", &mut self.composer.system_tokens);
        override_from_env("EMBERKEEP_RECENT_TOKENS", &mut self.composer.recent_tokens);
        override_from_env("EMBERKEEP_RELATED_TOKENS", &mut self.composer.related_tokens);
        override_from_env("EMBERKEEP_RECENT_N", &mut self.composer.recent_n);
        override_from_env("EMBERKEEP_WINDOW_TOKENS", &mut self.session.window_tokens);
        override_from_env("EMBERKEEP_FENCE_MS", &mut self.gateway.fence_ms);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.composer.system_tokens == 0
            || self.composer.recent_tokens == 0
            || self.composer.related_tokens == 0
        {
            return Err(ConfigError::ValidationError(
                "composer token budgets must be positive".into(),
            ));
        }

        if self.composer.recent_n == 0 || self.composer.retrieve_max_items == 0 {
            return Err(ConfigError::ValidationError(
                "recent_n and retrieve_max_items must be positive".into(),
            ));
        }

        if self.session.window_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "window_tokens must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Path of the profile store file.
    pub fn profile_path(&self) -> PathBuf {
        self.data_dir.join("profile.json")
    }

    /// Path of the episodic log file.
    pub fn episodes_path(&self) -> PathBuf {
        self.data_dir.join("episodes.jsonl")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: BackendConfig::default(),
            composer: ComposerConfig::default(),
            session: SessionConfig::default(),
            memory: MemoryConfig::default(),
            gateway: GatewayConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// Parse an override value, keeping the current one when it does not parse.
fn parse_override<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

fn override_from_env<T: FromStr>(name: &str, slot: &mut T) {
    if let Some(value) = std::env::var(name).ok().and_then(|v| parse_override(&v)) {
        *slot = value;
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 7860);
        assert_eq!(config.composer.system_tokens, 1200);
        assert_eq!(config.session.window_tokens, 900);
        assert_eq!(config.backend.model, "llama3.2");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend.base_url, config.backend.base_url);
        assert_eq!(parsed.composer.recent_tokens, config.composer.recent_tokens);
        assert_eq!(parsed.gateway.fence_ms, config.gateway.fence_ms);
    }

    #[test]
    fn zero_budget_rejected() {
        let config = AppConfig {
            composer: ComposerConfig {
                system_tokens: 0,
                ..ComposerConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_window_rejected() {
        let config = AppConfig {
            session: SessionConfig { window_tokens: 0 },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.gateway.port, 7860);
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[gateway]\nport = 9000").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.composer.recent_tokens, 300);
    }

    #[test]
    fn malformed_override_is_ignored() {
        assert_eq!(parse_override::<usize>("not-a-number"), None);
        assert_eq!(parse_override::<usize>("600"), Some(600));
        assert_eq!(parse_override::<f32>(" 1.3 "), Some(1.3));
    }

    #[test]
    fn derived_paths() {
        let config = AppConfig {
            data_dir: PathBuf::from("/tmp/ek-data"),
            ..AppConfig::default()
        };
        assert_eq!(config.profile_path(), PathBuf::from("/tmp/ek-data/profile.json"));
        assert_eq!(
            config.episodes_path(),
            PathBuf::from("/tmp/ek-data/episodes.jsonl")
        );
    }
}
