//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.mindbot/config.json`).
//! Secrets (platform credentials, backend API key) can be supplied or
//! overridden via environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Stream ingress bind/port and platform credentials.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Agent backend (Dify) settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Voice recognition fallback chain.
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Card streaming batching/retry settings.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Duplicate-delivery suppression window.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Concurrency and size limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Platform-facing settings: ingress bind and robot credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    /// Ingress port (default 15250).
    #[serde(default = "default_ingress_port")]
    pub port: u16,

    /// Ingress bind address (default "127.0.0.1").
    #[serde(default = "default_ingress_bind")]
    pub bind: String,

    /// App client id. Overridden by MINDBOT_CLIENT_ID env when set.
    pub client_id: Option<String>,
    /// App client secret. Overridden by MINDBOT_CLIENT_SECRET env when set.
    pub client_secret: Option<String>,
    /// Robot code for the platform bot.
    pub robot_code: Option<String>,
    /// AI card template id used for streamed responses.
    #[serde(default)]
    pub card_template_id: String,
    /// When false, responses are always sent as one plain message.
    #[serde(default = "default_true")]
    pub enable_streaming: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            port: default_ingress_port(),
            bind: default_ingress_bind(),
            client_id: None,
            client_secret: None,
            robot_code: None,
            card_template_id: String::new(),
            enable_streaming: true,
        }
    }
}

/// Agent backend settings (Dify chat-messages API).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// API base URL (e.g. "https://api.dify.ai/v1"). Default is loopback.
    pub base_url: Option<String>,
    /// API key. Overridden by MINDBOT_BACKEND_API_KEY env when set.
    pub api_key: Option<String>,
    /// Request timeout in seconds (default 120).
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

/// One hosted speech-to-text fallback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionEndpointConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_transcription_model")]
    pub model: String,
}

/// Recognition chain settings: per-tier timeout and fallback endpoints tried
/// after the platform-native transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionConfig {
    /// Per-provider timeout in seconds (default 10).
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Fallback speech-to-text endpoints, tried in order.
    #[serde(default)]
    pub fallback_endpoints: Vec<TranscriptionEndpointConfig>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            fallback_endpoints: Vec::new(),
        }
    }
}

/// Card streaming batching and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingConfig {
    /// Flush once this many characters are pending (default 20).
    #[serde(default = "default_min_flush_chars")]
    pub min_flush_chars: usize,
    /// Flush pending text after this many milliseconds (default 50).
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
    /// Retries per card update before the stream degrades (default 3).
    #[serde(default = "default_max_push_retries")]
    pub max_push_retries: u32,
    /// Delay between retries in milliseconds (default 500).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per delivery-call timeout in seconds (default 10).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_flush_chars: default_min_flush_chars(),
            flush_debounce_ms: default_flush_debounce_ms(),
            max_push_retries: default_max_push_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Duplicate-suppression window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupConfig {
    /// Key time-to-live in seconds (default 300).
    #[serde(default = "default_dedup_ttl_secs")]
    pub ttl_secs: u64,
    /// Cap on live entries; oldest evicted first (default 1000).
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_dedup_ttl_secs(),
            capacity: default_dedup_capacity(),
        }
    }
}

/// Concurrency and message-size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Outstanding backend calls allowed at once (default 64).
    #[serde(default = "default_max_concurrent_backend_calls")]
    pub max_concurrent_backend_calls: usize,
    /// Plain-message length cap; longer text is truncated (default 5000).
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_backend_calls: default_max_concurrent_backend_calls(),
            message_limit: default_message_limit(),
        }
    }
}

fn default_ingress_port() -> u16 {
    15250
}

fn default_ingress_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_backend_timeout_secs() -> u64 {
    120
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_min_flush_chars() -> usize {
    20
}

fn default_flush_debounce_ms() -> u64 {
    50
}

fn default_max_push_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_dedup_ttl_secs() -> u64 {
    300
}

fn default_dedup_capacity() -> usize {
    1000
}

fn default_max_concurrent_backend_calls() -> usize {
    64
}

fn default_message_limit() -> usize {
    5000
}

/// Resolve the backend API key: env MINDBOT_BACKEND_API_KEY overrides config.
pub fn resolve_backend_api_key(config: &Config) -> Option<String> {
    env_or(&config.backend.api_key, "MINDBOT_BACKEND_API_KEY")
}

/// Resolve platform credentials (client id, client secret): env overrides config.
pub fn resolve_platform_credentials(config: &Config) -> (Option<String>, Option<String>) {
    (
        env_or(&config.platform.client_id, "MINDBOT_CLIENT_ID"),
        env_or(&config.platform.client_secret, "MINDBOT_CLIENT_SECRET"),
    )
}

fn env_or(configured: &Option<String>, var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            configured
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default (~/.mindbot/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("MINDBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".mindbot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or MINDBOT_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
