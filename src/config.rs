//! Configuration loading for chatrelay.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable overriding `service.api_key`.
pub const ENV_API_KEY: &str = "CHATRELAY_API_KEY";
/// Environment variable overriding `service.chatbot_id`.
pub const ENV_CHATBOT_ID: &str = "CHATRELAY_CHATBOT_ID";

/// Get the chatrelay home directory (~/.chatrelay).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".chatrelay"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.chatrelay/settings.json
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run 'chatrelay init' first.",
            path.display()
        )));
    }

    load_settings_from(&path)
}

/// Load settings from an explicit path, apply environment overrides and validate.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    let mut settings: Settings = serde_json::from_str(&content)?;

    apply_env_overrides(&mut settings);
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings or return default if not found.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        let mut settings = Settings::default();
        apply_env_overrides(&mut settings);
        settings
    })
}

/// Write settings to the given path, creating parent directories.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(key) = std::env::var(ENV_API_KEY) {
        if !key.is_empty() {
            settings.service.api_key = Some(key);
        }
    }
    if let Ok(id) = std::env::var(ENV_CHATBOT_ID) {
        if !id.is_empty() {
            settings.service.chatbot_id = Some(id);
        }
    }
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.dispatch.max_concurrency == 0 {
        return Err(Error::Config(
            "dispatch.max_concurrency must be at least 1".to_string(),
        ));
    }
    if settings.dispatch.max_queue_per_chat == Some(0) {
        return Err(Error::Config(
            "dispatch.max_queue_per_chat must be at least 1 when set".to_string(),
        ));
    }
    if settings.retry.max_retries == 0 {
        return Err(Error::Config(
            "retry.max_retries must be at least 1".to_string(),
        ));
    }
    if settings.agent.conversation_history_limit == 0 {
        return Err(Error::Config(
            "agent.conversation_history_limit must be at least 1".to_string(),
        ));
    }
    if let Some(url) = settings.service.base_url.as_deref() {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "service.base_url '{}' must start with http:// or https://",
                url
            )));
        }
    }
    Ok(())
}

/// Admission limits for the dispatch queue.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DispatchSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_per_chat_rate_limit_ms")]
    pub per_chat_rate_limit_ms: u64,
    /// Unbounded when absent.
    #[serde(default)]
    pub max_queue_per_chat: Option<usize>,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_per_chat_rate_limit_ms() -> u64 {
    1000
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_chat_rate_limit_ms: default_per_chat_rate_limit_ms(),
            max_queue_per_chat: None,
        }
    }
}

impl DispatchSettings {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.per_chat_rate_limit_ms)
    }
}

/// Agent-mode configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AgentSettings {
    /// Agent mode when true, direct mode otherwise.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_role")]
    pub role: String,
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_history_limit")]
    pub conversation_history_limit: usize,
}

fn default_role() -> String {
    "assistant".to_string()
}

fn default_max_iterations() -> u32 {
    3
}

fn default_history_limit() -> usize {
    10
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            role: default_role(),
            system_prompt: None,
            max_iterations: default_max_iterations(),
            conversation_history_limit: default_history_limit(),
        }
    }
}

/// Retry policy for outbound calls.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RetrySettings {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Completion and ingestion service endpoint.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServiceSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub chatbot_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// No deadline when absent.
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            chatbot_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: None,
        }
    }
}

/// Where replies are delivered.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OutboundSettings {
    pub response_url: Option<String>,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
}

fn default_fallback_text() -> String {
    "Sorry, I couldn't process your message right now. Please try again in a moment.".to_string()
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            response_url: None,
            fallback_text: default_fallback_text(),
        }
    }
}

/// Admin/inbound HTTP server.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WebSettings {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}

fn default_web_port() -> u16 {
    3333
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

/// chatrelay settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub outbound: OutboundSettings,

    #[serde(default)]
    pub web: WebSettings,
}
