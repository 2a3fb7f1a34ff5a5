//! Configuration loading, validation, and management for Afina.
//!
//! Loads configuration from `~/.afina/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.afina/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used when a model role doesn't name one
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model assignment per stage
    #[serde(default)]
    pub models: ModelsConfig,

    /// Context and loop bounds
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Web search tool
    #[serde(default)]
    pub search: SearchConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Uploaded document storage
    #[serde(default)]
    pub uploads: UploadsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("models", &self.models)
            .field("limits", &self.limits)
            .field("search", &self.search)
            .field("gateway", &self.gateway)
            .field("uploads", &self.uploads)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("max_results", &self.max_results)
            .field("region", &self.region)
            .field("timeout_secs", &self.timeout_secs)
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// Which model serves a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRole {
    /// Provider name; falls back to `default_provider`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    pub model: String,

    #[serde(default)]
    pub temperature: f32,
}

impl ModelRole {
    fn new(model: &str) -> Self {
        Self {
            provider: None,
            model: model.into(),
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Intent and confirmation classification
    #[serde(default = "default_router_model")]
    pub router: ModelRole,

    /// General assistant with tool use
    #[serde(default = "default_assistant_model")]
    pub assistant: ModelRole,

    /// Report analysis and follow-up answers
    #[serde(default = "default_analyst_model")]
    pub analyst: ModelRole,
}

fn default_router_model() -> ModelRole {
    ModelRole::new("gpt-4o-mini")
}
fn default_assistant_model() -> ModelRole {
    ModelRole::new("gpt-4o")
}
fn default_analyst_model() -> ModelRole {
    ModelRole::new("gpt-4o-mini")
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            router: default_router_model(),
            assistant: default_assistant_model(),
            analyst: default_analyst_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Files included in one analysis prompt
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Characters kept per file in the analysis prompt
    #[serde(default = "default_max_chars_per_file")]
    pub max_chars_per_file: usize,

    /// Characters of the analysis prompt kept in the report
    #[serde(default = "default_prompt_snapshot_chars")]
    pub prompt_snapshot_chars: usize,

    /// Characters of the report answer quoted in follow-up prompts
    #[serde(default = "default_report_excerpt_chars")]
    pub report_excerpt_chars: usize,

    /// Prior messages quoted in follow-up prompts
    #[serde(default = "default_follow_up_history")]
    pub follow_up_history: usize,

    /// Messages sent to the general assistant
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Tool round-trips per turn before the assistant must answer in text
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_max_files() -> usize {
    8
}
fn default_max_chars_per_file() -> usize {
    20_000
}
fn default_prompt_snapshot_chars() -> usize {
    4_000
}
fn default_report_excerpt_chars() -> usize {
    3_000
}
fn default_follow_up_history() -> usize {
    2
}
fn default_context_window() -> usize {
    20
}
fn default_max_tool_rounds() -> usize {
    4
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_chars_per_file: default_max_chars_per_file(),
            prompt_snapshot_chars: default_prompt_snapshot_chars(),
            report_excerpt_chars: default_report_excerpt_chars(),
            follow_up_history: default_follow_up_history(),
            context_window: default_context_window(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// "duckduckgo" (no key) or "brave"
    #[serde(default = "default_search_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_max_results")]
    pub max_results: usize,

    #[serde(default = "default_search_region")]
    pub region: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Explicit proxy URL for outbound search traffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_search_provider() -> String {
    "duckduckgo".into()
}
fn default_search_max_results() -> usize {
    5
}
fn default_search_region() -> String {
    "ru-ru".into()
}
fn default_search_timeout() -> u64 {
    15
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key: None,
            max_results: default_search_max_results(),
            region: default_search_region(),
            timeout_secs: default_search_timeout(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Root directory; files live under `<dir>/<chat_id>/<name>`
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,
}

fn default_uploads_dir() -> PathBuf {
    AppConfig::config_dir().join("uploads")
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.afina/config.toml).
    ///
    /// Environment overrides:
    /// - `AFINA_API_KEY`, then `OPENAI_API_KEY`, then `OPENROUTER_API_KEY`
    /// - `AFINA_PROVIDER`
    /// - `AFINA_UPLOADS_DIR`
    /// - `AFINA_SEARCH_PROXY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("AFINA_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(provider) = lookup("AFINA_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(dir) = lookup("AFINA_UPLOADS_DIR") {
            self.uploads.dir = PathBuf::from(dir);
        }

        if let Some(proxy) = lookup("AFINA_SEARCH_PROXY") {
            self.search.proxy = Some(proxy);
        }
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
        dirs_home().join(".afina")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (role, cfg) in [
            ("router", &self.models.router),
            ("assistant", &self.models.assistant),
            ("analyst", &self.models.analyst),
        ] {
            if !(0.0..=2.0).contains(&cfg.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "models.{role}.temperature must be between 0.0 and 2.0"
                )));
            }
            if cfg.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "models.{role}.model must not be empty"
                )));
            }
        }

        let positive = [
            ("limits.max_files", self.limits.max_files),
            ("limits.max_chars_per_file", self.limits.max_chars_per_file),
            ("limits.context_window", self.limits.context_window),
            ("limits.max_tool_rounds", self.limits.max_tool_rounds),
            ("search.max_results", self.search.max_results),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            models: ModelsConfig::default(),
            limits: LimitsConfig::default(),
            search: SearchConfig::default(),
            gateway: GatewayConfig::default(),
            uploads: UploadsConfig::default(),
            providers: HashMap::new(),
        }
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
