//! TOML configuration parsing.
//!
//! The configuration object is built once at process start and passed by
//! reference into the pipeline. Later layers win:
//!
//! 1. built-in defaults
//! 2. the TOML file (`--config`)
//! 3. environment variables, including a `.env` file ([`Config::apply_env`])
//! 4. CLI flags
//!
//! Nothing in the core reads ambient globals after that; credentials are
//! looked up from the environment variable named by each provider table.
//!
//! Every section is optional; an empty file (or no file) yields the
//! defaults documented in `config/ocrfix.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub references: ReferencesConfig,
    #[serde(default)]
    pub folder: FolderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrectionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Records with confidence strictly below this value are sent for correction.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub include_gt: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
    /// Tokens this long or shorter must come back unchanged.
    #[serde(default = "default_short_token_len")]
    pub short_token_len: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            threshold: default_threshold(),
            include_gt: false,
            max_attempts: default_max_attempts(),
            retry_pause_ms: default_retry_pause_ms(),
            short_token_len: default_short_token_len(),
        }
    }
}

impl CorrectionConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_threshold() -> f64 {
    1.01
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_pause_ms() -> u64 {
    1000
}
fn default_short_token_len() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first call, so `max_retries + 1` requests at most.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub gpt: ProviderConfig,
    #[serde(default)]
    pub deepseek: ProviderConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            temperature: 0.0,
            gpt: ProviderConfig::default(),
            deepseek: ProviderConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Endpoint settings for the given provider: configured values over the
    /// provider's built-in defaults.
    pub fn endpoint(&self, provider: Provider) -> Endpoint {
        let (section, defaults) = match provider {
            Provider::Gpt => (&self.gpt, Endpoint::gpt()),
            Provider::Deepseek => (&self.deepseek, Endpoint::deepseek()),
        };
        Endpoint {
            base_url: section.base_url.clone().unwrap_or(defaults.base_url),
            model: section.model.clone().unwrap_or(defaults.model),
            api_key_env: section.api_key_env.clone().unwrap_or(defaults.api_key_env),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}

/// A `[llm.<provider>]` table. Unset keys fall back to the provider's
/// defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// One fully resolved chat-completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
}

impl Endpoint {
    fn gpt() -> Self {
        Self {
            base_url: "https://api.chatanywhere.tech/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }

    fn deepseek() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
        }
    }
}

/// Supported provider tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gpt,
    Deepseek,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gpt => "gpt",
            Provider::Deepseek => "deepseek",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpt" => Ok(Provider::Gpt),
            "deepseek" => Ok(Provider::Deepseek),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferencesConfig {
    #[serde(default)]
    pub tokens_path: Option<PathBuf>,
    #[serde(default = "default_reference_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub knowledge_base_path: Option<PathBuf>,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            tokens_path: None,
            max_tokens: default_reference_max_tokens(),
            knowledge_base_path: None,
        }
    }
}

fn default_reference_max_tokens() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct FolderConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Pause between files in folder mode.
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            pause_secs: default_pause_secs(),
        }
    }
}

impl FolderConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["*.txt".to_string()]
}
fn default_pause_secs() -> u64 {
    10
}

impl Config {
    /// The selected provider, or a [`ConfigError::UnsupportedProvider`].
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        self.llm.provider.parse()
    }

    /// Check invariants that must hold before any file is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.correction.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(0));
        }
        if self.correction.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts);
        }
        self.provider()?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values count as unset.
    ///
    /// | Variable | Setting |
    /// |----------|---------|
    /// | `LLM_PROVIDER` | `llm.provider` |
    /// | `OPENAI_BASE_URL`, `OPENAI_MODEL` | `llm.gpt` |
    /// | `DEEPSEEK_BASE_URL`, `DEEPSEEK_MODEL` | `llm.deepseek` |
    /// | `BATCH_SIZE` | `correction.batch_size` |
    /// | `CONFIDENCE_THRESHOLD` | `correction.threshold` |
    /// | `INCLUDE_GT_IN_PROMPT` | `correction.include_gt` |
    /// | `REFERENCE_TOKENS_PATH` | `references.tokens_path` |
    /// | `REFERENCE_MAX_TOKENS` | `references.max_tokens` |
    /// | `RAG_KB_PATH` | `references.knowledge_base_path` |
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = v.trim().to_string();
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.gpt.base_url = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.gpt.model = Some(v);
        }
        if let Some(v) = get("DEEPSEEK_BASE_URL") {
            self.llm.deepseek.base_url = Some(v);
        }
        if let Some(v) = get("DEEPSEEK_MODEL") {
            self.llm.deepseek.model = Some(v);
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.correction.batch_size = parse_env("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("CONFIDENCE_THRESHOLD") {
            self.correction.threshold = parse_env("CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("INCLUDE_GT_IN_PROMPT") {
            self.correction.include_gt = parse_env_flag("INCLUDE_GT_IN_PROMPT", &v)?;
        }
        if let Some(v) = get("REFERENCE_TOKENS_PATH") {
            self.references.tokens_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("REFERENCE_MAX_TOKENS") {
            self.references.max_tokens = parse_env("REFERENCE_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("RAG_KB_PATH") {
            self.references.knowledge_base_path = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_env_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Read and parse a TOML config file. Validation is left to the caller so
/// CLI overrides can be applied first.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    Ok(config)
}
