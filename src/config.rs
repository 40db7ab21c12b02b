//! Configuration loading and management for mailcast.
//!
//! Loads settings from `mailcast.toml` with environment variable overrides for sensitive data.
//! The file is optional: a run driven purely by the environment is valid.

use crate::extract::TagPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Which message template the formatter uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One summary per headed section, links listed as `🔗URL:` lines
    #[default]
    Sections,
    /// Every extracted fragment rendered in order, each paragraph summarised
    Fragments,
}

/// Mailbox connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub mailbox: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Outbound webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    /// Retry budget per chunk, shared by rate limits and failures
    pub max_retries: u32,
    /// Fixed backoff after a generic failure
    pub retry_delay_secs: u64,
    /// Pause between successfully delivered chunks
    pub pacing_secs: u64,
    /// Largest chunk the provider accepts, in characters
    pub max_chunk_len: usize,
}

/// Chat-completion endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DigestConfig {
    pub layout: Layout,
    /// Element kinds extracted from HTML bodies
    pub tags: TagPolicy,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mail: MailConfig,
    pub webhook: WebhookConfig,
    pub summarizer: SummarizerConfig,
    pub digest: DigestConfig,
}

impl Config {
    /// Load configuration from the default location (mailcast.toml in cwd or home),
    /// falling back to defaults, then apply the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::read_file(&path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific path, then apply the process environment
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Override secrets from environment variables.
    ///
    /// `lookup` is the environment; tests pass a closure over a map.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("EMAIL") {
            self.mail.username = Some(value);
        }
        if let Some(value) = lookup("PASSWORD") {
            self.mail.password = Some(value);
        }
        if let Some(value) = lookup("WEBHOOK_URL") {
            self.webhook.url = Some(value);
        }
        if let Some(value) = lookup("OPENAI_KEY") {
            self.summarizer.api_key = Some(value);
        }
    }

    /// Check that every value a full run needs is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sources()?;
        self.webhook_url()?;
        Ok(())
    }

    /// Check the mailbox and summariser settings only, as a dry run needs
    pub fn validate_sources(&self) -> Result<(), ConfigError> {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.trim().is_empty())
        }

        if !present(&self.mail.username) {
            return Err(ConfigError::Missing("mail.username (EMAIL)"));
        }
        if !present(&self.mail.password) {
            return Err(ConfigError::Missing("mail.password (PASSWORD)"));
        }
        self.api_key()?;
        Ok(())
    }

    pub fn webhook_url(&self) -> Result<&str, ConfigError> {
        self.webhook
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("webhook.url (WEBHOOK_URL)"))
    }

    /// Get the API key for the summarisation endpoint
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.summarizer
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("summarizer.api_key (OPENAI_KEY)"))
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from("mailcast.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config").join("mailcast").join("mailcast.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }
}

impl WebhookConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_secs)
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: "imap.gmail.com".to_string(),
            port: 993,
            mailbox: "INBOX".to_string(),
            username: None,
            password: None,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: 3,
            retry_delay_secs: 5,
            pacing_secs: 1,
            max_chunk_len: crate::format::MAX_BLOCK_LEN,
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-3.5-turbo-16k".to_string(),
            max_tokens: 300,
            system_prompt: "You are an assistant who summarizes news articles in Japanese into \
                            about 200 characters. You can generate interesting sentences."
                .to_string(),
            timeout_secs: 60,
            api_key: None,
        }
    }
}
