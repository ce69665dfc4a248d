//! Configuration loading.
//!
//! Loads from `$BOTPOLL_CONFIG_PATH` or `~/.botpoll/config.toml`.
//! Environment variables override file values; file values override defaults.
//! A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationOptions;
use crate::fetcher::bot_api::TELEGRAM_API_BASE;
use crate::fetcher::PollRequest;
use crate::poller::PollerOptions;

/// Env var pointing at the config file.
pub const CONFIG_PATH_ENV: &str = "BOTPOLL_CONFIG_PATH";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot API connection.
    pub telegram: TelegramConfig,
    /// Fetch loop and shutdown.
    pub poller: PollerConfig,
    /// Conversation state store.
    pub conversation: ConversationConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = config_path_with(|key| std::env::var(key).ok())?;
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit TOML file, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("invalid config at {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or mistyped fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides using `env` as the variable resolver.
    ///
    /// Invalid numeric values are logged and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("BOTPOLL_API_ENDPOINT") {
            self.telegram.api_endpoint = v;
        }
        if let Some(v) = env("BOTPOLL_POLL_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.poller.poll_timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "BOTPOLL_POLL_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("BOTPOLL_SHUTDOWN_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.poller.shutdown_timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "BOTPOLL_SHUTDOWN_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("BOTPOLL_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }

    /// Read the bot token from the env var named in `[telegram]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn bot_token(&self, env: impl Fn(&str) -> Option<String>) -> Result<String> {
        let var = &self.telegram.bot_token_env;
        env(var)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("bot token env var {var} is not set"))
    }
}

// ── Telegram ────────────────────────────────────────────────────

/// Bot API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Name of the env var holding the bot token.
    pub bot_token_env: String,
    /// Bot API base URL.
    pub api_endpoint: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: "BOTPOLL_TELEGRAM_TOKEN".to_owned(),
            api_endpoint: TELEGRAM_API_BASE.to_owned(),
        }
    }
}

// ── Poller ──────────────────────────────────────────────────────

/// Fetch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Long-poll timeout sent to `getUpdates`.
    pub poll_timeout_secs: u64,
    /// Maximum updates per batch.
    pub limit: u32,
    /// Update kinds to receive; empty for the server default.
    pub allowed_updates: Vec<String>,
    /// Sleep after the first failed fetch.
    pub retry_backoff_ms: u64,
    /// Cap for the doubling backoff.
    pub max_retry_backoff_ms: u64,
    /// How long shutdown waits for running handlers.
    pub shutdown_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            limit: 100,
            allowed_updates: Vec::new(),
            retry_backoff_ms: 3_000,
            max_retry_backoff_ms: 30_000,
            shutdown_timeout_secs: 10,
        }
    }
}

impl PollerConfig {
    /// Initial `getUpdates` request, starting at offset 0.
    pub fn poll_request(&self) -> PollRequest {
        PollRequest::starting_at(0)
            .with_timeout(Duration::from_secs(self.poll_timeout_secs))
            .with_limit(self.limit)
            .with_allowed_updates(self.allowed_updates.clone())
    }

    /// Poller options with the configured backoff.
    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions::default()
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms))
            .with_max_retry_backoff(Duration::from_millis(self.max_retry_backoff_ms))
    }

    /// Shutdown deadline.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

// ── Conversation ────────────────────────────────────────────────

/// Conversation store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Idle seconds before a user's conversation is forgotten.
    pub ttl_secs: u64,
    /// Seconds between sweeps of expired entries.
    pub sweep_interval_secs: u64,
    /// Whether reads refresh expiry.
    pub extend_on_read: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
            extend_on_read: true,
        }
    }
}

impl ConversationConfig {
    /// Options for [`crate::conversation::Conversation::new`].
    pub fn options(&self) -> ConversationOptions {
        ConversationOptions {
            ttl: Duration::from_secs(self.ttl_secs),
            extend_on_read: self.extend_on_read,
        }
    }

    /// Sweeper period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ── Logging ─────────────────────────────────────────────────────

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated JSON logs. Console only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────

/// Resolve the default config directory (`~/.botpoll/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".botpoll"))
}

/// Resolve the config file path using a custom env resolver.
///
/// `$BOTPOLL_CONFIG_PATH` wins; otherwise `~/.botpoll/config.toml`.
///
/// # Errors
///
/// Returns an error if no override is set and the home directory is unknown.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}
