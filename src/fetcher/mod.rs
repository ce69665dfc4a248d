//! Update sources for the long poller.
//!
//! A [`Fetcher`] returns the ordered batch of updates pending at a cursor.
//! [`BotApi`] is the production implementation over HTTP; tests substitute
//! scripted fetchers.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Update;

pub mod bot_api;

pub use bot_api::BotApi;

/// Default long-poll timeout sent to `getUpdates`.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for one `getUpdates` call.
///
/// The poller owns the request for the lifetime of `listen` and advances
/// `offset` in place; it is the poller's cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    /// Lowest update id not yet considered delivered.
    pub offset: i64,
    /// Maximum batch size (Telegram accepts 1..=100).
    pub limit: Option<u32>,
    /// How long the server may hold the request open.
    pub timeout: Duration,
    /// Update kinds to receive. Empty means the server default.
    pub allowed_updates: Vec<String>,
}

impl Default for PollRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: None,
            timeout: DEFAULT_POLL_TIMEOUT,
            allowed_updates: Vec::new(),
        }
    }
}

impl PollRequest {
    /// Request starting at `offset` with default timeout.
    pub fn starting_at(offset: i64) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// Set the long-poll timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum batch size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restrict the update kinds the server returns.
    pub fn with_allowed_updates(mut self, kinds: Vec<String>) -> Self {
        self.allowed_updates = kinds;
        self
    }
}

/// Errors from fetching updates or calling the Bot API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The API answered with `ok: false`.
    #[error("telegram API error {code}: {description}")]
    Api {
        /// Telegram `error_code`, 0 when absent.
        code: i64,
        /// Telegram `description`.
        description: String,
    },
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Response body could not be decoded.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of pending updates.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Return updates with id at or after `request.offset`, in id order.
    ///
    /// May block up to `request.timeout` when nothing is pending.
    async fn get_updates(&self, request: &PollRequest) -> Result<Vec<Update>, FetchError>;
}
