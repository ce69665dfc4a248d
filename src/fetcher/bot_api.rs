//! Telegram Bot API client: `getUpdates` for polling, `sendMessage` for replies.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, Fetcher, PollRequest};
use crate::types::{Message, Update};

/// Base URL for the Telegram Bot API.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Extra seconds added to the HTTP timeout beyond the long-poll timeout,
/// so the TCP socket stays open while Telegram holds the request.
const POLL_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Timeout for non-polling calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Generic Telegram Bot API response wrapper.
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// Thin Bot API client.
#[derive(Debug, Clone)]
pub struct BotApi {
    token: String,
    endpoint: String,
    client: reqwest::Client,
}

impl BotApi {
    /// Client for the public Bot API endpoint.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_endpoint(token, TELEGRAM_API_BASE, reqwest::Client::new())
    }

    /// Client for a custom endpoint (local Bot API server, test server).
    pub fn with_endpoint(
        token: impl Into<String>,
        endpoint: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            token: token.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            client,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.endpoint, self.token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, FetchError> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(params)
            .timeout(timeout)
            .send()
            .await?;
        let body = resp.text().await?;
        decode_response(&body)
    }

    /// Send a plain text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, FetchError> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        self.call(
            "sendMessage",
            &params,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
        .await
    }
}

#[async_trait]
impl Fetcher for BotApi {
    async fn get_updates(&self, request: &PollRequest) -> Result<Vec<Update>, FetchError> {
        let params = poll_params(request);
        let http_timeout = request
            .timeout
            .saturating_add(Duration::from_secs(POLL_TIMEOUT_MARGIN_SECS));
        let updates: Vec<Update> = self.call("getUpdates", &params, http_timeout).await?;
        debug!(
            offset = request.offset,
            count = updates.len(),
            "getUpdates returned"
        );
        Ok(updates)
    }
}

/// JSON body for `getUpdates`.
fn poll_params(request: &PollRequest) -> serde_json::Value {
    let mut params = serde_json::json!({
        "offset": request.offset,
        "timeout": request.timeout.as_secs(),
    });
    if let Some(limit) = request.limit {
        params["limit"] = serde_json::Value::from(limit);
    }
    if !request.allowed_updates.is_empty() {
        params["allowed_updates"] = serde_json::Value::from(request.allowed_updates.clone());
    }
    params
}

/// Unwrap the `{ok, result, description, error_code}` envelope.
fn decode_response<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    let response: TelegramResponse<T> = serde_json::from_str(body)?;
    if !response.ok {
        return Err(FetchError::Api {
            code: response.error_code.unwrap_or_default(),
            description: response
                .description
                .unwrap_or_else(|| "unknown error".to_owned()),
        });
    }
    response.result.ok_or_else(|| FetchError::Api {
        code: 0,
        description: "response has no result".to_owned(),
    })
}
