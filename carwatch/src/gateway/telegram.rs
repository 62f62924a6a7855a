//! Telegram Bot API gateway.
//!
//! Sends listings via `POST /bot<token>/sendPhoto` with an HTML caption.
//! A 429 response is reported as [`DeliveryError::RateLimited`] using the
//! `parameters.retry_after` field of the JSON body; pacing and cooldowns are
//! left to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{DeliveryError, MessagingGateway};
use crate::domain::{ListingPayload, UserId};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram `sendPhoto` caption limit (UTF-8 characters).
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Cooldown assumed when a 429 carries no `retry_after`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Telegram Bot API gateway.
pub struct TelegramGateway {
    client: Client,
    bot_token: String,
    api_base: String,
}

impl TelegramGateway {
    pub fn new(client: Client, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the gateway at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendPhoto", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send(
        &self,
        destination: UserId,
        payload: &ListingPayload,
    ) -> Result<(), DeliveryError> {
        let body = json!({
            "chat_id": destination.0,
            "photo": payload.image,
            "caption": truncate_caption(&payload.caption, TELEGRAM_CAPTION_LIMIT),
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Failed(format!("Telegram request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(user_id = %destination, "Telegram photo sent");
            return Ok(());
        }

        let body: Value = response.json().await.unwrap_or_default();
        let error = classify_failure(status.as_u16(), &body);
        if let DeliveryError::Failed(ref reason) = error {
            warn!(user_id = %destination, "Telegram sendPhoto failed: {}", reason);
        }
        Err(error)
    }
}

/// Map a non-success Bot API response to a delivery error.
fn classify_failure(status: u16, body: &Value) -> DeliveryError {
    let error_code = body
        .get("error_code")
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(status));

    if status == 429 || error_code == 429 {
        let retry_after = body
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return DeliveryError::RateLimited { retry_after };
    }

    let description = body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("no description");
    DeliveryError::Failed(format!("{} - {}", error_code, description))
}

/// Truncate a caption to fit within the Telegram character limit.
fn truncate_caption(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "…";
    let budget = limit - suffix.chars().count();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
