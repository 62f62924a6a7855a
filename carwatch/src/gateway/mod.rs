//! Messaging gateway seam.

mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ListingPayload, UserId};

pub use telegram::TelegramGateway;

/// Outcome of a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Flood control: nothing may be sent for `retry_after`.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Sends a listing to a user's chat.
#[async_trait]
pub trait MessagingGateway: Send + Sync + 'static {
    async fn send(&self, destination: UserId, payload: &ListingPayload)
    -> Result<(), DeliveryError>;
}
