//! Notification sender: the single consumer of a user's dispatch queue.
//!
//! Sends are paced by a fixed delay after every attempt. A rate-limit reply
//! from the gateway pauses the whole queue for the requested cooldown; the
//! item that hit the limit is not retried. Other failures are logged and the
//! item dropped.
//!
//! A user has at most one sender delivering at a time. When a worker is
//! restarted while its old sender is still draining, the new sender waits for
//! the old one to finish before taking anything off its own queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Notification, UserId};
use crate::gateway::{DeliveryError, MessagingGateway};

/// Delivery counters of one sender run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub sent: u64,
    pub failed: u64,
    pub rate_limited: u64,
}

pub struct NotificationSender {
    user: UserId,
    queue: mpsc::Receiver<Notification>,
    gateway: Arc<dyn MessagingGateway>,
    send_delay: Duration,
    /// Process-wide shutdown. A per-user stop closes the queue instead, which
    /// lets already queued items go out first.
    cancellation_token: CancellationToken,
    /// Resolves when the user's previous sender has finished.
    predecessor: Option<oneshot::Receiver<()>>,
    /// Signalled (or dropped) when this sender finishes.
    finished: Option<oneshot::Sender<()>>,
}

impl NotificationSender {
    pub fn new(
        user: UserId,
        queue: mpsc::Receiver<Notification>,
        gateway: Arc<dyn MessagingGateway>,
        send_delay: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            user,
            queue,
            gateway,
            send_delay,
            cancellation_token,
            predecessor: None,
            finished: None,
        }
    }

    /// Chain this sender after the user's previous one.
    pub fn with_handoff(
        mut self,
        predecessor: Option<oneshot::Receiver<()>>,
        finished: oneshot::Sender<()>,
    ) -> Self {
        self.predecessor = predecessor;
        self.finished = Some(finished);
        self
    }

    /// Drain the queue until it closes or the process shuts down.
    pub async fn run(mut self) -> SenderStats {
        let mut stats = SenderStats::default();
        debug!(user_id = %self.user, "Notification sender starting");

        if let Some(predecessor) = self.predecessor.take() {
            debug!(user_id = %self.user, "Waiting for previous sender to drain");
            // A dropped signal means the previous sender is gone as well.
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {}

                _ = predecessor => {}
            }
        }

        loop {
            let notification = tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => break,

                next = self.queue.recv() => match next {
                    Some(notification) => notification,
                    None => break,
                },
            };

            let result = tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => break,

                result = self.gateway.send(notification.destination, &notification.payload) => result,
            };

            match result {
                Ok(()) => {
                    stats.sent += 1;
                    debug!(user_id = %self.user, link = %notification.link, "Notification delivered");
                }
                Err(DeliveryError::RateLimited { retry_after }) => {
                    stats.rate_limited += 1;
                    warn!(
                        user_id = %self.user,
                        link = %notification.link,
                        ?retry_after,
                        "Gateway rate limit hit, cooling down"
                    );
                    if !self.sleep(retry_after).await {
                        break;
                    }
                }
                Err(DeliveryError::Failed(reason)) => {
                    stats.failed += 1;
                    warn!(
                        user_id = %self.user,
                        link = %notification.link,
                        %reason,
                        "Notification dropped"
                    );
                }
            }

            if !self.sleep(self.send_delay).await {
                break;
            }
        }

        if let Some(finished) = self.finished.take() {
            let _ = finished.send(());
        }
        info!(
            user_id = %self.user,
            sent = stats.sent,
            failed = stats.failed,
            rate_limited = stats.rate_limited,
            "Notification sender stopped"
        );
        stats
    }

    /// Returns `false` if shutdown interrupted the sleep.
    async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancellation_token.is_cancelled();
        }
        tokio::select! {
            _ = self.cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
