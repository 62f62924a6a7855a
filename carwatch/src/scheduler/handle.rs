//! Handle to a running user worker.
//!
//! Sends are backpressure-aware: a non-blocking `try_send` first, then a
//! bounded wait for mailbox capacity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::messages::WorkerMessage;
use crate::domain::{FilterId, UserId};

/// Default mailbox capacity for workers.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default timeout for send operations when the mailbox is full.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Default timeout for a worker to answer a request.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The worker has stopped and is no longer accepting messages.
    ActorStopped,
    /// The mailbox is full and the send timed out.
    MailboxFull,
    /// The worker did not answer in time.
    Timeout,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::ActorStopped => write!(f, "Worker has stopped"),
            SendError::MailboxFull => write!(f, "Mailbox is full"),
            SendError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for SendError {}

/// A handle to a user worker.
///
/// Cloning is cheap; all clones address the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    user: UserId,
    /// Distinguishes successive workers of the same user.
    generation: u64,
    sender: mpsc::Sender<WorkerMessage>,
    cancellation_token: CancellationToken,
    /// Filter ids the worker tracks, published by the worker on every change.
    filter_ids: Arc<RwLock<Vec<FilterId>>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        user: UserId,
        generation: u64,
        sender: mpsc::Sender<WorkerMessage>,
        cancellation_token: CancellationToken,
        filter_ids: Arc<RwLock<Vec<FilterId>>>,
    ) -> Self {
        Self {
            user,
            generation,
            sender,
            cancellation_token,
            filter_ids,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send a message with backpressure awareness.
    pub async fn send(&self, msg: WorkerMessage) -> Result<(), SendError> {
        self.send_with_timeout(msg, DEFAULT_SEND_TIMEOUT).await
    }

    /// Send a message with a custom timeout.
    pub async fn send_with_timeout(
        &self,
        msg: WorkerMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        if self.is_stopped() {
            return Err(SendError::ActorStopped);
        }
        // Fast path: try non-blocking send first
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                // Slow path: wait for permit with timeout
                match tokio::time::timeout(timeout, self.sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(SendError::ActorStopped),
                    Err(_) => Err(SendError::MailboxFull),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ActorStopped),
        }
    }

    /// Send a request built around a reply channel and wait for the answer.
    ///
    /// A worker that exits before answering drops the reply channel, which
    /// surfaces as [`SendError::ActorStopped`].
    pub async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> WorkerMessage,
    ) -> Result<R, SendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        match tokio::time::timeout(DEFAULT_REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SendError::ActorStopped),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Filter ids tracked by the worker, without a round trip.
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.filter_ids.read().clone()
    }

    /// Ask the worker to stop. Its poll loop exits at the next suspension point.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancellation_token.is_cancelled() || self.sender.is_closed()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("user", &self.user)
            .field("generation", &self.generation)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
