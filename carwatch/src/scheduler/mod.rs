//! Filter polling and notification dispatch.
//!
//! Each active user gets a [`UserWorker`] (poll loop and dedup state) and a
//! [`NotificationSender`] connected by a bounded dispatch queue. The
//! [`Supervisor`] owns the `user -> worker` registry and is the only way the
//! rest of the application affects polling.

pub mod handle;
pub mod messages;
pub mod sender;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::gateway::MessagingGateway;
use crate::source::{ListingEnricher, ListingSource};
use crate::store::FilterStore;

pub use handle::{SendError, WorkerHandle};
pub use messages::{TrackedFilter, WorkerMessage};
pub use sender::{NotificationSender, SenderStats};
pub use supervisor::{FilterUpdate, ShutdownReport, Supervisor};
pub use worker::{UserWorker, WorkerOutcome};

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ListingSource>,
    pub enricher: Arc<dyn ListingEnricher>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub store: Arc<dyn FilterStore>,
}
