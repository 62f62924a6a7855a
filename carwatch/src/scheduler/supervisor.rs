//! Supervisor: owner of every user's worker and the engine's control surface.
//!
//! The supervisor keeps at most one live [`UserWorker`] per user. Control
//! operations are routed to the worker's mailbox; the supervisor itself only
//! holds the `user -> handle` map and the spawned tasks. Every change to a
//! worker's filter set is mirrored to the [`FilterStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Collaborators;
use super::handle::{SendError, WorkerHandle};
use super::messages::{TrackedFilter, UpdateOutcome, WorkerMessage};
use super::sender::{NotificationSender, SenderStats};
use super::worker::{UserWorker, WorkerOutcome};
use crate::config::WorkerConfig;
use crate::domain::{
    CriteriaPatch, FilterCriteria, FilterDefinition, FilterId, FilterSnapshot, UserId,
};
use crate::{Error, Result};

/// How many times `start` retries when it races with a worker that is
/// shutting down.
const START_ATTEMPTS: usize = 3;

/// Default time allowed for tasks to finish on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Completion value of a spawned task.
#[derive(Debug)]
enum TaskResult {
    Worker {
        user: UserId,
        outcome: WorkerOutcome,
    },
    Sender {
        user: UserId,
        stats: SenderStats,
    },
}

/// Result of [`Supervisor::update_filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterUpdate {
    /// The filter now has these criteria and restarts from a baseline cycle.
    Updated(FilterCriteria),
    /// The patch cleared every criterion; the filter was deleted.
    Removed,
}

/// Shutdown statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub total_tasks: usize,
    pub graceful_stops: usize,
    pub forced_terminations: usize,
}

pub struct Supervisor {
    workers: DashMap<UserId, WorkerHandle>,
    /// Completion signal of each user's latest sender.
    sender_handoffs: DashMap<UserId, oneshot::Receiver<()>>,
    tasks: Mutex<JoinSet<TaskResult>>,
    generation: AtomicU64,
    collaborators: Collaborators,
    config: WorkerConfig,
    shutdown_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Supervisor {
    pub fn new(collaborators: Collaborators, config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            workers: DashMap::new(),
            sender_handoffs: DashMap::new(),
            tasks: Mutex::new(JoinSet::new()),
            generation: AtomicU64::new(0),
            collaborators,
            config,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Ensure `user` has a running worker tracking `filters`.
    ///
    /// Filters the worker already tracks keep their progress. The merged set
    /// is written to the active mirror. Calling this again with the same
    /// filters changes nothing.
    pub async fn start(&self, user: UserId, filters: Vec<TrackedFilter>) -> Result<()> {
        for (_, criteria) in &filters {
            criteria.validate()?;
        }
        if filters.is_empty() {
            return Ok(());
        }
        self.reap_finished();

        let tracked = self.ensure_worker(user, filters).await?;
        self.persist_active(user, &tracked).await;
        Ok(())
    }

    /// Stop polling for `user`. Stored filters are kept.
    ///
    /// The worker leaves the registry immediately; notifications already
    /// queued are still delivered. Returns `false` if no worker was running.
    pub fn stop(&self, user: UserId) -> bool {
        let Some((_, handle)) = self.workers.remove(&user) else {
            return false;
        };
        let running = !handle.is_stopped();
        handle.cancel();
        if running {
            info!(user_id = %user, "User worker stopped");
        } else {
            debug!(user_id = %user, "Removed already stopped user worker");
        }
        running
    }

    /// Track one more filter for `user`, starting a worker if needed.
    pub async fn add_filter(
        &self,
        user: UserId,
        filter_id: FilterId,
        criteria: FilterCriteria,
    ) -> Result<()> {
        self.start(user, vec![(filter_id, criteria)]).await
    }

    /// Patch a filter's criteria.
    ///
    /// A live filter restarts from a baseline cycle. A filter that is not
    /// being polled is patched in the store only. A patch that clears every
    /// criterion deletes the filter.
    pub async fn update_filter(
        &self,
        user: UserId,
        filter_id: FilterId,
        patch: CriteriaPatch,
    ) -> Result<FilterUpdate> {
        if let Some(handle) = self.live_handle(user) {
            let request = handle
                .request(|reply| WorkerMessage::UpdateFilter {
                    filter_id: filter_id.clone(),
                    patch: patch.clone(),
                    reply,
                })
                .await;

            match request {
                Ok(UpdateOutcome::Updated { criteria, tracked }) => {
                    self.persist_active(user, &tracked).await;
                    self.persist_definition(user, &filter_id, &criteria).await;
                    return Ok(FilterUpdate::Updated(criteria));
                }
                Ok(UpdateOutcome::Emptied { tracked }) => {
                    if tracked.is_empty() {
                        self.forget(user, handle.generation());
                    }
                    self.persist_active(user, &tracked).await;
                    self.drop_definition(&filter_id).await;
                    return Ok(FilterUpdate::Removed);
                }
                Ok(UpdateOutcome::Rejected(e)) => return Err(e),
                Ok(UpdateOutcome::NotFound) | Err(SendError::ActorStopped) => {}
                Err(e) => return Err(Error::WorkerUnavailable(format!("{user}: {e}"))),
            }
        }

        self.update_stored(user, filter_id, patch).await
    }

    /// Stop tracking a filter. A worker left without filters is removed.
    ///
    /// The filter's definition is kept. Returns whether the filter was live
    /// or mirrored as active.
    pub async fn remove_filter(&self, user: UserId, filter_id: &FilterId) -> Result<bool> {
        let mut removed = false;

        if let Some(handle) = self.live_handle(user) {
            let request = handle
                .request(|reply| WorkerMessage::RemoveFilter {
                    filter_id: filter_id.clone(),
                    reply,
                })
                .await;
            match request {
                Ok(outcome) => {
                    removed = outcome.removed;
                    if outcome.tracked.is_empty() {
                        self.forget(user, handle.generation());
                    }
                }
                Err(SendError::ActorStopped) => {}
                Err(e) => return Err(Error::WorkerUnavailable(format!("{user}: {e}"))),
            }
        }

        match self
            .collaborators
            .store
            .remove_active_filter(user, filter_id)
            .await
        {
            Ok(mirrored) => removed |= mirrored,
            Err(e) => warn!(user_id = %user, %filter_id, error = %e, "Failed to update active filters"),
        }

        if removed {
            info!(user_id = %user, %filter_id, "Filter deactivated");
        }
        Ok(removed)
    }

    /// Filter ids polled for `user` right now. Empty if no worker runs.
    pub fn list_active_filter_ids(&self, user: UserId) -> Vec<FilterId> {
        self.live_handle(user)
            .map(|handle| handle.filter_ids())
            .unwrap_or_default()
    }

    /// Start a worker for every user in the active mirror. Returns how many
    /// users were started.
    pub async fn restart_all(&self) -> usize {
        let active = match self.collaborators.store.load_active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Failed to load active filters, starting with none");
                return 0;
            }
        };

        let mut started = 0;
        for (user, filters) in active {
            let (valid, invalid): (Vec<_>, Vec<_>) = filters
                .into_iter()
                .partition(|(_, criteria)| criteria.validate().is_ok());
            for (filter_id, _) in invalid {
                warn!(user_id = %user, %filter_id, "Skipping stored filter with invalid criteria");
            }

            match self.start(user, valid).await {
                Ok(()) if self.live_handle(user).is_some() => started += 1,
                Ok(()) => {}
                Err(e) => warn!(user_id = %user, error = %e, "Failed to restart user worker"),
            }
        }

        info!(users = started, "Restored user workers");
        started
    }

    /// Create a filter from finished criteria and start polling it.
    pub async fn create_filter(&self, user: UserId, criteria: FilterCriteria) -> Result<FilterId> {
        criteria.validate()?;
        let filter_id = FilterId::generate();
        self.collaborators
            .store
            .put_definition(
                &filter_id,
                &FilterDefinition {
                    uid: user,
                    criteria: criteria.clone(),
                },
            )
            .await?;

        info!(user_id = %user, %filter_id, criteria = %criteria.summary(), "Filter created");
        self.start(user, vec![(filter_id.clone(), criteria)]).await?;
        Ok(filter_id)
    }

    /// Delete a filter: stop polling it and forget its definition.
    pub async fn delete_filter(&self, user: UserId, filter_id: &FilterId) -> Result<()> {
        let definitions = self.collaborators.store.load_definitions().await?;
        if let Some(definition) = definitions.get(filter_id)
            && definition.uid != user
        {
            return Err(Error::not_found("filter", filter_id.as_str()));
        }

        let deactivated = self.remove_filter(user, filter_id).await?;
        let removed = self
            .collaborators
            .store
            .remove_definition(filter_id)
            .await?
            .is_some();

        if !deactivated && !removed {
            return Err(Error::not_found("filter", filter_id.as_str()));
        }
        info!(user_id = %user, %filter_id, "Filter deleted");
        Ok(())
    }

    /// Stored filter definitions owned by `user`.
    pub async fn user_filters(&self, user: UserId) -> Result<Vec<TrackedFilter>> {
        let definitions = self.collaborators.store.load_definitions().await?;
        Ok(definitions
            .into_iter()
            .filter(|(_, definition)| definition.uid == user)
            .map(|(id, definition)| (id, definition.criteria))
            .collect())
    }

    /// Progress of a live filter.
    pub async fn filter_state(&self, user: UserId, filter_id: &FilterId) -> Option<FilterSnapshot> {
        let handle = self.live_handle(user)?;
        handle
            .request(|reply| WorkerMessage::GetFilterState {
                filter_id: filter_id.clone(),
                reply,
            })
            .await
            .ok()
            .flatten()
    }

    /// Number of live user workers.
    pub fn worker_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|entry| !entry.value().is_stopped())
            .count()
    }

    /// Stop every worker and sender and wait for them to finish.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!(workers = self.workers.len(), "Initiating supervisor shutdown");

        self.cancellation_token.cancel();
        self.workers.clear();
        self.sender_handoffs.clear();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut report = ShutdownReport {
            total_tasks: tasks.len(),
            ..Default::default()
        };
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        while !tasks.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    report.forced_terminations = tasks.len();
                    warn!(remaining = tasks.len(), "Shutdown timeout reached, aborting tasks");
                    tasks.abort_all();
                    break;
                }
                result = tasks.join_next() => match result {
                    Some(Ok(result)) => {
                        log_task_result(&result);
                        report.graceful_stops += 1;
                    }
                    Some(Err(e)) => {
                        warn!("Task join error during shutdown: {}", e);
                        report.forced_terminations += 1;
                    }
                    None => break,
                },
            }
        }

        info!(
            total = report.total_tasks,
            graceful = report.graceful_stops,
            forced = report.forced_terminations,
            "Shutdown complete"
        );
        report
    }

    fn live_handle(&self, user: UserId) -> Option<WorkerHandle> {
        self.workers
            .get(&user)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_stopped())
    }

    /// Route `filters` to the user's worker, spawning one if there is none.
    /// Returns the worker's tracked filters afterwards.
    async fn ensure_worker(
        &self,
        user: UserId,
        filters: Vec<TrackedFilter>,
    ) -> Result<Vec<TrackedFilter>> {
        for _ in 0..START_ATTEMPTS {
            if self.cancellation_token.is_cancelled() {
                return Err(Error::WorkerUnavailable(format!("{user}: shutting down")));
            }

            let handle = match self.workers.entry(user) {
                Entry::Occupied(entry) if !entry.get().is_stopped() => entry.get().clone(),
                Entry::Occupied(mut entry) => {
                    let (handle, tracked) = self.spawn_worker(user, filters);
                    entry.insert(handle);
                    return Ok(tracked);
                }
                Entry::Vacant(entry) => {
                    let (handle, tracked) = self.spawn_worker(user, filters);
                    entry.insert(handle);
                    return Ok(tracked);
                }
            };

            let request = handle
                .request(|reply| WorkerMessage::AddFilters {
                    filters: filters.clone(),
                    reply,
                })
                .await;
            match request {
                Ok(tracked) => return Ok(tracked),
                Err(SendError::ActorStopped) => {
                    debug!(user_id = %user, "Worker stopped while adding filters, retrying");
                    self.forget(user, handle.generation());
                }
                Err(e) => return Err(Error::WorkerUnavailable(format!("{user}: {e}"))),
            }
        }
        Err(Error::WorkerUnavailable(user.to_string()))
    }

    /// Spawn a worker and its sender. Must be called with the user's registry
    /// entry locked.
    fn spawn_worker(
        &self,
        user: UserId,
        filters: Vec<TrackedFilter>,
    ) -> (WorkerHandle, Vec<TrackedFilter>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.config.dispatch_capacity);

        let (worker, handle) = UserWorker::new(
            user,
            generation,
            filters,
            dispatch_tx,
            &self.collaborators,
            self.config.clone(),
            self.cancellation_token.child_token(),
        );
        let tracked = worker.tracked();
        let (finished_tx, finished_rx) = oneshot::channel();
        let predecessor = self.sender_handoffs.insert(user, finished_rx);
        let sender = NotificationSender::new(
            user,
            dispatch_rx,
            self.collaborators.gateway.clone(),
            self.config.send_delay,
            self.cancellation_token.clone(),
        )
        .with_handoff(predecessor, finished_tx);

        let mut tasks = self.tasks.lock();
        tasks.spawn(async move {
            TaskResult::Worker {
                user,
                outcome: worker.run().await,
            }
        });
        tasks.spawn(async move {
            TaskResult::Sender {
                user,
                stats: sender.run().await,
            }
        });

        info!(user_id = %user, generation, filters = tracked.len(), "Spawned user worker");
        (handle, tracked)
    }

    /// Drop the registry entry of `user` if it still belongs to `generation`.
    fn forget(&self, user: UserId, generation: u64) {
        if let Some((_, handle)) = self
            .workers
            .remove_if(&user, |_, handle| handle.generation() == generation)
        {
            handle.cancel();
            debug!(user_id = %user, generation, "Removed user worker from registry");
        }
    }

    /// Collect tasks that have already finished.
    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            match result {
                Ok(result) => log_task_result(&result),
                Err(e) => warn!("User task failed: {}", e),
            }
        }
    }

    /// Patch a filter that no worker is polling.
    async fn update_stored(
        &self,
        user: UserId,
        filter_id: FilterId,
        patch: CriteriaPatch,
    ) -> Result<FilterUpdate> {
        let store = &self.collaborators.store;

        let stored = match store.load_definitions().await?.remove(&filter_id) {
            Some(definition) if definition.uid == user => Some(definition.criteria),
            Some(_) => None,
            None => store
                .load_active()
                .await?
                .remove(&user)
                .and_then(|filters| {
                    filters
                        .into_iter()
                        .find(|(id, _)| *id == filter_id)
                        .map(|(_, criteria)| criteria)
                }),
        };
        let Some(mut criteria) = stored else {
            return Err(Error::not_found("filter", filter_id.as_str()));
        };

        criteria.apply(&patch);
        if criteria.is_empty() {
            store.remove_active_filter(user, &filter_id).await?;
            store.remove_definition(&filter_id).await?;
            info!(user_id = %user, %filter_id, "Filter cleared, deleted");
            return Ok(FilterUpdate::Removed);
        }
        criteria.validate()?;

        store
            .put_definition(
                &filter_id,
                &FilterDefinition {
                    uid: user,
                    criteria: criteria.clone(),
                },
            )
            .await?;
        store
            .replace_active_filter(user, &filter_id, &criteria)
            .await?;
        info!(user_id = %user, %filter_id, criteria = %criteria.summary(), "Stored filter updated");
        Ok(FilterUpdate::Updated(criteria))
    }

    async fn persist_active(&self, user: UserId, tracked: &[TrackedFilter]) {
        if let Err(e) = self
            .collaborators
            .store
            .save_active_user(user, tracked)
            .await
        {
            warn!(user_id = %user, error = %e, "Failed to persist active filters");
        }
    }

    async fn persist_definition(&self, user: UserId, filter_id: &FilterId, criteria: &FilterCriteria) {
        let definition = FilterDefinition {
            uid: user,
            criteria: criteria.clone(),
        };
        if let Err(e) = self
            .collaborators
            .store
            .put_definition(filter_id, &definition)
            .await
        {
            warn!(user_id = %user, %filter_id, error = %e, "Failed to persist filter definition");
        }
    }

    async fn drop_definition(&self, filter_id: &FilterId) {
        if let Err(e) = self.collaborators.store.remove_definition(filter_id).await {
            warn!(%filter_id, error = %e, "Failed to remove filter definition");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

fn log_task_result(result: &TaskResult) {
    match result {
        TaskResult::Worker { user, outcome } => {
            debug!(user_id = %user, ?outcome, "User worker task finished")
        }
        TaskResult::Sender { user, stats } => {
            debug!(user_id = %user, ?stats, "Notification sender task finished")
        }
    }
}
