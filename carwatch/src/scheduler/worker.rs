//! UserWorker implementation.
//!
//! A UserWorker is the single owner of one user's filters. It polls them one
//! after another, remembers which listings each filter has already seen and
//! pushes notifications for new ones onto the user's dispatch queue.
//!
//! Control requests arrive through the mailbox and are served at every
//! suspension point of the poll loop (network calls, pauses, idle sleep), so
//! a slow listing query never delays an `update_filter` or `stop`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::RngExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Collaborators;
use super::handle::{DEFAULT_MAILBOX_CAPACITY, WorkerHandle};
use super::messages::{RemoveOutcome, TrackedFilter, UpdateOutcome, WorkerMessage};
use crate::config::WorkerConfig;
use crate::domain::{CriteriaPatch, FilterId, FilterState, Listing, Notification, UserId};
use crate::source::{ListingEnricher, ListingSource};

/// How a worker's run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Stopped from outside: a user stop or process shutdown.
    Cancelled,
    /// The last filter was removed.
    Emptied,
}

/// Owner of one user's filters and their poll loop.
pub struct UserWorker {
    user: UserId,
    filters: BTreeMap<FilterId, FilterState>,
    mailbox: mpsc::Receiver<WorkerMessage>,
    /// Producer side of the user's dispatch queue.
    dispatch: mpsc::Sender<Notification>,
    /// Tracked filter ids, shared with every [`WorkerHandle`].
    published: Arc<RwLock<Vec<FilterId>>>,
    source: Arc<dyn ListingSource>,
    enricher: Arc<dyn ListingEnricher>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
}

impl UserWorker {
    /// Create a worker seeded with `filters` and its handle.
    ///
    /// A worker created without filters is born stopped.
    pub fn new(
        user: UserId,
        generation: u64,
        filters: Vec<TrackedFilter>,
        dispatch: mpsc::Sender<Notification>,
        collaborators: &Collaborators,
        config: WorkerConfig,
        cancellation_token: CancellationToken,
    ) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let published = Arc::new(RwLock::new(Vec::new()));
        let handle = WorkerHandle::new(
            user,
            generation,
            tx,
            cancellation_token.clone(),
            Arc::clone(&published),
        );

        let mut worker = Self {
            user,
            filters: BTreeMap::new(),
            mailbox: rx,
            dispatch,
            published,
            source: Arc::clone(&collaborators.source),
            enricher: Arc::clone(&collaborators.enricher),
            config,
            cancellation_token,
        };
        worker.add_filters(filters);
        worker.stop_if_empty();

        (worker, handle)
    }

    /// Filters currently tracked, in poll order.
    pub fn tracked(&self) -> Vec<TrackedFilter> {
        self.filters
            .iter()
            .map(|(id, state)| (id.clone(), state.criteria.clone()))
            .collect()
    }

    /// Run the poll loop until cancelled or out of filters.
    pub async fn run(mut self) -> WorkerOutcome {
        info!(
            user_id = %self.user,
            filters = self.filters.len(),
            "User worker starting"
        );

        while !self.cancellation_token.is_cancelled() {
            let notifications = self.poll_cycle().await;
            if self.cancellation_token.is_cancelled() {
                break;
            }
            if !self.drain(notifications).await {
                break;
            }
            let interval = self.config.poll_interval;
            if !self.pause(interval).await {
                break;
            }
        }

        self.published.write().clear();
        let outcome = if self.filters.is_empty() {
            WorkerOutcome::Emptied
        } else {
            WorkerOutcome::Cancelled
        };
        info!(user_id = %self.user, ?outcome, "User worker stopped");
        outcome
    }

    /// One pass over every tracked filter.
    ///
    /// Queries filters sequentially, records what each has seen and returns
    /// the enriched notifications for listings that are new, in discovery
    /// order.
    pub(crate) async fn poll_cycle(&mut self) -> Vec<Notification> {
        let ids: Vec<FilterId> = self.filters.keys().cloned().collect();
        let mut discovered: Vec<(FilterId, Listing)> = Vec::new();

        for filter_id in ids {
            let Some(state) = self.filters.get(&filter_id) else {
                continue;
            };
            let criteria = state.criteria.clone();
            let revision = state.revision;

            let source = Arc::clone(&self.source);
            let Some(result) = self
                .serve_while(async move { source.query(&criteria).await })
                .await
            else {
                return Vec::new();
            };

            let listings = match result {
                Ok(listings) if !listings.is_empty() => listings,
                Ok(_) => {
                    debug!(user_id = %self.user, %filter_id, "No listings returned");
                    continue;
                }
                Err(e) => {
                    warn!(user_id = %self.user, %filter_id, error = %e, "Listing query failed");
                    continue;
                }
            };

            let Some(state) = self.filters.get_mut(&filter_id) else {
                debug!(user_id = %self.user, %filter_id, "Filter removed during query");
                continue;
            };
            if state.revision != revision {
                debug!(user_id = %self.user, %filter_id, "Criteria changed during query, discarding results");
                continue;
            }

            let baseline = state.attempt == 0;
            let fresh = record_listings(state, listings, self.config.max_listings);
            debug!(
                user_id = %self.user,
                %filter_id,
                attempt = state.attempt,
                seen = state.seen.len(),
                new = fresh.len(),
                baseline,
                "Filter polled"
            );
            discovered.extend(fresh.into_iter().map(|l| (filter_id.clone(), l)));
        }

        let mut notifications = Vec::with_capacity(discovered.len());
        for (filter_id, listing) in discovered {
            if !self.filters.contains_key(&filter_id) {
                continue;
            }
            let enricher = Arc::clone(&self.enricher);
            let link = listing.link.clone();
            let Some(result) = self
                .serve_while(async move { enricher.fetch(&link).await })
                .await
            else {
                break;
            };
            match result {
                Ok(payload) => {
                    info!(user_id = %self.user, %filter_id, link = %listing.link, "New listing");
                    notifications.push(Notification {
                        destination: self.user,
                        filter_id,
                        link: listing.link,
                        payload,
                    });
                }
                Err(e) => warn!(
                    user_id = %self.user,
                    %filter_id,
                    link = %listing.link,
                    error = %e,
                    "Failed to fetch listing details, dropping"
                ),
            }
        }
        notifications
    }

    /// Push notifications onto the dispatch queue with a random pause between
    /// pushes. Returns `false` if the worker was cancelled meanwhile.
    async fn drain(&mut self, notifications: Vec<Notification>) -> bool {
        for (i, notification) in notifications.into_iter().enumerate() {
            if i > 0 {
                let pause = self.push_jitter();
                if !self.pause(pause).await {
                    return false;
                }
            }
            let dispatch = self.dispatch.clone();
            match self
                .serve_while(async move { dispatch.send(notification).await })
                .await
            {
                Some(Ok(())) => {}
                Some(Err(_)) => {
                    warn!(user_id = %self.user, "Dispatch queue closed");
                    return false;
                }
                None => return false,
            }
        }
        true
    }

    /// Sleep while serving the mailbox. Returns `false` if cancelled.
    async fn pause(&mut self, duration: Duration) -> bool {
        self.serve_while(tokio::time::sleep(duration)).await.is_some()
    }

    /// Drive `fut` to completion while handling mailbox messages.
    ///
    /// Returns `None` if the worker is cancelled first.
    async fn serve_while<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => return None,

                Some(msg) = self.mailbox.recv() => self.handle_message(msg),

                output = &mut fut => return Some(output),
            }
        }
    }

    fn push_jitter(&self) -> Duration {
        let min = self.config.push_jitter_min.as_millis() as u64;
        let max = self.config.push_jitter_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    pub(crate) fn handle_message(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::AddFilters { filters, reply } => {
                self.add_filters(filters);
                let _ = reply.send(self.tracked());
            }
            WorkerMessage::UpdateFilter {
                filter_id,
                patch,
                reply,
            } => {
                let outcome = self.update_filter(&filter_id, &patch);
                let _ = reply.send(outcome);
            }
            WorkerMessage::RemoveFilter { filter_id, reply } => {
                let removed = self.remove_filter(&filter_id);
                let _ = reply.send(RemoveOutcome {
                    removed,
                    tracked: self.tracked(),
                });
            }
            WorkerMessage::GetFilterState { filter_id, reply } => {
                let _ = reply.send(self.filters.get(&filter_id).map(FilterState::snapshot));
            }
        }
    }

    /// Track filters that are not tracked yet. Existing ones keep their state.
    fn add_filters(&mut self, filters: Vec<TrackedFilter>) -> usize {
        let mut added = 0;
        for (filter_id, criteria) in filters {
            if self.filters.contains_key(&filter_id) {
                continue;
            }
            info!(user_id = %self.user, %filter_id, criteria = %criteria.summary(), "Tracking filter");
            self.filters.insert(
                filter_id,
                FilterState::new(criteria, self.config.seen_capacity),
            );
            added += 1;
        }
        if added > 0 {
            self.publish();
        }
        added
    }

    fn update_filter(&mut self, filter_id: &FilterId, patch: &CriteriaPatch) -> UpdateOutcome {
        let Some(state) = self.filters.get_mut(filter_id) else {
            return UpdateOutcome::NotFound;
        };

        let criteria = state.criteria.patched(patch);
        if criteria.is_empty() {
            self.remove_filter(filter_id);
            return UpdateOutcome::Emptied {
                tracked: self.tracked(),
            };
        }
        if let Err(e) = criteria.validate() {
            return UpdateOutcome::Rejected(e);
        }

        state.reset(criteria.clone());
        info!(
            user_id = %self.user,
            %filter_id,
            criteria = %criteria.summary(),
            "Filter updated, restarting from baseline"
        );
        UpdateOutcome::Updated {
            criteria,
            tracked: self.tracked(),
        }
    }

    fn remove_filter(&mut self, filter_id: &FilterId) -> bool {
        if self.filters.remove(filter_id).is_none() {
            return false;
        }
        info!(user_id = %self.user, %filter_id, "Filter removed");
        self.publish();
        self.stop_if_empty();
        true
    }

    fn stop_if_empty(&self) {
        if self.filters.is_empty() {
            debug!(user_id = %self.user, "No filters left, stopping worker");
            self.cancellation_token.cancel();
        }
    }

    fn publish(&self) {
        *self.published.write() = self.filters.keys().cloned().collect();
    }
}

/// Record a page of listings in a filter's seen-set and return the new ones.
///
/// Only the first `max_listings` rows count. On the baseline cycle
/// (`attempt == 0`) everything is recorded and nothing is returned.
fn record_listings(
    state: &mut FilterState,
    listings: Vec<Listing>,
    max_listings: usize,
) -> Vec<Listing> {
    let baseline = state.attempt == 0;
    let mut fresh = Vec::new();
    for listing in listings.into_iter().take(max_listings) {
        if state.seen.insert(listing.dedup_key()) && !baseline {
            fresh.push(listing);
        }
    }
    state.attempt += 1;
    fresh
}
