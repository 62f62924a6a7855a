//! Messages accepted by a [`UserWorker`](super::UserWorker).

use tokio::sync::oneshot;

use crate::Error;
use crate::domain::{CriteriaPatch, FilterCriteria, FilterId, FilterSnapshot};

/// A filter id paired with its criteria, as tracked by a worker.
pub type TrackedFilter = (FilterId, FilterCriteria);

/// Messages that can be sent to a UserWorker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Track filters not already tracked. Existing filters keep their state.
    /// Replies with every tracked filter after the merge.
    AddFilters {
        filters: Vec<TrackedFilter>,
        reply: oneshot::Sender<Vec<TrackedFilter>>,
    },
    /// Patch a filter's criteria and restart it from a baseline cycle.
    UpdateFilter {
        filter_id: FilterId,
        patch: CriteriaPatch,
        reply: oneshot::Sender<UpdateOutcome>,
    },
    /// Stop tracking a filter.
    RemoveFilter {
        filter_id: FilterId,
        reply: oneshot::Sender<RemoveOutcome>,
    },
    /// Query a filter's progress.
    GetFilterState {
        filter_id: FilterId,
        reply: oneshot::Sender<Option<FilterSnapshot>>,
    },
}

/// Result of [`WorkerMessage::UpdateFilter`].
#[derive(Debug)]
pub enum UpdateOutcome {
    Updated {
        criteria: FilterCriteria,
        tracked: Vec<TrackedFilter>,
    },
    /// The patch cleared every criterion, so the filter was dropped.
    Emptied { tracked: Vec<TrackedFilter> },
    NotFound,
    /// The patched criteria are not searchable; nothing changed.
    Rejected(Error),
}

/// Result of [`WorkerMessage::RemoveFilter`].
#[derive(Debug)]
pub struct RemoveOutcome {
    pub removed: bool,
    pub tracked: Vec<TrackedFilter>,
}
