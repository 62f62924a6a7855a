//! Per-filter progress state held by a user worker.

use serde::{Deserialize, Serialize};

use super::{FilterCriteria, SeenSet, UserId};

/// A filter as stored in the definitions table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub uid: UserId,
    pub criteria: FilterCriteria,
}

/// Criteria plus dedup progress of one tracked filter.
#[derive(Debug, Clone)]
pub struct FilterState {
    pub criteria: FilterCriteria,
    /// Completed poll cycles. Zero means the next cycle is a baseline.
    pub attempt: u64,
    pub seen: SeenSet,
    /// Bumped on every criteria change so results of an in-flight query
    /// made with stale criteria can be recognised and discarded.
    pub revision: u64,
}

impl FilterState {
    pub fn new(criteria: FilterCriteria, seen_capacity: usize) -> Self {
        Self {
            criteria,
            attempt: 0,
            seen: SeenSet::with_capacity(seen_capacity),
            revision: 0,
        }
    }

    /// Swap in new criteria and start over from a baseline cycle.
    pub fn reset(&mut self, criteria: FilterCriteria) {
        self.criteria = criteria;
        self.attempt = 0;
        self.seen.clear();
        self.revision += 1;
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        FilterSnapshot {
            criteria: self.criteria.clone(),
            attempt: self.attempt,
            seen: self.seen.len(),
        }
    }
}

/// Read-only view of a filter's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSnapshot {
    pub criteria: FilterCriteria,
    pub attempt: u64,
    /// Number of dedup keys held.
    pub seen: usize,
}
