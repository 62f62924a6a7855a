//! Filter persistence.
//!
//! Two logical tables are kept:
//!
//! - the *active* mirror, `user -> [(filter id, criteria)]`, rewritten whenever
//!   a worker's tracked filters change and read by [`Supervisor::restart_all`];
//! - the filter *definitions*, `filter id -> (owner, criteria)`, written when a
//!   filter is created, edited or deleted.
//!
//! Readers treat missing or unreadable data as empty.
//!
//! [`Supervisor::restart_all`]: crate::scheduler::Supervisor::restart_all

mod json;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::Result;
use crate::domain::{FilterCriteria, FilterDefinition, FilterId, UserId};

pub use json::JsonFileStore;
pub use memory::MemoryFilterStore;

/// Filters tracked per user, in activation order.
pub type ActiveFilters = BTreeMap<UserId, Vec<(FilterId, FilterCriteria)>>;

/// Canonical filter definitions.
pub type Definitions = BTreeMap<FilterId, FilterDefinition>;

/// Durable record of users' filters.
///
/// Implementations serialize concurrent writers themselves.
#[async_trait]
pub trait FilterStore: Send + Sync + 'static {
    async fn load_active(&self) -> Result<ActiveFilters>;

    /// Overwrite a user's active filters. An empty slice drops the user.
    async fn save_active_user(
        &self,
        user: UserId,
        filters: &[(FilterId, FilterCriteria)],
    ) -> Result<()>;

    /// Replace the criteria of an active filter in place.
    /// Returns `false` if the user does not have it active.
    async fn replace_active_filter(
        &self,
        user: UserId,
        filter_id: &FilterId,
        criteria: &FilterCriteria,
    ) -> Result<bool>;

    /// Returns `false` if the user did not have it active.
    async fn remove_active_filter(&self, user: UserId, filter_id: &FilterId) -> Result<bool>;

    async fn load_definitions(&self) -> Result<Definitions>;

    async fn put_definition(&self, filter_id: &FilterId, definition: &FilterDefinition)
    -> Result<()>;

    /// Returns the removed definition, if there was one.
    async fn remove_definition(&self, filter_id: &FilterId) -> Result<Option<FilterDefinition>>;
}

fn set_user(active: &mut ActiveFilters, user: UserId, filters: &[(FilterId, FilterCriteria)]) {
    if filters.is_empty() {
        active.remove(&user);
    } else {
        active.insert(user, filters.to_vec());
    }
}

fn replace_filter(
    active: &mut ActiveFilters,
    user: UserId,
    filter_id: &FilterId,
    criteria: &FilterCriteria,
) -> bool {
    let Some(slot) = active
        .get_mut(&user)
        .and_then(|filters| filters.iter_mut().find(|(id, _)| id == filter_id))
    else {
        return false;
    };
    slot.1 = criteria.clone();
    true
}

fn remove_filter(active: &mut ActiveFilters, user: UserId, filter_id: &FilterId) -> bool {
    let Some(filters) = active.get_mut(&user) else {
        return false;
    };
    let before = filters.len();
    filters.retain(|(id, _)| id != filter_id);
    let removed = filters.len() != before;
    if filters.is_empty() {
        active.remove(&user);
    }
    removed
}
