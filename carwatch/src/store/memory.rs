use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ActiveFilters, Definitions, FilterStore};
use crate::Result;
use crate::domain::{FilterCriteria, FilterDefinition, FilterId, UserId};

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryFilterStore {
    active: Mutex<ActiveFilters>,
    definitions: Mutex<Definitions>,
}

impl MemoryFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with active filters, as if left by a previous run.
    pub fn with_active(active: ActiveFilters) -> Self {
        Self {
            active: Mutex::new(active),
            definitions: Mutex::default(),
        }
    }
}

#[async_trait]
impl FilterStore for MemoryFilterStore {
    async fn load_active(&self) -> Result<ActiveFilters> {
        Ok(self.active.lock().clone())
    }

    async fn save_active_user(
        &self,
        user: UserId,
        filters: &[(FilterId, FilterCriteria)],
    ) -> Result<()> {
        super::set_user(&mut self.active.lock(), user, filters);
        Ok(())
    }

    async fn replace_active_filter(
        &self,
        user: UserId,
        filter_id: &FilterId,
        criteria: &FilterCriteria,
    ) -> Result<bool> {
        Ok(super::replace_filter(
            &mut self.active.lock(),
            user,
            filter_id,
            criteria,
        ))
    }

    async fn remove_active_filter(&self, user: UserId, filter_id: &FilterId) -> Result<bool> {
        Ok(super::remove_filter(&mut self.active.lock(), user, filter_id))
    }

    async fn load_definitions(&self) -> Result<Definitions> {
        Ok(self.definitions.lock().clone())
    }

    async fn put_definition(
        &self,
        filter_id: &FilterId,
        definition: &FilterDefinition,
    ) -> Result<()> {
        self.definitions
            .lock()
            .insert(filter_id.clone(), definition.clone());
        Ok(())
    }

    async fn remove_definition(&self, filter_id: &FilterId) -> Result<Option<FilterDefinition>> {
        Ok(self.definitions.lock().remove(filter_id))
    }
}
