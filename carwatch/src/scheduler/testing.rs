//! Hand-written fakes for scheduler tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Collaborators;
use crate::domain::{FilterCriteria, Listing, ListingPayload, UserId};
use crate::gateway::{DeliveryError, MessagingGateway};
use crate::source::{ListingEnricher, ListingSource, SourceError};
use crate::store::MemoryFilterStore;

pub fn toyota() -> FilterCriteria {
    FilterCriteria::brand("Toyota", "https://www.ss.com/en/transport/cars/toyota/")
}

pub fn listings(range: Range<usize>) -> Vec<Listing> {
    range
        .map(|i| Listing::new(format!("Listing {i}"), format!("https://www.ss.com/msg/{i}.html")))
        .collect()
}

pub fn collaborators(
    source: Arc<ScriptedSource>,
    enricher: Arc<StaticEnricher>,
) -> Collaborators {
    Collaborators {
        source,
        enricher,
        gateway: Arc::new(RecordingGateway::default()),
        store: Arc::new(MemoryFilterStore::new()),
    }
}

/// Returns whatever page was last set for a brand.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<String, Vec<Listing>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn set(&self, brand: &str, listings: Vec<Listing>) {
        self.failing.lock().remove(brand);
        self.pages.lock().insert(brand.to_string(), listings);
    }

    pub fn fail(&self, brand: &str) {
        self.failing.lock().insert(brand.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for ScriptedSource {
    async fn query(&self, criteria: &FilterCriteria) -> Result<Vec<Listing>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let brand = criteria.brand.clone().unwrap_or_default();
        if self.failing.lock().contains(&brand) {
            return Err(SourceError::Other("scripted failure".to_string()));
        }
        Ok(self.pages.lock().get(&brand).cloned().unwrap_or_default())
    }
}

/// Builds a payload from the link, except for links marked as broken.
#[derive(Default)]
pub struct StaticEnricher {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl StaticEnricher {
    pub fn fail(&self, link: &str) {
        self.failing.lock().insert(link.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingEnricher for StaticEnricher {
    async fn fetch(&self, link: &str) -> Result<ListingPayload, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(link) {
            return Err(SourceError::Other("missing photo".to_string()));
        }
        Ok(ListingPayload {
            image: format!("{link}.jpg"),
            caption: link.to_string(),
        })
    }
}

/// Records every send. Scripted failures are returned first, in order.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(UserId, ListingPayload, Instant)>>,
    script: Mutex<VecDeque<DeliveryError>>,
    attempts: AtomicUsize,
}

impl RecordingGateway {
    pub fn push_failure(&self, error: DeliveryError) {
        self.script.lock().push_back(error);
    }

    pub fn sent(&self) -> Vec<(UserId, ListingPayload, Instant)> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(
        &self,
        destination: UserId,
        payload: &ListingPayload,
    ) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().pop_front() {
            return Err(error);
        }
        self.sent
            .lock()
            .push((destination, payload.clone(), Instant::now()));
        Ok(())
    }
}
