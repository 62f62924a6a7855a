#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use carwatch::config::WorkerConfig;
use carwatch::domain::{FilterCriteria, Listing, ListingPayload, UserId};
use carwatch::gateway::{DeliveryError, MessagingGateway};
use carwatch::scheduler::{Collaborators, Supervisor};
use carwatch::source::{ListingEnricher, ListingSource, SourceError};
use carwatch::store::{FilterStore, MemoryFilterStore};

pub fn brand(name: &str) -> FilterCriteria {
    FilterCriteria::brand(
        name,
        format!(
            "https://www.ss.com/en/transport/cars/{}/",
            name.to_lowercase()
        ),
    )
}

/// Listings `Listing {i}` at `https://www.ss.com/msg/{prefix}{i}.html`.
pub fn listings(prefix: &str, range: Range<usize>) -> Vec<Listing> {
    range
        .map(|i| {
            Listing::new(
                format!("Listing {prefix}{i}"),
                format!("https://www.ss.com/msg/{prefix}{i}.html"),
            )
        })
        .collect()
}

pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(30),
        send_delay: Duration::ZERO,
        push_jitter_min: Duration::ZERO,
        push_jitter_max: Duration::ZERO,
        max_listings: 10,
        seen_capacity: 100,
        dispatch_capacity: 64,
    }
}

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
            return Err(SourceError::Other("site unavailable".to_string()));
        }
        Ok(self.pages.lock().get(&brand).cloned().unwrap_or_default())
    }
}

pub struct LinkEnricher;

#[async_trait]
impl ListingEnricher for LinkEnricher {
    async fn fetch(&self, link: &str) -> Result<ListingPayload, SourceError> {
        Ok(ListingPayload {
            image: format!("{link}.jpg"),
            caption: link.to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(UserId, String, Instant)>>,
}

impl RecordingGateway {
    /// `(user, caption)` pairs in delivery order.
    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.sent
            .lock()
            .iter()
            .map(|(user, caption, _)| (*user, caption.clone()))
            .collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(_, _, at)| *at).collect()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(
        &self,
        destination: UserId,
        payload: &ListingPayload,
    ) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .push((destination, payload.caption.clone(), Instant::now()));
        Ok(())
    }
}

pub struct Harness {
    pub supervisor: Supervisor,
    pub source: Arc<ScriptedSource>,
    pub gateway: Arc<RecordingGateway>,
    pub store: Arc<dyn FilterStore>,
}

impl Harness {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryFilterStore::new()))
    }

    pub fn with_store(config: WorkerConfig, store: Arc<dyn FilterStore>) -> Self {
        let source = Arc::new(ScriptedSource::default());
        let gateway = Arc::new(RecordingGateway::default());
        let collaborators = Collaborators {
            source: source.clone(),
            enricher: Arc::new(LinkEnricher),
            gateway: gateway.clone(),
            store: store.clone(),
        };
        let supervisor = Supervisor::new(collaborators, config)
            .unwrap()
            .with_shutdown_timeout(Duration::from_secs(2));
        Self {
            supervisor,
            source,
            gateway,
            store,
        }
    }
}

/// Poll `check` every 10ms until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
