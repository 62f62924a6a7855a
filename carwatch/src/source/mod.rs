//! Listing source and enricher seams.
//!
//! The engine only sees these traits. [`SsListingSource`] and
//! [`SsListingEnricher`] talk to the classifieds site; tests plug in fakes.

mod ss;

use async_trait::async_trait;
use classifieds_parser::ParseError;
use thiserror::Error;

use crate::domain::{FilterCriteria, Listing, ListingPayload};

pub use ss::{SsListingEnricher, SsListingSource};

/// Failure of a listing query or a detail fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("page could not be parsed: {0}")]
    Parse(#[from] ParseError),

    #[error("criteria cannot be searched: {0}")]
    InvalidCriteria(String),

    #[error("{0}")]
    Other(String),
}

/// Runs a filter's search and returns the visible listings in page order.
#[async_trait]
pub trait ListingSource: Send + Sync + 'static {
    async fn query(&self, criteria: &FilterCriteria) -> Result<Vec<Listing>, SourceError>;
}

/// Turns a listing link into a notification payload.
#[async_trait]
pub trait ListingEnricher: Send + Sync + 'static {
    async fn fetch(&self, link: &str) -> Result<ListingPayload, SourceError>;
}
