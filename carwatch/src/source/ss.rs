//! ss.com adapters.

use async_trait::async_trait;
use classifieds_parser::{SearchForm, parse_detail, parse_results};
use reqwest::Client;
use tracing::{debug, trace};

use super::{ListingEnricher, ListingSource, SourceError};
use crate::domain::{FilterCriteria, Listing, ListingPayload};

/// Submits the brand category's search form and reads the result rows.
#[derive(Debug, Clone)]
pub struct SsListingSource {
    client: Client,
    base_url: String,
}

impl SsListingSource {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Search page of a brand category: `<category url>search/`.
fn search_url(brand_url: &str) -> Result<String, SourceError> {
    let base = url::Url::parse(brand_url)
        .map_err(|e| SourceError::InvalidCriteria(format!("{brand_url}: {e}")))?;
    let base = if base.path().ends_with('/') {
        base
    } else {
        url::Url::parse(&format!("{brand_url}/"))
            .map_err(|e| SourceError::InvalidCriteria(format!("{brand_url}: {e}")))?
    };
    base.join("search/")
        .map(|u| u.to_string())
        .map_err(|e| SourceError::InvalidCriteria(format!("{brand_url}: {e}")))
}

#[async_trait]
impl ListingSource for SsListingSource {
    async fn query(&self, criteria: &FilterCriteria) -> Result<Vec<Listing>, SourceError> {
        let brand_url = criteria
            .brand_url
            .as_deref()
            .ok_or_else(|| SourceError::InvalidCriteria("no brand category url".to_string()))?;
        let search_url = search_url(brand_url)?;

        let page = self.get_text(&search_url).await?;
        let form = SearchForm::from_page(&page, &search_url)?;
        let body = form.fill(&criteria.search_query());
        trace!(action = %form.action(), fields = body.len(), "Submitting search form");

        let response = self
            .client
            .post(form.action().as_str())
            .form(&body)
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;

        let listings: Vec<Listing> = parse_results(&html, &self.base_url)
            .into_iter()
            .map(Listing::from)
            .collect();
        debug!(
            brand = criteria.brand.as_deref().unwrap_or_default(),
            count = listings.len(),
            "Search returned listings"
        );
        Ok(listings)
    }
}

/// Fetches a listing page and extracts its photo and caption.
#[derive(Debug, Clone)]
pub struct SsListingEnricher {
    client: Client,
}

impl SsListingEnricher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListingEnricher for SsListingEnricher {
    async fn fetch(&self, link: &str) -> Result<ListingPayload, SourceError> {
        let response = self.client.get(link).send().await?.error_for_status()?;
        let html = response.text().await?;
        let detail = parse_detail(&html, link)?;
        Ok(detail.into())
    }
}
