//! Listing page fetching
//!
//! `ListingSource` is the seam between the controller and the network;
//! `HttpListingSource` is the production implementation.

use crate::errors::CrawlError;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use paperwatch_common::config::CrawlerConfig;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One page of one category's recent listing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingRequest {
    pub category: String,
    pub skip: u32,
    pub show: u32,
}

impl ListingRequest {
    /// First page of a category
    pub fn first(category: impl Into<String>, page_size: u32) -> Self {
        Self {
            category: category.into(),
            skip: 0,
            show: page_size,
        }
    }

    /// `<site>/list/<category>/recent?skip=<skip>&show=<show>`
    pub fn url(&self, site_url: &str) -> String {
        format!(
            "{}/list/{}/recent?skip={}&show={}",
            site_url.trim_end_matches('/'),
            self.category,
            self.skip,
            self.show
        )
    }
}

/// Anything that can return the HTML body of a listing page
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(&self, request: &ListingRequest) -> Result<String, CrawlError>;
}

/// Fetches listing pages over HTTP, paced by a process-wide limiter
pub struct HttpListingSource {
    client: reqwest::Client,
    site_url: String,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpListingSource {
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        let timeout = config.request_timeout();

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        // A zero delay disables pacing
        let limiter = Quota::with_period(config.request_delay()).map(RateLimiter::direct);

        Ok(Self {
            client,
            site_url: config.site_url.clone(),
            limiter,
        })
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch(&self, request: &ListingRequest) -> Result<String, CrawlError> {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }

        let url = request.url(&self.site_url);
        debug!(%url, "Fetching listing page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| CrawlError::Fetch {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|source| CrawlError::Fetch { url, source })
    }
}
