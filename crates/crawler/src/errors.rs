//! Crawler error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Listing page for {category} (skip={skip}) has no entries container")]
    MissingContainer { category: String, skip: u32 },

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Listing request {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Configuration error: {0}")]
    Configuration(String),
}
