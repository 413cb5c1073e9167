//! PaperWatch Crawler
//!
//! Crawls category listings, keeps the record store free of duplicates and
//! hands the day's papers to the downloader.

pub mod controller;
pub mod errors;
pub mod fetcher;
pub mod listing;

pub use controller::{CategoryReport, CrawlController, CrawlReport};
pub use errors::CrawlError;
pub use fetcher::{HttpListingSource, ListingRequest, ListingSource};
pub use listing::{extract_listing, ListingPage, ListingParser, PaperSummary};
