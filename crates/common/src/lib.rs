//! PaperWatch Common Library
//!
//! Shared code for the PaperWatch crawler and downloader including:
//! - Database models and the record store repository
//! - Error types and handling
//! - Configuration management
//! - Metrics and tracing setup

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod telemetry;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{DbPool, InsertOutcome, NewPaper, Repository};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listing and PDF site
pub const DEFAULT_SITE_URL: &str = "https://arxiv.org";

/// Default listing window, reused for every page of every category
pub const DEFAULT_PAGE_SIZE: u32 = 250;
