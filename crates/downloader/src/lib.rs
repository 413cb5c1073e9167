//! PaperWatch Downloader
//!
//! Fetches PDFs for stored papers on a bounded worker pool:
//! - status row committed before any network I/O
//! - fixed-delay retries behind an admission gate
//! - byte-level progress, `.tmp` file promoted by rename on success

pub mod downloader;
pub mod errors;
pub mod retry;

pub use downloader::{DownloadOutcome, DownloaderSettings, PaperDownloader};
pub use errors::DownloadError;
pub use retry::FixedRetry;
