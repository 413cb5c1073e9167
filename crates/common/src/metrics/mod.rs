//! Metrics and observability utilities
//!
//! Provides Prometheus metric descriptions and recording helpers
//! for the crawler and the downloader.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Duration;

/// Metrics prefix for all PaperWatch metrics
pub const METRICS_PREFIX: &str = "paperwatch";

/// Name of the download latency histogram, used when installing buckets
pub const DOWNLOAD_DURATION_METRIC: &str = "paperwatch_download_duration_seconds";

/// Buckets for PDF download latency (in seconds)
/// Small papers land under a second, scanned theses can take minutes
pub const DOWNLOAD_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
    300.0,  // 5m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Crawl metrics
    describe_counter!(
        format!("{}_listing_pages_total", METRICS_PREFIX),
        Unit::Count,
        "Listing pages fetched, by category and outcome"
    );

    describe_counter!(
        format!("{}_papers_discovered_total", METRICS_PREFIX),
        Unit::Count,
        "New papers stored by the crawler"
    );

    describe_counter!(
        format!("{}_papers_known_total", METRICS_PREFIX),
        Unit::Count,
        "Listing entries skipped because the paper was already stored"
    );

    // Download metrics
    describe_counter!(
        format!("{}_downloads_total", METRICS_PREFIX),
        Unit::Count,
        "Finished downloads, by terminal status"
    );

    describe_counter!(
        format!("{}_download_bytes_total", METRICS_PREFIX),
        Unit::Bytes,
        "Bytes written to completed PDF files"
    );

    describe_histogram!(
        DOWNLOAD_DURATION_METRIC,
        Unit::Seconds,
        "Time from first request to final rename"
    );

    describe_counter!(
        format!("{}_download_attempts_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Individual HTTP attempts that failed and were retried or given up"
    );

    tracing::info!("Metrics registered");
}

/// Record one listing page fetch
pub fn record_listing_page(category: &str, success: bool) {
    let outcome = if success { "success" } else { "error" };

    counter!(
        format!("{}_listing_pages_total", METRICS_PREFIX),
        "category" => category.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_paper_discovered(category: &str) {
    counter!(
        format!("{}_papers_discovered_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn record_paper_known(category: &str) {
    counter!(
        format!("{}_papers_known_total", METRICS_PREFIX),
        "category" => category.to_string()
    )
    .increment(1);
}

/// Helper to record a finished download
pub fn record_download(duration: Duration, bytes: u64, success: bool) {
    let status = if success { "completed" } else { "failed" };

    counter!(
        format!("{}_downloads_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    if success {
        counter!(format!("{}_download_bytes_total", METRICS_PREFIX)).increment(bytes);
        histogram!(DOWNLOAD_DURATION_METRIC).record(duration.as_secs_f64());
    }
}

pub fn record_download_attempt_failed() {
    counter!(format!("{}_download_attempts_failed_total", METRICS_PREFIX)).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in DOWNLOAD_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_duration_metric_uses_prefix() {
        assert!(DOWNLOAD_DURATION_METRIC.starts_with(METRICS_PREFIX));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op
        register_metrics();
        record_listing_page("cs.CL", true);
        record_paper_discovered("cs.CL");
        record_download(Duration::from_millis(10), 1024, true);
        record_download_attempt_failed();
    }
}
