//! PaperWatch Crawler
//!
//! Crawl trigger:
//!
//! ```text
//! crawler [CATEGORIES] [DAYS_BACK]
//! crawler cs.AI,cs.CL 1
//! ```
//!
//! Positional arguments override `crawler.categories` and `crawler.days_back`.
//! The process exits once today's downloads have finished.

use anyhow::Context;
use paperwatch_common::{
    config::{AppConfig, CrawlerConfig, ObservabilityConfig},
    db::{ensure_schema, DbPool, Repository},
    metrics, telemetry, VERSION,
};
use paperwatch_crawler::{CrawlController, HttpListingSource};
use paperwatch_downloader::{downloader::wait_all, DownloaderSettings, PaperDownloader};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Apply `[CATEGORIES] [DAYS_BACK]` on top of the loaded configuration
fn apply_args(
    config: &mut CrawlerConfig,
    mut args: impl Iterator<Item = String>,
) -> anyhow::Result<()> {
    if let Some(categories) = args.next() {
        let categories: Vec<String> = categories
            .split(',')
            .map(str::trim)
            .filter(|category| !category.is_empty())
            .map(String::from)
            .collect();

        anyhow::ensure!(!categories.is_empty(), "no categories given");
        config.categories = categories;
    }

    if let Some(days_back) = args.next() {
        config.days_back = days_back.parse().with_context(|| {
            format!("DAYS_BACK must be a non-negative integer, got {:?}", days_back)
        })?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing(&ObservabilityConfig::default());
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    // Initialize tracing
    telemetry::init_tracing(&config.observability);

    info!("Starting PaperWatch Crawler v{}", VERSION);

    apply_args(&mut config.crawler, std::env::args().skip(1))?;

    // Initialize metrics
    metrics::register_metrics();
    telemetry::install_metrics_exporter(&config.observability)?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.auto_create_schema {
        ensure_schema(db.write())
            .await
            .context("Failed to create database schema")?;
    }
    let repository = Repository::new(db);
    repository.ping().await?;
    info!("Database reachable");

    let downloader = Arc::new(PaperDownloader::new(
        repository.clone(),
        DownloaderSettings {
            user_agent: Some(config.crawler.user_agent.clone()),
            ..DownloaderSettings::from(&config.download)
        },
    )?);

    let source = Arc::new(HttpListingSource::new(&config.crawler)?);
    let controller = CrawlController::new(source, repository.clone(), downloader, &config.crawler);

    let report = controller
        .run(&config.crawler.categories, config.crawler.days_back)
        .await;

    for category in &report.categories {
        match category.error {
            Some(ref e) => warn!(
                category = %category.category,
                pages = category.pages,
                new_papers = category.new_paper_ids.len(),
                error = %e,
                "Category ended early"
            ),
            None => info!(
                category = %category.category,
                pages = category.pages,
                new_papers = category.new_paper_ids.len(),
                known = category.known,
                "Category complete"
            ),
        }
    }

    if !report.download_handles.is_empty() {
        info!(count = report.download_handles.len(), "Waiting for downloads");
        let outcomes = wait_all(report.download_handles).await;
        let completed = outcomes.iter().filter(|outcome| outcome.ok).count();
        info!(completed, failed = outcomes.len() - completed, "Downloads finished");
    }

    match repository.download_state_counts().await {
        Ok(counts) => {
            for (state, count) in counts {
                info!(%state, count, "Download status total");
            }
        }
        Err(e) => error!(error = %e, "Failed to read download status totals"),
    }

    info!(new_papers = report.new_paper_ids.len(), "Crawler finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_no_args_keeps_config() {
        let mut config = CrawlerConfig::default();
        apply_args(&mut config, args(&[])).unwrap();
        assert_eq!(config.categories, ["cs.AI", "cs.CL"]);
        assert_eq!(config.days_back, 1);
    }

    #[test]
    fn test_args_override_config() {
        let mut config = CrawlerConfig::default();
        apply_args(&mut config, args(&["cs.LG, stat.ML", "3"])).unwrap();
        assert_eq!(config.categories, ["cs.LG", "stat.ML"]);
        assert_eq!(config.days_back, 3);
    }

    #[test]
    fn test_bad_days_back() {
        let mut config = CrawlerConfig::default();
        assert!(apply_args(&mut config, args(&["cs.AI", "-1"])).is_err());
        assert!(apply_args(&mut config, args(&[","])).is_err());
    }
}
