//! PaperWatch Downloader
//!
//! Retry sweep: resubmits stored papers to the download pool.
//!
//! ```text
//! downloader [failed|pending|YYYY-MM-DD]
//! ```
//!
//! `failed` (the default) and `pending` select papers by download status,
//! a date selects every paper published that day.

use anyhow::Context;
use chrono::{Days, NaiveDate, TimeZone, Utc};
use paperwatch_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{ensure_schema, models::DownloadState, DbPool, Repository},
    metrics, telemetry, VERSION,
};
use paperwatch_downloader::{downloader::wait_all, DownloaderSettings, PaperDownloader};
use std::sync::Arc;
use tracing::{error, info};

/// Which papers to resubmit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    State(DownloadState),
    PublishedOn(NaiveDate),
}

fn parse_sweep(arg: Option<&str>) -> anyhow::Result<Sweep> {
    match arg {
        None | Some("failed") => Ok(Sweep::State(DownloadState::Failed)),
        Some("pending") => Ok(Sweep::State(DownloadState::Pending)),
        Some(other) => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .map(Sweep::PublishedOn)
            .with_context(|| format!("expected failed, pending or YYYY-MM-DD, got {:?}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing(&ObservabilityConfig::default());
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    // Initialize tracing
    telemetry::init_tracing(&config.observability);

    info!("Starting PaperWatch Downloader v{}", VERSION);

    let sweep = parse_sweep(std::env::args().nth(1).as_deref())?;

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

    let papers = match sweep {
        Sweep::State(state) => repository.papers_with_download_state(state).await?,
        Sweep::PublishedOn(date) => {
            let midnight = date.and_hms_opt(0, 0, 0).context("Invalid date")?;
            let start = Utc.from_utc_datetime(&midnight);
            let end = start
                .checked_add_days(Days::new(1))
                .context("Date out of range")?;
            repository.papers_published_between(start, end).await?
        }
    };

    if papers.is_empty() {
        info!(?sweep, "Nothing to download");
        return Ok(());
    }

    info!(?sweep, count = papers.len(), "Resubmitting papers");

    let downloader = Arc::new(PaperDownloader::new(
        repository.clone(),
        DownloaderSettings::from(&config.download),
    )?);

    let outcomes = wait_all(downloader.download_many(papers)).await;
    let completed = outcomes.iter().filter(|outcome| outcome.ok).count();

    info!(
        completed,
        failed = outcomes.len() - completed,
        "Retry sweep finished"
    );

    match repository.download_state_counts().await {
        Ok(counts) => {
            for (state, count) in counts {
                info!(%state, count, "Download status total");
            }
        }
        Err(e) => error!(error = %e, "Failed to read download status totals"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sweep_is_failed() {
        assert_eq!(parse_sweep(None).unwrap(), Sweep::State(DownloadState::Failed));
        assert_eq!(
            parse_sweep(Some("pending")).unwrap(),
            Sweep::State(DownloadState::Pending)
        );
    }

    #[test]
    fn test_sweep_by_date() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(parse_sweep(Some("2025-03-05")).unwrap(), Sweep::PublishedOn(expected));
    }

    #[test]
    fn test_sweep_rejects_garbage() {
        assert!(parse_sweep(Some("yesterday")).is_err());
    }
}
