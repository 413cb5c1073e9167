//! Crawl controller
//!
//! Walks every category's listing pages, stores papers the record store has
//! not seen, and once all categories are done hands today's papers to the
//! downloader.

use crate::errors::CrawlError;
use crate::fetcher::{ListingRequest, ListingSource};
use crate::listing::{start_of_day, ListingParser};
use chrono::{DateTime, Days, Utc};
use futures::stream::{self, StreamExt};
use paperwatch_common::config::CrawlerConfig;
use paperwatch_common::db::Repository;
use paperwatch_common::metrics;
use paperwatch_downloader::{DownloadOutcome, PaperDownloader};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one category during a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryReport {
    pub category: String,
    pub pages: u32,
    pub new_paper_ids: Vec<String>,
    pub known: usize,
    /// Set when pagination stopped early
    pub error: Option<String>,
}

impl CategoryReport {
    fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            ..Self::default()
        }
    }
}

/// Result of `CrawlController::run`
#[derive(Debug)]
pub struct CrawlReport {
    pub categories: Vec<CategoryReport>,
    pub new_paper_ids: Vec<String>,
    /// Downloads for today's papers, already running
    pub download_handles: Vec<JoinHandle<DownloadOutcome>>,
}

pub struct CrawlController {
    source: Arc<dyn ListingSource>,
    parser: ListingParser,
    repository: Repository,
    downloader: Arc<PaperDownloader>,
    page_size: u32,
    concurrent_requests: usize,
}

impl CrawlController {
    pub fn new(
        source: Arc<dyn ListingSource>,
        repository: Repository,
        downloader: Arc<PaperDownloader>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            source,
            parser: ListingParser::new(config.site_url.clone(), repository.clone()),
            repository,
            downloader,
            page_size: config.page_size,
            concurrent_requests: config.concurrent_requests.max(1),
        }
    }

    /// Crawl every category, then dispatch today's papers exactly once
    pub async fn run(&self, categories: &[String], days_back: u32) -> CrawlReport {
        self.run_at(categories, days_back, Utc::now()).await
    }

    /// `run` with "today" taken as the UTC day containing `now`
    pub async fn run_at(
        &self,
        categories: &[String],
        days_back: u32,
        now: DateTime<Utc>,
    ) -> CrawlReport {
        info!(?categories, days_back, page_size = self.page_size, "Starting crawl");

        let reports: Vec<CategoryReport> = stream::iter(categories)
            .map(|category| self.crawl_category(category))
            .buffered(self.concurrent_requests)
            .collect()
            .await;

        let new_paper_ids: Vec<String> = reports
            .iter()
            .flat_map(|report| report.new_paper_ids.iter().cloned())
            .collect();

        info!(
            categories = reports.len(),
            new_papers = new_paper_ids.len(),
            "Crawl finished"
        );

        let download_handles = self.dispatch_published_on(now).await;

        CrawlReport {
            categories: reports,
            new_paper_ids,
            download_handles,
        }
    }

    /// Follow one category's pagination until it runs out or a page fails
    #[instrument(skip(self))]
    async fn crawl_category(&self, category: &str) -> CategoryReport {
        let mut report = CategoryReport::new(category);
        let mut next = Some(ListingRequest::first(category, self.page_size));

        while let Some(request) = next.take() {
            match self.crawl_page(&request, &mut report).await {
                Ok(following) => next = following,
                Err(e) => {
                    error!(
                        skip = request.skip,
                        error = %e,
                        "Listing page failed, stopping category"
                    );
                    report.error = Some(e.to_string());
                }
            }
        }

        info!(
            pages = report.pages,
            new_papers = report.new_paper_ids.len(),
            known = report.known,
            "Category finished"
        );

        report
    }

    /// Fetch, parse and store one page; returns the next page's request
    #[instrument(skip(self, report), fields(category = %request.category, skip = request.skip))]
    async fn crawl_page(
        &self,
        request: &ListingRequest,
        report: &mut CategoryReport,
    ) -> Result<Option<ListingRequest>, CrawlError> {
        let html = self.source.fetch(request).await;
        metrics::record_listing_page(&request.category, html.is_ok());
        let html = html?;
        report.pages += 1;

        let page = self.parser.parse(&html, request).await?;
        report.known += page.known_entries;

        for entry in page.entries {
            let external_id = entry.external_id.clone();

            let paper = match entry.into_new_paper() {
                Ok(paper) => paper,
                Err(e) => {
                    warn!(%external_id, error = %e, "Invalid listing entry, skipping");
                    continue;
                }
            };

            match self.repository.insert_paper(paper).await {
                Ok(outcome) if outcome.is_inserted() => {
                    debug!(message = %outcome.message(), "Stored new paper");
                    metrics::record_paper_discovered(&request.category);
                    report.new_paper_ids.push(external_id);
                }
                Ok(outcome) => {
                    debug!(message = %outcome.message(), "Paper stored concurrently");
                    report.known += 1;
                }
                Err(e) => error!(%external_id, error = %e, "Failed to store paper"),
            }
        }

        if page.next_request.is_none() {
            info!(total = page.total_entries, "Reached last listing page");
        }

        Ok(page.next_request)
    }

    /// Hand papers published on the UTC day containing `day` to the downloader.
    /// Failures here are logged; the crawl result stands regardless.
    pub async fn dispatch_published_on(
        &self,
        day: DateTime<Utc>,
    ) -> Vec<JoinHandle<DownloadOutcome>> {
        let start = start_of_day(day);
        let Some(end) = start.checked_add_days(Days::new(1)) else {
            error!(%start, "Cannot compute end of day");
            return Vec::new();
        };

        match self.repository.papers_published_between(start, end).await {
            Ok(papers) if papers.is_empty() => {
                info!(%start, "No papers published on this day");
                Vec::new()
            }
            Ok(papers) => {
                info!(count = papers.len(), %start, "Dispatching papers for download");
                self.downloader.download_many(papers)
            }
            Err(e) => {
                error!(error = %e, %start, "Failed to query papers for dispatch");
                Vec::new()
            }
        }
    }
}
