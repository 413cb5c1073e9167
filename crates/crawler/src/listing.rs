//! Listing page parser
//!
//! Turns one "recent submissions" page into a page date, a total entry
//! count, the paper summaries on the page and, when more entries remain,
//! the request for the next page. Extraction is synchronous and works on
//! owned data so parsed pages can cross await points.

use crate::errors::CrawlError;
use crate::fetcher::ListingRequest;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use paperwatch_common::db::{NewPaper, Repository};
use paperwatch_common::{metrics, Result as AppResult};
use regex_lite::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, error, instrument, warn};

/// Date format of listing headers, e.g. `Wed, 05 Mar 2025`
pub const HEADER_DATE_FORMAT: &str = "%a, %d %b %Y";

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("static selector"));
    };
}

selector!(ARTICLES, "dl#articles");
selector!(HEADER, "h3");
selector!(DT, "dt");
selector!(DD, "dd");
selector!(ABS_LINK, r#"a[href*="/abs/"]"#);
selector!(META, "div.meta");
selector!(TITLE, "div.list-title");
selector!(AUTHORS, "div.list-authors a");
selector!(ABSTRACT, "p.mathjax");
selector!(PRIMARY_SUBJECT, "div.list-subjects span.primary-subject");
selector!(SUBJECTS, "div.list-subjects");

static TOTAL_ENTRIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)showing\s+(?:first\s+)?\d+\s+of\s+(\d+)\s+entries").expect("static regex")
});

/// One listing entry, ready to become a `NewPaper`
#[derive(Debug, Clone, PartialEq)]
pub struct PaperSummary {
    pub external_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    /// Primary category first
    pub categories: Vec<String>,
    pub pdf_url: String,
    pub published_date: DateTime<Utc>,
}

impl PaperSummary {
    pub fn into_new_paper(self) -> AppResult<NewPaper> {
        NewPaper::builder(self.external_id, self.published_date)
            .title(self.title)
            .authors(self.authors)
            .abstract_text(self.abstract_text)
            .pdf_url(self.pdf_url)
            .categories(self.categories)
            .build()
    }
}

/// Everything extracted from one listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub date: DateTime<Utc>,
    pub total_entries: u32,
    pub entries: Vec<PaperSummary>,
    /// Entries dropped because the store already has them
    pub known_entries: usize,
    pub next_request: Option<ListingRequest>,
}

/// Midnight UTC of the given instant's day
pub fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&instant.date_naive().and_time(NaiveTime::MIN))
}

/// Extract a listing page without consulting the store.
///
/// `fallback_date` stamps entries when the header date is missing or
/// unparseable. The only page-level failure is a missing entries container.
pub fn extract_listing(
    html: &str,
    request: &ListingRequest,
    site_url: &str,
    fallback_date: DateTime<Utc>,
) -> Result<ListingPage, CrawlError> {
    let document = Html::parse_document(html);

    let container = document
        .select(&ARTICLES)
        .next()
        .ok_or_else(|| CrawlError::MissingContainer {
            category: request.category.clone(),
            skip: request.skip,
        })?;

    let header = document
        .select(&HEADER)
        .map(text_of)
        .find(|text| text.contains("entries"));

    let (date, total_entries) = match header {
        Some(ref text) => (
            parse_header_date(text).unwrap_or_else(|| {
                warn!(header = %text, "Unparseable listing date, using processing date");
                fallback_date
            }),
            parse_total_entries(text),
        ),
        None => {
            warn!(category = %request.category, "Listing header not found");
            (fallback_date, 0)
        }
    };

    let dts: Vec<ElementRef> = container.select(&DT).collect();
    let dds: Vec<ElementRef> = container.select(&DD).collect();
    if dts.len() != dds.len() {
        warn!(
            dt = dts.len(),
            dd = dds.len(),
            "Entry term/description count mismatch, pairing up to the shorter list"
        );
    }

    let entries = dts
        .iter()
        .zip(dds.iter())
        .enumerate()
        .filter_map(|(index, (dt, dd))| extract_entry(index, *dt, *dd, site_url, date))
        .collect();

    Ok(ListingPage {
        date,
        total_entries,
        entries,
        known_entries: 0,
        next_request: next_request(request, total_entries),
    })
}

/// Page date from a header like `Wed, 05 Mar 2025 (showing first 250 of 438 entries)`
pub fn parse_header_date(header: &str) -> Option<DateTime<Utc>> {
    let date_part = header.split('(').next()?.trim();
    let date = NaiveDate::parse_from_str(date_part, HEADER_DATE_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

/// Total entry count from the header; 0 when absent or malformed
pub fn parse_total_entries(header: &str) -> u32 {
    TOTAL_ENTRIES
        .captures(header)
        .and_then(|caps| caps.get(1))
        .and_then(|total| total.as_str().parse().ok())
        .unwrap_or(0)
}

/// Request for the page after `request`, if `total` says there is one
pub fn next_request(request: &ListingRequest, total: u32) -> Option<ListingRequest> {
    if total == 0 || request.show == 0 {
        return None;
    }

    let next_skip = request.skip.saturating_add(request.show);
    (next_skip < total).then(|| ListingRequest {
        skip: next_skip,
        ..request.clone()
    })
}

fn extract_entry(
    index: usize,
    dt: ElementRef,
    dd: ElementRef,
    site_url: &str,
    published_date: DateTime<Utc>,
) -> Option<PaperSummary> {
    let Some(external_id) = dt
        .select(&ABS_LINK)
        .filter_map(|link| link.value().attr("href"))
        .find_map(identifier_from_href)
    else {
        warn!(entry = index + 1, "Listing entry has no abstract link, skipping");
        return None;
    };

    let meta = dd.select(&META).next().unwrap_or(dd);

    let title = meta
        .select(&TITLE)
        .next()
        .map(|title| text_of(title).replacen("Title:", "", 1).trim().to_string())
        .unwrap_or_default();

    let authors = meta
        .select(&AUTHORS)
        .map(text_of)
        .filter(|author| !author.is_empty())
        .collect();

    let abstract_text = dd.select(&ABSTRACT).next().map(text_of).unwrap_or_default();

    let pdf_url = format!("{}/pdf/{}.pdf", site_url.trim_end_matches('/'), external_id);

    Some(PaperSummary {
        categories: categories_of(meta),
        external_id,
        title,
        authors,
        abstract_text,
        pdf_url,
        published_date,
    })
}

/// `/abs/2503.01234` or `https://arxiv.org/abs/2503.01234v2?context=cs` -> the id part
fn identifier_from_href(href: &str) -> Option<String> {
    let (_, tail) = href.split_once("/abs/")?;
    let id = tail
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches('/');

    (!id.is_empty()).then(|| id.to_string())
}

/// Primary subject, then the `;`-separated subjects that follow it
fn categories_of(meta: ElementRef) -> Vec<String> {
    let mut categories: Vec<String> = meta
        .select(&PRIMARY_SUBJECT)
        .map(text_of)
        .filter(|subject| !subject.is_empty())
        .collect();

    if let Some(subjects) = meta.select(&SUBJECTS).next() {
        // Only the element's own text; the primary subject lives in a child span
        let trailer: String = subjects
            .children()
            .filter_map(|node| node.value().as_text())
            .map(|text| &**text)
            .collect();

        for subject in trailer.split(';').map(collapse_whitespace) {
            if !subject.is_empty() && !categories.contains(&subject) {
                categories.push(subject);
            }
        }
    }

    categories
}

fn text_of(element: ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Listing parser backed by the record store: known papers are never re-emitted
#[derive(Clone)]
pub struct ListingParser {
    site_url: String,
    repository: Repository,
}

impl ListingParser {
    pub fn new(site_url: impl Into<String>, repository: Repository) -> Self {
        Self {
            site_url: site_url.into(),
            repository,
        }
    }

    #[instrument(skip(self, html), fields(category = %request.category, skip = request.skip))]
    pub async fn parse(
        &self,
        html: &str,
        request: &ListingRequest,
    ) -> Result<ListingPage, CrawlError> {
        let mut page = extract_listing(html, request, &self.site_url, start_of_day(Utc::now()))?;

        debug!(
            date = %page.date.format("%Y-%m-%d"),
            total = page.total_entries,
            entries = page.entries.len(),
            "Listing page extracted"
        );

        let mut unknown = Vec::with_capacity(page.entries.len());
        for entry in page.entries.drain(..) {
            match self.repository.paper_exists(&entry.external_id).await {
                Ok(true) => {
                    debug!(external_id = %entry.external_id, "Paper already stored");
                    metrics::record_paper_known(&request.category);
                    page.known_entries += 1;
                }
                Ok(false) => unknown.push(entry),
                Err(e) => {
                    // The insert path rejects duplicates, so treat as unknown
                    error!(external_id = %entry.external_id, error = %e, "Existence check failed");
                    unknown.push(entry);
                }
            }
        }
        page.entries = unknown;

        Ok(page)
    }
}
