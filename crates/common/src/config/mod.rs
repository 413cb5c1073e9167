//! Configuration management for PaperWatch services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Listing crawler configuration
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// PDF downloader configuration
    #[serde(default)]
    pub download: DownloadConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes and existence checks)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables at startup
    #[serde(default = "default_enabled")]
    pub auto_create_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Listing and PDF site base URL
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Categories to crawl, e.g. cs.AI
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Lookback window in days
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    /// Entries requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Categories crawled concurrently
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// Minimum delay between listing requests in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Listing request timeout in seconds
    #[serde(default = "default_crawler_timeout")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent with listing requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Root directory for downloaded PDFs
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Worker pool size
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Stream chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Request attempts per download
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Delay between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Pause after each completed download in seconds
    #[serde(default = "default_task_delay")]
    pub task_delay_secs: u64,

    /// Concurrent request initiations (defaults to max_workers)
    pub request_concurrency: Option<usize>,

    /// PDF request timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (debug, info, paperwatch_crawler=debug, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_enabled")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_site_url() -> String { crate::DEFAULT_SITE_URL.to_string() }
fn default_categories() -> Vec<String> { vec!["cs.AI".to_string(), "cs.CL".to_string()] }
fn default_days_back() -> u32 { 1 }
fn default_page_size() -> u32 { crate::DEFAULT_PAGE_SIZE }
fn default_concurrent_requests() -> usize { 2 }
fn default_request_delay_ms() -> u64 { 1000 }
fn default_crawler_timeout() -> u64 { 30 }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:136.0) Gecko/20100101 Firefox/136.0".to_string()
}
fn default_root_dir() -> PathBuf { PathBuf::from("papers") }
fn default_max_workers() -> usize { 2 }
fn default_chunk_size() -> usize { 8192 }
fn default_retry_times() -> u32 { 3 }
fn default_retry_delay() -> u64 { 5 }
fn default_task_delay() -> u64 { 1 }
fn default_download_timeout() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/paperwatch")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // e.g., APP__DOWNLOAD__MAX_WORKERS=4, APP__CRAWLER__CATEGORIES=cs.AI,cs.CL
            .add_source(env_source())

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?;

        config.try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("APP")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("crawler.categories")
        .try_parsing(true)
}

impl DatabaseConfig {
    /// Configuration for the given URL with default pool settings
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            auto_create_schema: default_enabled(),
        }
    }
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DownloadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn task_delay(&self) -> Duration {
        Duration::from_secs(self.task_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Admission gate capacity
    pub fn request_concurrency(&self) -> usize {
        self.request_concurrency.unwrap_or(self.max_workers)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            categories: default_categories(),
            days_back: default_days_back(),
            page_size: default_page_size(),
            concurrent_requests: default_concurrent_requests(),
            request_delay_ms: default_request_delay_ms(),
            request_timeout_secs: default_crawler_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            max_workers: default_max_workers(),
            chunk_size: default_chunk_size(),
            retry_times: default_retry_times(),
            retry_delay_secs: default_retry_delay(),
            task_delay_secs: default_task_delay(),
            request_concurrency: None,
            request_timeout_secs: default_download_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_enabled(),
            metrics_port: 0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::for_url("postgres://localhost/paperwatch"),
            crawler: CrawlerConfig::default(),
            download: DownloadConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.crawler.page_size, 250);
        assert_eq!(config.crawler.categories, vec!["cs.AI", "cs.CL"]);
        assert_eq!(config.download.chunk_size, 8192);
        assert_eq!(config.download.retry_times, 3);
    }

    #[test]
    fn test_request_concurrency_defaults_to_workers() {
        let mut download = DownloadConfig::default();
        assert_eq!(download.request_concurrency(), download.max_workers);

        download.request_concurrency = Some(7);
        assert_eq!(download.request_concurrency(), 7);
    }

    #[test]
    fn test_from_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paperwatch.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            url = "sqlite://papers.db?mode=rwc"

            [crawler]
            categories = ["math.CO"]
            page_size = 100

            [download]
            max_workers = 6
            retry_delay_secs = 1
            "#,
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.database.url, "sqlite://papers.db?mode=rwc");
        assert_eq!(config.crawler.categories, vec!["math.CO"]);
        assert_eq!(config.crawler.page_size, 100);
        assert_eq!(config.crawler.site_url, "https://arxiv.org");
        assert_eq!(config.download.max_workers, 6);
        assert_eq!(config.download.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.download.request_concurrency(), 6);
    }
}
