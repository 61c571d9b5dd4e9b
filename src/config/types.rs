use crate::engine::{FetchOptions, DEFAULT_USER_AGENT};
use crate::output::OutputFormat;
use crate::rules::CrawlRule;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level settings for Tidecrawl
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Defaults for sessions created on first use
    pub browser: SessionConfig,
    pub scrape: ScrapeSettings,
    /// Default rule for crawls that do not supply their own
    pub crawl: CrawlRule,
    pub batch: BatchSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Fetch options for a scrape, crawl or batch that does not supply its own
    ///
    /// The proxy comes from the browser section.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.scrape.timeout,
            headless: self.scrape.headless,
            user_agent: Some(self.scrape.user_agent.clone()),
            wait_for: self.scrape.wait_for.clone(),
            proxy_url: self.browser.proxy_url.clone(),
            retries: self.scrape.retries,
            retry_delay: self.scrape.retry_delay,
        }
    }
}

/// Single page fetch defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScrapeSettings {
    /// Per-fetch timeout in seconds
    pub timeout: u64,
    pub headless: bool,
    pub user_agent: String,
    /// CSS selector to wait for before capturing a page
    pub wait_for: Option<String>,
    pub output_format: OutputFormat,
    /// Extra attempts after a transient failure
    pub retries: u32,
    /// Seconds between attempts
    pub retry_delay: f64,
    /// Reuse successful results from storage instead of refetching
    pub cache_enabled: bool,
    /// Seconds a cached result stays fresh
    pub cache_ttl: u64,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout: 30,
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            wait_for: None,
            output_format: OutputFormat::Markdown,
            retries: 0,
            retry_delay: 1.0,
            cache_enabled: true,
            cache_ttl: 3600,
        }
    }
}

/// Batch processing defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BatchSettings {
    pub max_concurrent: usize,
    /// Seconds a slot waits after a fetch before taking the next URL
    pub delay: f64,
    pub continue_on_error: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            delay: 0.0,
            continue_on_error: true,
        }
    }
}

/// Persistence and session lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageSettings {
    /// SQLite database for job and session write-through; disabled when unset
    pub database_path: Option<PathBuf>,
    pub store_results: bool,
    /// Idle seconds before a session expires
    pub session_timeout: u64,
    /// Seconds between expiry sweeps
    pub session_cleanup_interval: u64,
    /// Seconds a finished job is kept before cleanup removes it
    pub job_retention: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            store_results: true,
            session_timeout: 1800,
            session_cleanup_interval: 300,
            job_retention: 7 * 24 * 3600,
        }
    }
}
