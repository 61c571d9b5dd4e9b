//! Fetch engine seam
//!
//! The core never talks to the network directly. Every page, and every
//! robots.txt, is retrieved through a [`FetchEngine`]. [`HttpEngine`] is the
//! bundled implementation; browser-backed engines plug in behind the same
//! trait.

mod http;
mod parser;

pub use http::HttpEngine;
pub use parser::{extract_css, parse_html, ParsedPage};

use crate::jobs::PageErrorKind;
use crate::CrawlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// User agent sent when neither the fetch options nor the session name one
pub const DEFAULT_USER_AGENT: &str = concat!("tidecrawl/", env!("CARGO_PKG_VERSION"));

/// Per-fetch options handed to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchOptions {
    /// Per-fetch timeout in seconds
    pub timeout: u64,
    pub headless: bool,
    pub user_agent: Option<String>,
    /// CSS selector a rendering engine should wait for before capturing
    pub wait_for: Option<String>,
    pub proxy_url: Option<String>,
    /// Extra attempts after a retryable failure
    pub retries: u32,
    /// Seconds between retry attempts
    pub retry_delay: f64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: 30,
            headless: true,
            user_agent: None,
            wait_for: None,
            proxy_url: None,
            retries: 0,
            retry_delay: 1.0,
        }
    }
}

impl FetchOptions {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.timeout < 1 || self.timeout > 300 {
            return Err(CrawlError::Validation(format!(
                "timeout must be between 1 and 300 seconds, got {}",
                self.timeout
            )));
        }
        if self.retries > 10 {
            return Err(CrawlError::Validation(format!(
                "retries must be at most 10, got {}",
                self.retries
            )));
        }
        if !self.retry_delay.is_finite() || self.retry_delay < 0.0 {
            return Err(CrawlError::Validation(
                "retry-delay must be a non-negative number of seconds".to_string(),
            ));
        }
        if matches!(&self.user_agent, Some(ua) if ua.trim().is_empty()) {
            return Err(CrawlError::Validation(
                "user-agent must not be empty".to_string(),
            ));
        }
        if let Some(proxy) = &self.proxy_url {
            validate_proxy_url(proxy)?;
        }
        Ok(())
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    /// Returns the user agent in effect for these options
    pub fn effective_user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}

/// Checks that a proxy URL parses and uses a supported scheme
pub(crate) fn validate_proxy_url(proxy: &str) -> Result<(), CrawlError> {
    let parsed = Url::parse(proxy)
        .map_err(|e| CrawlError::Validation(format!("invalid proxy URL '{}': {}", proxy, e)))?;
    match parsed.scheme() {
        "http" | "https" | "socks5" | "socks5h" => Ok(()),
        other => Err(CrawlError::Validation(format!(
            "unsupported proxy scheme '{}'",
            other
        ))),
    }
}

/// What to pull out of a page beyond its raw content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractionStrategy {
    #[default]
    None,
    /// Named CSS selectors; each yields the text of every match
    Css { selectors: BTreeMap<String, String> },
    /// Model in `provider/model` form plus the extraction prompt
    Llm {
        model: String,
        prompt: String,
        temperature: f32,
    },
}

impl ExtractionStrategy {
    /// Builds a CSS strategy, rejecting empty maps and unparsable selectors
    pub fn css<I, K, V>(selectors: I) -> Result<Self, CrawlError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let strategy = Self::Css {
            selectors: selectors
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn llm(model: impl Into<String>, prompt: impl Into<String>) -> Result<Self, CrawlError> {
        let strategy = Self::Llm {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.0,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        match self {
            Self::None => Ok(()),
            Self::Css { selectors } => {
                if selectors.is_empty() {
                    return Err(CrawlError::Validation(
                        "css extraction needs at least one selector".to_string(),
                    ));
                }
                for (name, selector) in selectors {
                    scraper::Selector::parse(selector).map_err(|e| {
                        CrawlError::Validation(format!(
                            "invalid css selector for '{}': {:?}",
                            name, e
                        ))
                    })?;
                }
                Ok(())
            }
            Self::Llm {
                model,
                prompt,
                temperature,
            } => {
                let well_formed = model
                    .split_once('/')
                    .map(|(provider, name)| !provider.is_empty() && !name.is_empty())
                    .unwrap_or(false);
                if !well_formed {
                    return Err(CrawlError::Validation(format!(
                        "llm model must be 'provider/model', got '{}'",
                        model
                    )));
                }
                if prompt.trim().is_empty() {
                    return Err(CrawlError::Validation(
                        "llm extraction needs a prompt".to_string(),
                    ));
                }
                if !(0.0..=2.0).contains(temperature) {
                    return Err(CrawlError::Validation(format!(
                        "llm temperature must be between 0 and 2, got {}",
                        temperature
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Raw page renderings produced by an engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub html: String,
    pub text: String,
    pub markdown: String,
}

/// A successful engine response
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status_code: u16,
    pub title: Option<String>,
    pub content: PageContent,
    /// Absolute URLs, in document order
    pub links: Vec<String>,
    pub extracted: Option<serde_json::Value>,
}

/// Fetch-level failures; recorded per page, never fatal to a crawl
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("extraction failed: {0}")]
    Extraction(String),
}

impl FetchError {
    pub fn kind(&self) -> PageErrorKind {
        match self {
            Self::Network(_) => PageErrorKind::Network,
            Self::Timeout { .. } => PageErrorKind::Timeout,
            Self::Http { .. } => PageErrorKind::Http,
            Self::Extraction(_) => PageErrorKind::Extraction,
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status } => *status == 429 || *status >= 500,
            Self::Extraction(_) => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(*status),
            _ => None,
        }
    }
}

/// Page retrieval capability consumed by the crawl core
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Retrieves one page
    async fn fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
        extraction: &ExtractionStrategy,
        session_id: Option<&str>,
    ) -> Result<FetchedPage, FetchError>;

    /// Returns the robots.txt body at `robots_url`, or None if there is none
    async fn fetch_robots(&self, _robots_url: &Url, _options: &FetchOptions) -> Option<String> {
        None
    }

    /// Frees whatever the engine holds for a closed session
    async fn release_session(&self, _session_id: &str) {}
}
