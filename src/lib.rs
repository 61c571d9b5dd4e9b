//! Tidecrawl: crawl and scrape orchestration
//!
//! This crate drives single-page scrapes, breadth-first crawls, and batches of
//! URLs on top of a pluggable fetch engine. It owns the crawl frontier, the
//! eligibility rules, the concurrency gate, session bookkeeping, and the job
//! store; page retrieval itself is delegated to a [`engine::FetchEngine`].

pub mod config;
pub mod crawler;
pub mod engine;
pub mod jobs;
pub mod output;
pub mod robots;
pub mod rules;
pub mod session;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Tidecrawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Bad caller input: malformed URL, invalid rule, missing parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// A session with the requested id is already active
    #[error("Session conflict: {0} is already active")]
    Conflict(String),

    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: engine::FetchError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: jobs::JobStatus,
        to: jobs::JobStatus,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Broken internal invariant; fatal for the job that hit it
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Coarse classification of a [`CrawlError`], for callers that only branch on kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlErrorKind {
    Validation,
    Conflict,
    Network,
    Timeout,
    Extraction,
    Internal,
}

impl CrawlError {
    /// Returns the taxonomy bucket this error falls into
    pub fn kind(&self) -> CrawlErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::UrlError(_) => CrawlErrorKind::Validation,
            Self::Conflict(_) => CrawlErrorKind::Conflict,
            Self::Fetch { source, .. } => match source {
                engine::FetchError::Timeout { .. } => CrawlErrorKind::Timeout,
                engine::FetchError::Extraction(_) => CrawlErrorKind::Extraction,
                engine::FetchError::Network(_) | engine::FetchError::Http { .. } => {
                    CrawlErrorKind::Network
                }
            },
            Self::JobNotFound(_) => CrawlErrorKind::Validation,
            Self::Storage(_) | Self::InvalidTransition { .. } | Self::Internal(_) | Self::Io(_) => {
                CrawlErrorKind::Internal
            }
        }
    }
}

/// Result type alias for Tidecrawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Settings;
pub use crawler::{BatchRequest, CrawlRequest, Crawler};
pub use engine::{ExtractionStrategy, FetchEngine, FetchError, FetchOptions};
pub use jobs::{CrawlCounters, JobSnapshot, JobStatistics, JobStatus, PageResult};
pub use output::OutputFormat;
pub use rules::{is_eligible, CrawlRule, Eligibility, RejectReason};
pub use session::{BrowserSession, SessionConfig, SessionManager};
pub use self::url::normalize_url;
