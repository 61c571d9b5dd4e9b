//! Crawl rules and link eligibility
//!
//! A [`CrawlRule`] is the immutable policy for one crawl job. It is compiled
//! into a [`RuleEngine`] once per crawl so the include/exclude regexes are not
//! rebuilt for every discovered link.

mod engine;

pub use engine::RuleEngine;

use crate::robots::ParsedRobots;
use crate::CrawlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Traversal policy for a crawl job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlRule {
    /// Deepest link level followed; the seed is depth 0
    pub max_depth: u32,

    /// Upper bound on attempted page fetches
    pub max_pages: u32,

    /// Wall-clock budget in seconds
    pub max_duration: u64,

    /// Seconds a worker slot rests after each fetch
    pub delay: f64,

    pub concurrent_requests: usize,
    pub respect_robots: bool,
    pub allow_external_links: bool,
    pub allow_subdomains: bool,

    /// Regexes searched against the full URL; empty means "include everything"
    pub include_patterns: Vec<String>,

    /// Regexes searched against the full URL; a match always rejects
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlRule {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 100,
            max_duration: 3600,
            delay: 1.0,
            concurrent_requests: 5,
            respect_robots: true,
            allow_external_links: false,
            allow_subdomains: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl CrawlRule {
    /// Checks numeric bounds and that every pattern compiles
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.max_pages < 1 {
            return Err(CrawlError::Validation(
                "max-pages must be at least 1".to_string(),
            ));
        }
        if self.max_duration < 1 {
            return Err(CrawlError::Validation(
                "max-duration must be at least 1 second".to_string(),
            ));
        }
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(CrawlError::Validation(format!(
                "delay must be a non-negative number of seconds, got {}",
                self.delay
            )));
        }
        if self.concurrent_requests < 1 || self.concurrent_requests > 100 {
            return Err(CrawlError::Validation(format!(
                "concurrent-requests must be between 1 and 100, got {}",
                self.concurrent_requests
            )));
        }

        engine::compile_patterns(&self.include_patterns)?;
        engine::compile_patterns(&self.exclude_patterns)?;

        Ok(())
    }

    pub fn delay_duration(&self) -> Duration {
        Duration::from_secs_f64(self.delay.max(0.0))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration)
    }
}

/// Why a discovered URL was not enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    DepthExceeded { depth: u32, max_depth: u32 },
    RobotsDisallowed,
    ExternalDomain { host: String },
    Excluded { pattern: String },
    NotIncluded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthExceeded { depth, max_depth } => {
                write!(f, "depth exceeded ({} > {})", depth, max_depth)
            }
            Self::RobotsDisallowed => write!(f, "disallowed by robots.txt"),
            Self::ExternalDomain { host } => write!(f, "external domain {}", host),
            Self::Excluded { pattern } => write!(f, "matched exclude pattern {}", pattern),
            Self::NotIncluded => write!(f, "matched no include pattern"),
        }
    }
}

/// Outcome of an eligibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Accept,
    Reject(RejectReason),
}

impl Eligibility {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Accept => None,
            Self::Reject(reason) => Some(reason),
        }
    }
}

/// Evaluates a single URL against a rule without keeping a compiled engine
///
/// Calls inside a crawl go through [`RuleEngine::evaluate`] instead; this form
/// recompiles the patterns on every call.
///
/// # Examples
///
/// ```
/// use tidecrawl::rules::{is_eligible, CrawlRule, Eligibility};
/// use url::Url;
///
/// let start = Url::parse("https://example.com/").unwrap();
/// let rule = CrawlRule { max_depth: 1, ..CrawlRule::default() };
///
/// let page = Url::parse("https://example.com/about").unwrap();
/// assert_eq!(is_eligible(&page, 1, &rule, &start, None).unwrap(), Eligibility::Accept);
/// assert!(!is_eligible(&page, 2, &rule, &start, None).unwrap().is_accepted());
/// ```
pub fn is_eligible(
    url: &Url,
    depth: u32,
    rule: &CrawlRule,
    start_url: &Url,
    robots: Option<&ParsedRobots>,
) -> Result<Eligibility, CrawlError> {
    let engine = RuleEngine::new(rule, start_url, crate::engine::DEFAULT_USER_AGENT)?;
    Ok(engine.evaluate(url, depth, robots))
}
