use super::{CrawlRule, Eligibility, RejectReason};
use crate::robots::ParsedRobots;
use crate::url::{extract_domain, is_same_or_subdomain};
use crate::CrawlError;
use regex::Regex;
use url::Url;

/// Compiles a pattern list, naming the offending pattern on failure
pub(super) fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, CrawlError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                CrawlError::Validation(format!("invalid pattern '{}': {}", pattern, e))
            })
        })
        .collect()
}

/// A [`CrawlRule`] bound to its start URL, with patterns compiled
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rule: CrawlRule,
    start_host: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    user_agent: String,
}

impl RuleEngine {
    pub fn new(rule: &CrawlRule, start_url: &Url, user_agent: &str) -> Result<Self, CrawlError> {
        let start_host = extract_domain(start_url).ok_or_else(|| {
            CrawlError::Validation(format!("start URL has no host: {}", start_url))
        })?;

        Ok(Self {
            rule: rule.clone(),
            start_host,
            include: compile_patterns(&rule.include_patterns)?,
            exclude: compile_patterns(&rule.exclude_patterns)?,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn rule(&self) -> &CrawlRule {
        &self.rule
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns true if evaluating a link at `depth` will consult robots rules
    ///
    /// Lets the caller skip fetching robots.txt for links the depth check
    /// already rejects.
    pub fn needs_robots(&self, depth: u32) -> bool {
        self.rule.respect_robots && depth <= self.rule.max_depth
    }

    /// Decides whether `url`, found at `depth`, may join the frontier
    ///
    /// Checks run in a fixed order and the first failure is reported:
    /// depth, robots (when respected), domain, exclude, include. `robots` of
    /// None is treated as allow-all.
    pub fn evaluate(&self, url: &Url, depth: u32, robots: Option<&ParsedRobots>) -> Eligibility {
        if depth > self.rule.max_depth {
            return Eligibility::Reject(RejectReason::DepthExceeded {
                depth,
                max_depth: self.rule.max_depth,
            });
        }

        if self.rule.respect_robots {
            if let Some(robots) = robots {
                if !robots.is_allowed(url.as_str(), &self.user_agent) {
                    return Eligibility::Reject(RejectReason::RobotsDisallowed);
                }
            }
        }

        let host = extract_domain(url).unwrap_or_default();
        if host != self.start_host && !self.rule.allow_external_links {
            let subdomain_ok =
                self.rule.allow_subdomains && is_same_or_subdomain(&host, &self.start_host);
            if !subdomain_ok {
                return Eligibility::Reject(RejectReason::ExternalDomain { host });
            }
        }

        let target = url.as_str();
        if let Some(pattern) = self.exclude.iter().find(|re| re.is_match(target)) {
            return Eligibility::Reject(RejectReason::Excluded {
                pattern: pattern.as_str().to_string(),
            });
        }

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(target)) {
            return Eligibility::Reject(RejectReason::NotIncluded);
        }

        Eligibility::Accept
    }
}
