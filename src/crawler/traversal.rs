//! Breadth-first dispatch loop for one crawl job
//!
//! The loop owns the frontier, the robots cache and the running counters.
//! Fetch tasks only hand back their outcome; every mutation happens here.

use super::executor::Executor;
use super::frontier::{Frontier, FrontierEntry, Offer};
use super::page::{PageFetcher, PageOutcome};
use crate::engine::FetchEngine;
use crate::jobs::{CrawlCounters, JobStatus, JobStore};
use crate::robots::{origin_key, robots_url, ParsedRobots, RobotsCache};
use crate::rules::{Eligibility, RuleEngine};
use crate::url::normalize_url;
use crate::CrawlError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Why dispatch stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    MaxPages,
    MaxDuration,
}

pub struct Traversal {
    job_id: String,
    jobs: Arc<JobStore>,
    engine: Arc<dyn FetchEngine>,
    fetcher: PageFetcher,
    rules: RuleEngine,
}

impl Traversal {
    pub fn new(
        job_id: String,
        jobs: Arc<JobStore>,
        engine: Arc<dyn FetchEngine>,
        fetcher: PageFetcher,
        rules: RuleEngine,
    ) -> Self {
        Self {
            job_id,
            jobs,
            engine,
            fetcher,
            rules,
        }
    }

    /// Crawls from `seed` until a stop condition or an empty frontier
    ///
    /// Returns the terminal status to record: cancelled if a cancellation
    /// was requested, completed otherwise. Errors are internal faults that
    /// should fail the job.
    pub async fn run(self, seed: Url) -> Result<JobStatus, CrawlError> {
        let started = Instant::now();
        let rule = self.rules.rule().clone();
        let deadline = started
            .checked_add(rule.max_duration())
            .unwrap_or_else(|| started + Duration::from_secs(u64::from(u32::MAX)));

        let mut frontier = Frontier::seeded(seed.clone());
        let mut robots = RobotsCache::new();
        let mut counters = CrawlCounters {
            urls_queued: 1,
            ..CrawlCounters::default()
        };
        self.jobs.publish_counters(&self.job_id, counters)?;

        let mut delay = rule.delay_duration();
        if rule.respect_robots {
            let seed_robots = self.robots_for(&seed, &mut robots).await;
            if let Some(crawl_delay) = seed_robots.crawl_delay(self.rules.user_agent()) {
                let crawl_delay = Duration::from_secs_f64(crawl_delay);
                if crawl_delay > delay {
                    debug!(job_id = %self.job_id, delay_secs = crawl_delay.as_secs_f64(), "Using robots.txt crawl delay");
                    delay = crawl_delay;
                }
            }
        }

        let executor = Executor::new(rule.concurrent_requests, delay);
        let mut tasks: JoinSet<(FrontierEntry, PageOutcome)> = JoinSet::new();
        let mut dispatched: u32 = 0;
        let mut stop: Option<StopReason> = None;

        loop {
            if stop.is_none() {
                stop = self.check_stop(dispatched, rule.max_pages, deadline);
                if let Some(reason) = stop {
                    debug!(job_id = %self.job_id, reason = ?reason, in_flight = tasks.len(), "Dispatch stopped");
                }
            }

            let can_dispatch = stop.is_none() && !frontier.is_empty();
            if !can_dispatch && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let (entry, outcome) = joined.map_err(|e| {
                        CrawlError::Internal(format!("fetch task failed: {}", e))
                    })?;
                    self.complete(entry, outcome, &mut frontier, &mut robots, &mut counters)
                        .await?;
                }

                slot = executor.reserve(), if can_dispatch => {
                    let slot = slot?;
                    if self.check_stop(dispatched, rule.max_pages, deadline).is_some() {
                        continue;
                    }
                    let Some(entry) = frontier.pop()? else {
                        continue;
                    };

                    dispatched += 1;
                    counters.current_depth = counters.current_depth.max(entry.depth);
                    counters.urls_queued = frontier.len() as u64;
                    self.jobs.publish_counters(&self.job_id, counters)?;

                    debug!(job_id = %self.job_id, url = %entry.url, depth = entry.depth, "Dispatching fetch");
                    let fetcher = self.fetcher.clone();
                    executor.spawn(slot, &mut tasks, async move {
                        let outcome = fetcher
                            .fetch(entry.url.clone(), entry.depth, entry.discovered_from.clone())
                            .await;
                        (entry, outcome)
                    });
                }

                _ = tokio::time::sleep_until(deadline), if stop.is_none() => {}
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            job_id = %self.job_id,
            pages_crawled = counters.pages_crawled,
            pages_failed = counters.pages_failed,
            urls_discovered = counters.urls_discovered,
            elapsed_secs = elapsed,
            "Traversal finished"
        );

        if self.jobs.is_cancel_requested(&self.job_id) {
            Ok(JobStatus::Cancelled)
        } else {
            Ok(JobStatus::Completed)
        }
    }

    fn check_stop(&self, dispatched: u32, max_pages: u32, deadline: Instant) -> Option<StopReason> {
        if self.jobs.is_cancel_requested(&self.job_id) {
            Some(StopReason::Cancelled)
        } else if dispatched >= max_pages {
            Some(StopReason::MaxPages)
        } else if Instant::now() >= deadline {
            Some(StopReason::MaxDuration)
        } else {
            None
        }
    }

    /// Records a finished fetch and feeds its links into the frontier
    async fn complete(
        &self,
        entry: FrontierEntry,
        outcome: PageOutcome,
        frontier: &mut Frontier,
        robots: &mut RobotsCache,
        counters: &mut CrawlCounters,
    ) -> Result<(), CrawlError> {
        counters.pages_crawled += 1;
        if outcome.result.success {
            counters.pages_successful += 1;
        } else {
            counters.pages_failed += 1;
        }

        if outcome.result.success {
            let child_depth = entry.depth.saturating_add(1);
            for link in &outcome.result.links {
                let Ok(url) = normalize_url(link) else {
                    continue;
                };
                let offer = frontier.offer(&url, child_depth);
                match offer {
                    Offer::Seen => continue,
                    Offer::New => counters.urls_discovered += 1,
                    Offer::Reconsider => {}
                }

                let parsed = if self.rules.needs_robots(child_depth) {
                    Some(self.robots_for(&url, robots).await)
                } else {
                    None
                };

                match self.rules.evaluate(&url, child_depth, parsed.as_ref()) {
                    Eligibility::Accept => {
                        if offer == Offer::Reconsider {
                            debug!(job_id = %self.job_id, url = %url, depth = child_depth, "Accepted link found again at a shallower depth");
                            counters.urls_rejected = counters.urls_rejected.saturating_sub(1);
                        }
                        frontier.push(FrontierEntry {
                            url,
                            depth: child_depth,
                            discovered_from: Some(entry.url.clone()),
                        });
                    }
                    Eligibility::Reject(reason) => {
                        debug!(job_id = %self.job_id, url = %url, depth = child_depth, reason = %reason, "Rejected link");
                        frontier.reject(&url, child_depth, &reason);
                        if offer == Offer::New {
                            counters.urls_rejected += 1;
                        }
                    }
                }
            }
        }

        counters.urls_queued = frontier.len() as u64;
        self.jobs.record_page(&self.job_id, outcome.result, *counters)?;

        if counters.pages_crawled % 10 == 0 {
            info!(
                job_id = %self.job_id,
                "Progress: {} pages crawled, {} in frontier, {} failed",
                counters.pages_crawled,
                frontier.len(),
                counters.pages_failed
            );
        }
        Ok(())
    }

    /// Robots rules for the origin of `url`, fetched on first use
    async fn robots_for(&self, url: &Url, cache: &mut RobotsCache) -> ParsedRobots {
        let origin = origin_key(url);
        if let Some(parsed) = cache.get(&origin) {
            return parsed.clone();
        }

        let parsed = match robots_url(url) {
            Some(location) => {
                match self
                    .engine
                    .fetch_robots(&location, &self.fetcher.plan().options)
                    .await
                {
                    Some(body) => ParsedRobots::from_content(&body),
                    None => ParsedRobots::allow_all(),
                }
            }
            None => ParsedRobots::allow_all(),
        };

        debug!(job_id = %self.job_id, origin = %origin, permissive = parsed.is_permissive(), "Loaded robots.txt");
        cache.insert(origin, parsed.clone());
        parsed
    }
}
