//! Crawl orchestration
//!
//! This module contains the core crawling logic, including:
//! - Single page scrapes and batches of independent URLs
//! - Breadth-first crawls driven by a dispatch loop
//! - The concurrency-bounded executor both of them share
//!
//! [`Crawler`] is the explicitly constructed context holding the fetch
//! engine, the session manager and the job store.

mod cache;
mod executor;
mod frontier;
mod page;
mod traversal;

pub use cache::PageCache;
pub use executor::{ExecuteError, Executor, Slot};
pub use frontier::{Frontier, FrontierEntry, Offer};
pub use page::{FetchPlan, PageFetcher, PageOutcome};

use crate::config::{compute_settings_hash, Settings};
use crate::engine::{ExtractionStrategy, FetchEngine, FetchOptions, HttpEngine};
use crate::jobs::{CrawlJob, JobSnapshot, JobStatistics, JobStatus, JobStore, PageResult};
use crate::output::OutputFormat;
use crate::rules::{CrawlRule, RuleEngine};
use crate::session::{BrowserSession, SessionConfig, SessionManager, SessionStatistics};
use crate::storage::{open_storage, Storage};
use crate::url::normalize_url;
use crate::CrawlError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use traversal::Traversal;
use url::Url;

/// A century; longer retentions are clamped
const MAX_RETENTION_SECONDS: u64 = 100 * 365 * 24 * 3600;

/// Parameters of one crawl
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub start_url: String,
    pub rule: CrawlRule,
    pub options: FetchOptions,
    pub extraction: ExtractionStrategy,
    pub output_format: OutputFormat,
    pub session_id: Option<String>,
    pub store_results: bool,
}

impl CrawlRequest {
    /// A request with default rule and options
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            rule: CrawlRule::default(),
            options: FetchOptions::default(),
            extraction: ExtractionStrategy::None,
            output_format: OutputFormat::default(),
            session_id: None,
            store_results: true,
        }
    }

    pub fn with_rule(mut self, rule: CrawlRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extraction(mut self, extraction: ExtractionStrategy) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_store_results(mut self, store_results: bool) -> Self {
        self.store_results = store_results;
        self
    }
}

/// Parameters of one batch of independent URLs
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub options: FetchOptions,
    pub extraction: ExtractionStrategy,
    pub output_format: OutputFormat,
    pub session_id: Option<String>,
    pub max_concurrent: usize,
    /// Seconds a slot waits after a fetch before taking the next URL
    pub delay: f64,
    pub continue_on_error: bool,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            options: FetchOptions::default(),
            extraction: ExtractionStrategy::None,
            output_format: OutputFormat::default(),
            session_id: None,
            max_concurrent: 5,
            delay: 0.0,
            continue_on_error: true,
        }
    }
}

impl BatchRequest {
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extraction(mut self, extraction: ExtractionStrategy) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    fn validate(&self) -> Result<(), CrawlError> {
        if self.max_concurrent < 1 || self.max_concurrent > 100 {
            return Err(CrawlError::Validation(format!(
                "max-concurrent must be between 1 and 100, got {}",
                self.max_concurrent
            )));
        }
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(CrawlError::Validation(format!(
                "batch delay must be a non-negative number of seconds, got {}",
                self.delay
            )));
        }
        self.options.validate()?;
        self.extraction.validate()
    }
}

/// Orchestration context shared by every scrape, batch and crawl
///
/// Cloning is cheap; clones share the same engine, sessions and jobs.
#[derive(Clone)]
pub struct Crawler {
    engine: Arc<dyn FetchEngine>,
    sessions: Arc<SessionManager>,
    jobs: Arc<JobStore>,
    storage: Option<Arc<dyn Storage>>,
    settings: Arc<Settings>,
}

impl Crawler {
    /// Creates an in-memory crawler around `engine`
    pub fn new(settings: Settings, engine: Arc<dyn FetchEngine>) -> Self {
        let sessions = SessionManager::new(
            settings.browser.clone(),
            settings.storage.session_timeout,
        );
        Self {
            engine,
            sessions: Arc::new(sessions),
            jobs: Arc::new(JobStore::new()),
            storage: None,
            settings: Arc::new(settings),
        }
    }

    /// Creates a crawler that writes jobs and sessions through to `storage`
    pub fn with_storage(
        settings: Settings,
        engine: Arc<dyn FetchEngine>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let sessions = SessionManager::new(
            settings.browser.clone(),
            settings.storage.session_timeout,
        )
        .with_storage(storage.clone());
        Self {
            engine,
            sessions: Arc::new(sessions),
            jobs: Arc::new(JobStore::with_storage(storage.clone())),
            storage: Some(storage),
            settings: Arc::new(settings),
        }
    }

    /// Builds the default HTTP engine and, if configured, SQLite storage
    pub fn from_settings(settings: Settings) -> Result<Self, CrawlError> {
        let engine: Arc<dyn FetchEngine> =
            Arc::new(HttpEngine::new(Some(&settings.scrape.user_agent))?);

        match settings.storage.database_path.clone() {
            Some(path) => {
                let hash = compute_settings_hash(&settings);
                let storage = open_storage(&path)?.with_settings_hash(hash);
                info!("Using database at {}", path.display());
                Ok(Self::with_storage(settings, engine, Arc::new(storage)))
            }
            None => Ok(Self::new(settings, engine)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// A crawl request filled in from the configured defaults
    pub fn crawl_request(&self, start_url: impl Into<String>) -> CrawlRequest {
        CrawlRequest::new(start_url)
            .with_rule(self.settings.crawl.clone())
            .with_options(self.settings.fetch_options())
            .with_output_format(self.settings.scrape.output_format)
            .with_store_results(self.settings.storage.store_results)
    }

    /// A batch request filled in from the configured defaults
    pub fn batch_request(&self) -> BatchRequest {
        let batch = &self.settings.batch;
        BatchRequest {
            options: self.settings.fetch_options(),
            extraction: ExtractionStrategy::None,
            output_format: self.settings.scrape.output_format,
            session_id: None,
            max_concurrent: batch.max_concurrent,
            delay: batch.delay,
            continue_on_error: batch.continue_on_error,
        }
    }

    fn page_cache(&self) -> Option<PageCache> {
        let scrape = &self.settings.scrape;
        if !scrape.cache_enabled {
            return None;
        }
        let storage = self.storage.clone()?;
        Some(PageCache::new(storage, scrape.cache_ttl))
    }

    fn fetcher(&self, plan: FetchPlan) -> PageFetcher {
        let fetcher = PageFetcher::new(self.engine.clone(), self.sessions.clone(), plan);
        match self.page_cache() {
            Some(cache) => fetcher.with_cache(cache),
            None => fetcher,
        }
    }

    /// Fetches one URL without following links
    ///
    /// Fetch failures come back as a result with `success == false`; only
    /// invalid input is an error.
    pub async fn scrape_single(
        &self,
        url: &str,
        options: &FetchOptions,
        extraction: &ExtractionStrategy,
        output_format: OutputFormat,
        session_id: Option<&str>,
    ) -> Result<PageResult, CrawlError> {
        let url = normalize_url(url)?;
        options.validate()?;
        extraction.validate()?;

        let fetcher = self.fetcher(FetchPlan {
            options: options.clone(),
            extraction: extraction.clone(),
            output_format,
            session_id: session_id.map(str::to_string),
        });

        debug!(url = %url, "Scraping single page");
        Ok(fetcher.fetch(url, 0, None).await.result)
    }

    /// Fetches every valid URL in `urls`, returning results in input order
    ///
    /// Invalid URLs are skipped with a warning. With `continue_on_error`
    /// disabled the first failed fetch is returned as `CrawlError::Fetch`.
    pub async fn scrape_batch(
        &self,
        urls: &[String],
        request: BatchRequest,
    ) -> Result<Vec<PageResult>, CrawlError> {
        request.validate()?;

        let valid: Vec<Url> = urls
            .iter()
            .filter_map(|raw| match normalize_url(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(url = %raw, error = %e, "Skipping invalid URL");
                    None
                }
            })
            .collect();

        if valid.is_empty() {
            return Err(CrawlError::Validation(
                "batch contains no valid URLs".to_string(),
            ));
        }

        info!(
            urls = valid.len(),
            skipped = urls.len() - valid.len(),
            concurrency = request.max_concurrent,
            "Starting batch"
        );

        let executor = Executor::new(
            request.max_concurrent,
            Duration::from_secs_f64(request.delay),
        );
        let fetcher = self.fetcher(FetchPlan {
            options: request.options,
            extraction: request.extraction,
            output_format: request.output_format,
            session_id: request.session_id,
        });

        let outcomes = executor
            .execute(valid, request.continue_on_error, |url| {
                let fetcher = fetcher.clone();
                async move {
                    let outcome = fetcher.fetch(url, 0, None).await;
                    match outcome.error {
                        Some(error) => Err((outcome.result, error)),
                        None => Ok(outcome.result),
                    }
                }
            })
            .await
            .map_err(|e| match e {
                ExecuteError::Failed((result, source)) => CrawlError::Fetch {
                    url: result.url,
                    source,
                },
                ExecuteError::Internal(msg) => CrawlError::Internal(msg),
            })?;

        let results: Vec<PageResult> = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                Ok(result) | Err((result, _)) => result,
            })
            .collect();

        let failed = results.iter().filter(|r| !r.success).count();
        info!(total = results.len(), failed, "Batch finished");
        Ok(results)
    }

    /// Runs a crawl to completion and returns its job id
    pub async fn start_crawl(&self, request: CrawlRequest) -> Result<String, CrawlError> {
        let prepared = self.prepare_crawl(request)?;
        let job_id = prepared.job_id.clone();
        self.run_job(prepared).await;
        Ok(job_id)
    }

    /// Submits a crawl and returns its job id without waiting
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_crawl_async(&self, request: CrawlRequest) -> Result<String, CrawlError> {
        let prepared = self.prepare_crawl(request)?;
        let job_id = prepared.job_id.clone();
        let crawler = self.clone();
        tokio::spawn(async move { crawler.run_job(prepared).await });
        Ok(job_id)
    }

    fn prepare_crawl(&self, request: CrawlRequest) -> Result<PreparedCrawl, CrawlError> {
        let seed = normalize_url(&request.start_url)?;
        request.rule.validate()?;
        request.options.validate()?;
        request.extraction.validate()?;
        let rules = RuleEngine::new(
            &request.rule,
            &seed,
            request.options.effective_user_agent(),
        )?;

        let mut job = CrawlJob::new(seed.as_str(), request.rule);
        job.options = request.options.clone();
        job.extraction = request.extraction.clone();
        job.output_format = request.output_format;
        job.session_id = request.session_id.clone();
        job.store_results = request.store_results;
        let job_id = self.jobs.submit(job)?;

        Ok(PreparedCrawl {
            job_id,
            seed,
            rules,
            plan: FetchPlan {
                options: request.options,
                extraction: request.extraction,
                output_format: request.output_format,
                session_id: request.session_id,
            },
        })
    }

    async fn run_job(&self, prepared: PreparedCrawl) {
        let PreparedCrawl {
            job_id,
            seed,
            rules,
            plan,
        } = prepared;

        if let Err(e) = self.jobs.transition(&job_id, JobStatus::Running, None) {
            warn!(job_id = %job_id, error = %e, "Crawl not started");
            return;
        }
        info!(job_id = %job_id, url = %seed, max_depth = rules.rule().max_depth, max_pages = rules.rule().max_pages, "Starting crawl");

        let traversal = Traversal::new(
            job_id.clone(),
            self.jobs.clone(),
            self.engine.clone(),
            self.fetcher(plan),
            rules,
        );

        let transition = match traversal.run(seed).await {
            Ok(status) => self.jobs.transition(&job_id, status, None),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Crawl failed");
                self.jobs
                    .transition(&job_id, JobStatus::Failed, Some(e.to_string()))
            }
        };
        if let Err(e) = transition {
            error!(job_id = %job_id, error = %e, "Failed to record crawl outcome");
        }

        if let Some(snapshot) = self.jobs.get_status(&job_id) {
            info!(
                job_id = %job_id,
                status = %snapshot.status,
                pages_crawled = snapshot.counters.pages_crawled,
                pages_failed = snapshot.counters.pages_failed,
                "Crawl finished in {:.2}s",
                snapshot.elapsed_seconds
            );
        }
    }

    pub fn get_crawl_status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.get_status(job_id)
    }

    pub fn get_crawl_results(&self, job_id: &str) -> Vec<PageResult> {
        self.jobs.get_results(job_id)
    }

    /// Requests cancellation; false if the job is unknown or already finished
    pub fn cancel_crawl(&self, job_id: &str) -> bool {
        let cancelled = self.jobs.cancel(job_id);
        if cancelled {
            info!(job_id = %job_id, "Cancellation requested");
        }
        cancelled
    }

    /// Waits for a job to reach a terminal status
    pub async fn wait_for_crawl(&self, job_id: &str) -> Option<JobSnapshot> {
        match self.jobs.wait_for_terminal(job_id).await {
            Some(snapshot) => Some(snapshot),
            None => self.jobs.get_status(job_id),
        }
    }

    /// Jobs in memory followed by persisted jobs from earlier processes
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs = self.jobs.list();
        if let Some(storage) = &self.storage {
            match storage.list_jobs() {
                Ok(stored) => {
                    let known: HashSet<String> = jobs.iter().map(|j| j.id.clone()).collect();
                    jobs.extend(stored.into_iter().filter(|j| !known.contains(&j.id)));
                }
                Err(e) => warn!(error = %e, "Failed to list persisted jobs"),
            }
        }
        jobs
    }

    /// Counts over every known job, persisted ones included
    pub fn get_job_statistics(&self) -> JobStatistics {
        JobStatistics::from_snapshots(&self.list_jobs())
    }

    /// Deletes terminal jobs older than `older_than`, or the configured
    /// retention when None
    pub fn cleanup_completed_jobs(&self, older_than: Option<chrono::Duration>) -> usize {
        let retention = older_than.unwrap_or_else(|| {
            let seconds = self.settings.storage.job_retention.min(MAX_RETENTION_SECONDS);
            chrono::Duration::seconds(seconds as i64)
        });
        let removed = self.jobs.cleanup_completed_jobs(retention);
        if removed > 0 {
            info!(removed, "Removed completed jobs");
        }
        removed
    }

    /// Drops expired page cache entries; zero without storage
    pub fn cleanup_expired_cache(&self) -> usize {
        match &self.storage {
            Some(storage) => PageCache::new(storage.clone(), self.settings.scrape.cache_ttl)
                .cleanup_expired(),
            None => 0,
        }
    }

    pub fn create_session(
        &self,
        config: Option<SessionConfig>,
        id: Option<&str>,
        timeout_seconds: Option<u64>,
    ) -> Result<String, CrawlError> {
        self.sessions.create_session(config, id, timeout_seconds)
    }

    /// Returns an active session; one found expired is released and None returned
    pub async fn get_session(&self, id: &str) -> Option<BrowserSession> {
        let session = self.sessions.get_session(id);
        if session.is_none() {
            self.release_expired_sessions().await;
        }
        session
    }

    pub fn list_sessions(&self, include_inactive: bool) -> Vec<BrowserSession> {
        self.sessions.list_sessions(include_inactive)
    }

    pub fn update_session_state(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CrawlError> {
        self.sessions.update_session_state(id, key, value)
    }

    /// Closes a session and releases the engine's resources for it
    pub async fn close_session(&self, id: &str) -> bool {
        let closed = self.sessions.close_session(id);
        if closed {
            self.engine.release_session(id).await;
        }
        closed
    }

    /// Closes idle sessions and releases their engine resources
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let expired = self.sessions.expire_idle(chrono::Utc::now());
        for id in &expired {
            self.engine.release_session(id).await;
        }
        self.release_expired_sessions().await;
        expired.len()
    }

    /// Releases engine resources of sessions that expired on access
    pub async fn release_expired_sessions(&self) -> usize {
        release_unreleased(&self.sessions, self.engine.as_ref()).await
    }

    pub fn get_session_statistics(&self) -> SessionStatistics {
        self.sessions.get_session_statistics()
    }

    /// Sessions recorded in storage, including ones from earlier processes
    pub fn stored_sessions(&self) -> Result<Vec<BrowserSession>, CrawlError> {
        match &self.storage {
            Some(storage) => Ok(storage.load_sessions()?),
            None => Ok(self.sessions.list_sessions(false)),
        }
    }

    /// Runs [`Crawler::cleanup_expired_sessions`] and
    /// [`Crawler::cleanup_expired_cache`] every `interval`
    pub fn spawn_session_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let crawler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let closed = crawler.cleanup_expired_sessions().await;
                if closed > 0 {
                    debug!(closed, "Session sweep closed idle sessions");
                }
                let expired = crawler.cleanup_expired_cache();
                if expired > 0 {
                    debug!(expired, "Sweep dropped expired cache entries");
                }
            }
        })
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("sessions", &self.sessions)
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

/// Hands every queued expired session to the engine for release
pub(crate) async fn release_unreleased(sessions: &SessionManager, engine: &dyn FetchEngine) -> usize {
    let ids = sessions.take_unreleased();
    for id in &ids {
        debug!(session_id = %id, "Releasing expired session");
        engine.release_session(id).await;
    }
    ids.len()
}

struct PreparedCrawl {
    job_id: String,
    seed: Url,
    rules: RuleEngine,
    plan: FetchPlan,
}
