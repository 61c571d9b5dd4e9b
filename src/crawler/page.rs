//! Fetching a single page into a [`PageResult`]

use super::cache::PageCache;
use crate::engine::{ExtractionStrategy, FetchEngine, FetchError, FetchOptions, FetchedPage};
use crate::jobs::{FetchMetadata, PageError, PageResult};
use crate::output::{self, OutputFormat};
use crate::session::SessionManager;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Everything about a fetch that is fixed for a whole job or batch
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub options: FetchOptions,
    pub extraction: ExtractionStrategy,
    pub output_format: OutputFormat,
    pub session_id: Option<String>,
}

/// A finished fetch: the recorded result plus the failure behind it, if any
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub result: PageResult,
    pub error: Option<FetchError>,
}

/// Runs one engine call with retries, timeout and session binding
#[derive(Clone)]
pub struct PageFetcher {
    engine: Arc<dyn FetchEngine>,
    sessions: Arc<SessionManager>,
    plan: Arc<FetchPlan>,
    cache: Option<PageCache>,
}

impl PageFetcher {
    pub fn new(
        engine: Arc<dyn FetchEngine>,
        sessions: Arc<SessionManager>,
        plan: FetchPlan,
    ) -> Self {
        Self {
            engine,
            sessions,
            plan: Arc::new(plan),
            cache: None,
        }
    }

    /// Reuses unexpired results from `cache` instead of fetching
    ///
    /// Session-bound plans never use the cache, since session state can
    /// change what a page returns.
    pub fn with_cache(mut self, cache: PageCache) -> Self {
        if self.plan.session_id.is_none() {
            self.cache = Some(cache);
        }
        self
    }

    pub fn plan(&self) -> &FetchPlan {
        &self.plan
    }

    /// Options for one fetch, with unset values filled in from the session
    ///
    /// Sessions that expired along the way are released first, so a session
    /// re-created under the same id never inherits stale engine state.
    async fn options_for_fetch(&self) -> FetchOptions {
        let mut options = self.plan.options.clone();
        let Some(session_id) = self.plan.session_id.as_deref() else {
            return options;
        };

        let acquired = self.sessions.acquire(session_id);
        super::release_unreleased(&self.sessions, self.engine.as_ref()).await;
        match acquired {
            Ok(session) => {
                if options.user_agent.is_none() {
                    options.user_agent = session.config.user_agent.clone();
                }
                if options.proxy_url.is_none() {
                    options.proxy_url = session.config.proxy_url.clone();
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Session unavailable, fetching without it");
            }
        }
        options
    }

    /// Fetches `url`; failures become unsuccessful results, never errors
    pub async fn fetch(&self, url: Url, depth: u32, discovered_from: Option<Url>) -> PageOutcome {
        if let Some(mut result) = self.cache.as_ref().and_then(|c| c.lookup(&url, &self.plan)) {
            result.metadata.depth = depth;
            result.metadata.discovered_from = discovered_from.map(|u| u.to_string());
            return PageOutcome {
                result,
                error: None,
            };
        }

        let options = self.options_for_fetch().await;
        let started = Instant::now();
        let max_attempts = options.retries.saturating_add(1);
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            match self.fetch_once(&url, &options).await {
                Ok(page) => break Ok(page),
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    debug!(url = %url, attempt = attempts, error = %e, "Retrying fetch");
                    tokio::time::sleep(options.retry_delay_duration()).await;
                }
                Err(e) => break Err(e),
            }
        };

        let mut metadata = FetchMetadata {
            status_code: None,
            load_time_ms: started.elapsed().as_millis() as u64,
            final_url: None,
            title: None,
            depth,
            discovered_from: discovered_from.map(|u| u.to_string()),
            attempts,
            fetched_at: Utc::now(),
        };

        match outcome {
            Ok(page) => {
                metadata.status_code = Some(page.status_code);
                metadata.final_url = Some(page.final_url.to_string());
                metadata.title = page.title.clone();
                let result = success_result(&url, page, self.plan.output_format, metadata);
                if let Some(cache) = &self.cache {
                    cache.store(&url, &self.plan, &result);
                }
                PageOutcome {
                    result,
                    error: None,
                }
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Fetch failed");
                metadata.status_code = e.status_code();
                PageOutcome {
                    result: PageResult {
                        url: url.to_string(),
                        success: false,
                        content: None,
                        extracted: None,
                        links: Vec::new(),
                        error: Some(PageError {
                            kind: e.kind(),
                            message: e.to_string(),
                        }),
                        metadata,
                    },
                    error: Some(e),
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url, options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        let request = self.engine.fetch(
            url,
            options,
            &self.plan.extraction,
            self.plan.session_id.as_deref(),
        );
        match tokio::time::timeout(options.timeout_duration(), request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                seconds: options.timeout,
            }),
        }
    }
}

fn success_result(
    url: &Url,
    page: FetchedPage,
    format: OutputFormat,
    metadata: FetchMetadata,
) -> PageResult {
    let content = output::render(format, &page);
    PageResult {
        url: url.to_string(),
        success: true,
        content: Some(content),
        extracted: page.extracted,
        links: page.links,
        error: None,
        metadata,
    }
}
