//! Scripted fetch engine shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidecrawl::engine::{FetchedPage, PageContent};
use tidecrawl::{
    normalize_url, CrawlRule, Crawler, ExtractionStrategy, FetchEngine, FetchError, FetchOptions,
    Settings,
};
use url::Url;

#[derive(Debug, Clone)]
enum Script {
    Page { links: Vec<String> },
    Fail(FetchError),
    Hang,
}

/// What the engine saw for one fetch
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub url: String,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    pages: HashMap<String, Script>,
    robots: HashMap<String, String>,
    latency: Duration,
    /// Per-URL latency, overriding `latency`
    latencies: HashMap<String, Duration>,
    fetches: Mutex<Vec<FetchRecord>>,
    released: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

fn key(url: &str) -> String {
    normalize_url(url).unwrap().to_string()
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `url` as an HTML page linking to `links`
    pub fn page(mut self, url: &str, links: &[&str]) -> Self {
        self.pages.insert(
            key(url),
            Script::Page {
                links: links.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }

    pub fn fail(mut self, url: &str, error: FetchError) -> Self {
        self.pages.insert(key(url), Script::Fail(error));
        self
    }

    /// Never answers `url`; the fetch timeout has to cut it off
    pub fn hang(mut self, url: &str) -> Self {
        self.pages.insert(key(url), Script::Hang);
        self
    }

    pub fn robots(mut self, robots_url: &str, body: &str) -> Self {
        self.robots.insert(robots_url.to_string(), body.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delays the answer for `url` alone
    pub fn slow(mut self, url: &str, latency: Duration) -> Self {
        self.latencies.insert(key(url), latency);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.url).collect()
    }

    pub fn records(&self) -> Vec<FetchRecord> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchEngine for MockEngine {
    async fn fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
        _extraction: &ExtractionStrategy,
        session_id: Option<&str>,
    ) -> Result<FetchedPage, FetchError> {
        self.fetches.lock().unwrap().push(FetchRecord {
            url: url.to_string(),
            user_agent: options.user_agent.clone(),
            session_id: session_id.map(str::to_string),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let latency = self
            .latencies
            .get(url.as_str())
            .copied()
            .unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let script = self.pages.get(url.as_str()).cloned();
        if matches!(script, Some(Script::Hang)) {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match script {
            Some(Script::Page { links }) => Ok(FetchedPage {
                final_url: url.clone(),
                status_code: 200,
                title: Some(url.path().to_string()),
                content: PageContent {
                    html: format!("<html><body>{}</body></html>", url),
                    text: url.to_string(),
                    markdown: format!("# {}", url),
                },
                links,
                extracted: None,
            }),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hang) => Err(FetchError::Network("hung".to_string())),
            None => Err(FetchError::Http { status: 404 }),
        }
    }

    async fn fetch_robots(&self, robots_url: &Url, _options: &FetchOptions) -> Option<String> {
        self.robots.get(robots_url.as_str()).cloned()
    }

    async fn release_session(&self, session_id: &str) {
        self.released.lock().unwrap().push(session_id.to_string());
    }
}

/// A crawler over `engine` with default settings
pub fn crawler(engine: MockEngine) -> (Crawler, Arc<MockEngine>) {
    let engine = Arc::new(engine);
    let crawler = Crawler::new(Settings::default(), engine.clone());
    (crawler, engine)
}

/// A rule with no politeness delay so tests run fast
pub fn fast_rule() -> CrawlRule {
    CrawlRule {
        delay: 0.0,
        ..CrawlRule::default()
    }
}
