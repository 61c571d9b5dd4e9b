//! reqwest-backed fetch engine
//!
//! Retrieves pages over plain HTTP without rendering. JavaScript-dependent
//! pages come back as served; `wait_for` and `headless` are ignored.

use super::parser::{extract_css, parse_html};
use super::{
    validate_proxy_url, ExtractionStrategy, FetchEngine, FetchError, FetchOptions, FetchedPage,
    PageContent, DEFAULT_USER_AGENT,
};
use crate::CrawlError;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect::Policy, Client, Proxy};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Fetch engine speaking HTTP through a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: Client,
    user_agent: String,
}

impl HttpEngine {
    /// Builds an engine whose client identifies itself as `user_agent`
    pub fn new(user_agent: Option<&str>) -> Result<Self, CrawlError> {
        let user_agent = user_agent.unwrap_or(DEFAULT_USER_AGENT).to_string();
        let client = build_http_client(&user_agent, None)?;
        Ok(Self { client, user_agent })
    }

    /// Returns the shared client, or a one-off client routed through the proxy
    fn client_for(&self, options: &FetchOptions) -> Result<Client, FetchError> {
        match &options.proxy_url {
            None => Ok(self.client.clone()),
            Some(proxy) => build_http_client(&self.user_agent, Some(proxy))
                .map_err(|e| FetchError::Network(e.to_string())),
        }
    }
}

/// Builds an HTTP client with the crawler's identity and transport settings
pub fn build_http_client(user_agent: &str, proxy: Option<&str>) -> Result<Client, CrawlError> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        validate_proxy_url(proxy)?;
        let proxy = Proxy::all(proxy)
            .map_err(|e| CrawlError::Validation(format!("invalid proxy: {}", e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| CrawlError::Internal(format!("failed to build HTTP client: {}", e)))
}

/// Maps a reqwest failure onto the fetch error taxonomy
fn classify_error(error: reqwest::Error, timeout_secs: u64) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            seconds: timeout_secs,
        }
    } else if error.is_connect() {
        FetchError::Network(format!("connection failed: {}", error))
    } else if let Some(status) = error.status() {
        FetchError::Http {
            status: status.as_u16(),
        }
    } else {
        FetchError::Network(error.to_string())
    }
}

#[async_trait]
impl FetchEngine for HttpEngine {
    async fn fetch(
        &self,
        url: &Url,
        options: &FetchOptions,
        extraction: &ExtractionStrategy,
        session_id: Option<&str>,
    ) -> Result<FetchedPage, FetchError> {
        if let ExtractionStrategy::Llm { model, .. } = extraction {
            return Err(FetchError::Extraction(format!(
                "llm extraction with {} needs an llm-capable engine",
                model
            )));
        }

        let client = self.client_for(options)?;
        let mut request = client.get(url.clone()).timeout(options.timeout_duration());
        if let Some(agent) = &options.user_agent {
            request = request.header(USER_AGENT, agent.as_str());
        }

        debug!(url = %url, session_id = ?session_id, "GET");
        let response = request
            .send()
            .await
            .map_err(|e| classify_error(e, options.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| classify_error(e, options.timeout))?;

        let is_html = content_type.is_empty() || content_type.contains("html");
        if !is_html {
            return Ok(FetchedPage {
                final_url,
                status_code: status.as_u16(),
                title: None,
                content: PageContent {
                    html: String::new(),
                    text: body.clone(),
                    markdown: body,
                },
                links: Vec::new(),
                extracted: None,
            });
        }

        let extracted = match extraction {
            ExtractionStrategy::Css { selectors } => Some(extract_css(&body, selectors)?),
            _ => None,
        };
        let parsed = parse_html(&body, &final_url);

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            title: parsed.title,
            content: PageContent {
                html: body,
                text: parsed.text,
                markdown: parsed.markdown,
            },
            links: parsed.links,
            extracted,
        })
    }

    async fn fetch_robots(&self, robots_url: &Url, options: &FetchOptions) -> Option<String> {
        let client = self.client_for(options).ok()?;
        let response = client
            .get(robots_url.clone())
            .timeout(options.timeout_duration())
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            debug!(url = %robots_url, status = response.status().as_u16(), "no robots.txt");
            return None;
        }

        response.text().await.ok()
    }
}
