//! Browser session tracking
//!
//! A session is a reusable engine-side handle (cookies, auth state) that
//! several fetches share. The manager here only does bookkeeping: ids,
//! configuration, access times, and idle expiry. Engines free their own
//! resources through [`crate::engine::FetchEngine::release_session`].

mod manager;

pub use manager::SessionManager;

use crate::CrawlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

/// Browser configuration a session is opened with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    pub browser_type: BrowserType,
    pub headless: bool,
    /// Page load timeout in seconds
    pub timeout: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
    pub proxy_url: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser_type: BrowserType::Chromium,
            headless: true,
            timeout: 30,
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: None,
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.timeout < 1 || self.timeout > 300 {
            return Err(CrawlError::Validation(format!(
                "session timeout must be between 1 and 300 seconds, got {}",
                self.timeout
            )));
        }
        if !(100..=7680).contains(&self.viewport_width)
            || !(100..=4320).contains(&self.viewport_height)
        {
            return Err(CrawlError::Validation(format!(
                "viewport {}x{} is out of range",
                self.viewport_width, self.viewport_height
            )));
        }
        if let Some(proxy) = &self.proxy_url {
            crate::engine::validate_proxy_url(proxy)?;
        }
        if self.proxy_password.is_some() && self.proxy_username.is_none() {
            return Err(CrawlError::Validation(
                "proxy-password requires proxy-username".to_string(),
            ));
        }
        Ok(())
    }
}

/// One tracked session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserSession {
    pub id: String,
    pub config: SessionConfig,
    /// Idle seconds after which the session expires
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Pages fetched through this session
    pub page_count: u64,
    pub active: bool,
    /// Opaque engine state (cookies, tokens) keyed by name
    pub state: BTreeMap<String, serde_json::Value>,
}

impl BrowserSession {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }

    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_accessed).num_seconds().max(0)
    }

    /// True once idle time strictly exceeds the session timeout
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.idle_seconds(now) > self.timeout_seconds as i64
    }
}

/// Per-session figures in [`SessionStatistics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub active: bool,
    pub age_seconds: i64,
    pub idle_seconds: i64,
    pub page_count: u64,
    pub browser_type: BrowserType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub total_active: usize,
    pub total_created: u64,
    pub total_closed: u64,
    pub sessions: Vec<SessionDetail>,
}
