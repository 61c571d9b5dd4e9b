//! Time-limited reuse of successful page results

use super::page::FetchPlan;
use crate::jobs::PageResult;
use crate::storage::Storage;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Ten years; longer TTLs are clamped
const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// Page results cached in storage, keyed by URL and extraction settings
///
/// Storage failures only cost a refetch; they are logged and never fail the
/// fetch.
#[derive(Clone)]
pub struct PageCache {
    storage: Arc<dyn Storage>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(storage: Arc<dyn Storage>, ttl_seconds: u64) -> Self {
        let ttl = Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64);
        Self { storage, ttl }
    }

    /// Cache key for `url` fetched under `plan`
    ///
    /// Options that change what comes back (extraction, output format) are
    /// part of the key; transport options are not.
    pub fn key(url: &Url, plan: &FetchPlan) -> String {
        let material = serde_json::json!({
            "url": url.as_str(),
            "extraction": plan.extraction,
            "format": plan.output_format,
        });
        let digest = Sha256::digest(material.to_string().as_bytes());
        let mut key = hex::encode(digest);
        key.truncate(32);
        key
    }

    pub fn lookup(&self, url: &Url, plan: &FetchPlan) -> Option<PageResult> {
        let key = Self::key(url, plan);
        match self.storage.load_cached_page(&key, Utc::now()) {
            Ok(Some(result)) => {
                debug!(url = %url, "Cache hit");
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read page cache");
                None
            }
        }
    }

    /// Stores a successful result; failed results are never cached
    pub fn store(&self, url: &Url, plan: &FetchPlan, result: &PageResult) {
        if !result.success {
            return;
        }
        let key = Self::key(url, plan);
        let expires_at = Utc::now() + self.ttl;
        if let Err(e) = self.storage.store_cached_page(&key, result, expires_at) {
            warn!(url = %url, error = %e, "Failed to write page cache");
        }
    }

    /// Drops expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        match self.storage.cleanup_expired_cache(Utc::now()) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Failed to clean page cache");
                0
            }
        }
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish()
    }
}
