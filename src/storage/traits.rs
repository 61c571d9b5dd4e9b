//! Storage trait and error types

use crate::jobs::{CrawlJob, JobSnapshot, PageResult};
use crate::session::BrowserSession;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Write-through persistence hook
///
/// Implementations must be shareable across tasks; calls are short and
/// synchronous.
pub trait Storage: Send + Sync {
    // ===== Jobs =====

    /// Inserts or replaces the job row (results are stored separately)
    fn save_job(&self, job: &CrawlJob, cancel_requested: bool) -> StorageResult<()>;

    fn load_job(&self, job_id: &str) -> StorageResult<Option<JobSnapshot>>;

    /// All persisted jobs, newest first
    fn list_jobs(&self) -> StorageResult<Vec<JobSnapshot>>;

    /// Deletes terminal jobs (and their pages) completed before `cutoff`
    ///
    /// Returns the ids deleted.
    fn delete_jobs_completed_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>>;

    // ===== Page results =====

    /// Appends one page result at position `sequence` of the job
    fn append_page(&self, job_id: &str, sequence: usize, page: &PageResult) -> StorageResult<()>;

    /// Page results of a job in recorded order
    fn load_pages(&self, job_id: &str) -> StorageResult<Vec<PageResult>>;

    // ===== Sessions =====

    fn save_session(&self, session: &BrowserSession) -> StorageResult<()>;

    fn delete_session(&self, session_id: &str) -> StorageResult<()>;

    fn load_sessions(&self) -> StorageResult<Vec<BrowserSession>>;

    // ===== Page cache =====

    /// The cached result under `key` if it has not expired at `now`
    fn load_cached_page(&self, key: &str, now: DateTime<Utc>) -> StorageResult<Option<PageResult>>;

    /// Stores `page` under `key` until `expires_at`, replacing any older entry
    fn store_cached_page(
        &self,
        key: &str,
        page: &PageResult,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Drops entries expired at `now`; returns how many were removed
    fn cleanup_expired_cache(&self, now: DateTime<Utc>) -> StorageResult<usize>;
}
