use crate::engine::{ExtractionStrategy, FetchOptions};
use crate::output::OutputFormat;
use crate::rules::CrawlRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a crawl job
///
/// `pending → running → {completed | failed | cancelled}`; a pending job may
/// also be cancelled or failed before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Cancelled | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            _ => false,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Progress counters for one crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCounters {
    /// Completed fetch attempts, successful or not
    pub pages_crawled: u64,
    pub pages_successful: u64,
    pub pages_failed: u64,
    /// Distinct links seen for the first time, accepted or rejected
    pub urls_discovered: u64,
    /// Entries currently waiting in the frontier
    pub urls_queued: u64,
    /// Links the rule engine turned away
    pub urls_rejected: u64,
    /// Deepest level dispatched so far
    pub current_depth: u32,
}

impl CrawlCounters {
    /// Percentage of completed fetches that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.pages_crawled == 0 {
            0.0
        } else {
            self.pages_successful as f64 / self.pages_crawled as f64 * 100.0
        }
    }
}

/// Failure category recorded on a failed page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageErrorKind {
    Network,
    Timeout,
    Http,
    Extraction,
    /// The fetch task itself died
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageError {
    pub kind: PageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub status_code: Option<u16>,
    pub load_time_ms: u64,
    pub final_url: Option<String>,
    pub title: Option<String>,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub attempts: u32,
    pub fetched_at: DateTime<Utc>,
}

/// Outcome of fetching one page; never mutated once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub success: bool,
    /// Content rendered in the job's output format
    pub content: Option<String>,
    pub extracted: Option<serde_json::Value>,
    pub links: Vec<String>,
    pub error: Option<PageError>,
    pub metadata: FetchMetadata,
}

impl PageResult {
    pub fn status_code(&self) -> Option<u16> {
        self.metadata.status_code
    }

    pub fn depth(&self) -> u32 {
        self.metadata.depth
    }
}

/// A crawl job as held by the store
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: String,
    pub start_url: String,
    pub rule: CrawlRule,
    pub options: FetchOptions,
    pub extraction: ExtractionStrategy,
    pub output_format: OutputFormat,
    pub session_id: Option<String>,
    pub store_results: bool,
    pub status: JobStatus,
    pub counters: CrawlCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub results: Vec<PageResult>,
}

impl CrawlJob {
    /// Creates a pending job with a fresh identifier
    pub fn new(start_url: impl Into<String>, rule: CrawlRule) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_url: start_url.into(),
            rule,
            options: FetchOptions::default(),
            extraction: ExtractionStrategy::None,
            output_format: OutputFormat::default(),
            session_id: None,
            store_results: true,
            status: JobStatus::Pending,
            counters: CrawlCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            results: Vec::new(),
        }
    }

    pub fn snapshot(&self, cancel_requested: bool) -> JobSnapshot {
        let elapsed = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            (Some(start), None) => (Utc::now() - start).num_milliseconds(),
            _ => 0,
        };

        JobSnapshot {
            id: self.id.clone(),
            start_url: self.start_url.clone(),
            status: self.status,
            counters: self.counters,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
            cancel_requested,
            elapsed_seconds: elapsed.max(0) as f64 / 1000.0,
            success_rate: self.counters.success_rate(),
            results_stored: self.results.len(),
        }
    }
}

/// Point-in-time view of a job for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub start_url: String,
    pub status: JobStatus,
    pub counters: CrawlCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub elapsed_seconds: f64,
    pub success_rate: f64,
    pub results_stored: usize,
}

/// Job counts by status plus page totals, over some set of snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pages_crawled: u64,
    pub pages_failed: u64,
}

impl JobStatistics {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a JobSnapshot>) -> Self {
        let mut stats = Self::default();
        for snapshot in snapshots {
            stats.total += 1;
            match snapshot.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
            stats.pages_crawled += snapshot.counters.pages_crawled;
            stats.pages_failed += snapshot.counters.pages_failed;
        }
        stats
    }
}
