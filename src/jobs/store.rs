use super::{CrawlCounters, CrawlJob, JobSnapshot, JobStatistics, JobStatus, PageResult};
use crate::storage::Storage;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

struct JobEntry {
    job: Mutex<CrawlJob>,
    status: watch::Sender<JobStatus>,
    cancel: AtomicBool,
}

impl JobEntry {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CrawlJob>, CrawlError> {
        self.job
            .lock()
            .map_err(|_| CrawlError::Internal("job lock poisoned".to_string()))
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// In-memory registry of crawl jobs with optional write-through storage
///
/// Status changes are broadcast on a per-job watch channel, so waiters never
/// poll. Remote callers can still poll [`JobStore::get_status`].
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    storage: Option<Arc<dyn Storage>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            storage: Some(storage),
        }
    }

    fn entry(&self, id: &str) -> Option<Arc<JobEntry>> {
        self.jobs.read().ok()?.get(id).cloned()
    }

    fn entry_or_err(&self, id: &str) -> Result<Arc<JobEntry>, CrawlError> {
        self.entry(id)
            .ok_or_else(|| CrawlError::JobNotFound(id.to_string()))
    }

    fn write_through(&self, job: &CrawlJob, cancel_requested: bool) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_job(job, cancel_requested) {
                warn!(job_id = %job.id, error = %e, "Failed to persist job snapshot");
            }
        }
    }

    /// Registers a pending job and returns its id
    pub fn submit(&self, job: CrawlJob) -> Result<String, CrawlError> {
        if job.status != JobStatus::Pending {
            return Err(CrawlError::Internal(format!(
                "job {} submitted in state {}",
                job.id, job.status
            )));
        }

        let id = job.id.clone();
        let (status, _) = watch::channel(JobStatus::Pending);
        self.write_through(&job, false);

        let entry = Arc::new(JobEntry {
            job: Mutex::new(job),
            status,
            cancel: AtomicBool::new(false),
        });

        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| CrawlError::Internal("job table lock poisoned".to_string()))?;
        if jobs.contains_key(&id) {
            return Err(CrawlError::Internal(format!("duplicate job id {}", id)));
        }
        jobs.insert(id.clone(), entry);
        debug!(job_id = %id, "Submitted job");
        Ok(id)
    }

    /// Latest snapshot of a job, falling back to storage for unknown ids
    pub fn get_status(&self, id: &str) -> Option<JobSnapshot> {
        if let Some(entry) = self.entry(id) {
            let job = entry.lock().ok()?;
            return Some(job.snapshot(entry.cancel_requested()));
        }

        let storage = self.storage.as_ref()?;
        match storage.load_job(id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Failed to load job snapshot");
                None
            }
        }
    }

    /// Page results recorded so far, falling back to storage for unknown ids
    pub fn get_results(&self, id: &str) -> Vec<PageResult> {
        if let Some(entry) = self.entry(id) {
            return entry
                .lock()
                .map(|job| job.results.clone())
                .unwrap_or_default();
        }

        match &self.storage {
            Some(storage) => storage.load_pages(id).unwrap_or_else(|e| {
                warn!(job_id = %id, error = %e, "Failed to load page results");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Clone of the full job record
    pub fn job(&self, id: &str) -> Option<CrawlJob> {
        let entry = self.entry(id)?;
        let job = entry.lock().ok()?;
        Some(job.clone())
    }

    /// Requests cancellation
    ///
    /// A pending job is cancelled immediately. A running job keeps running
    /// until its in-flight fetches drain; the dispatch loop then moves it to
    /// cancelled. Returns false for unknown or already-terminal jobs.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };

        let status = match entry.lock() {
            Ok(job) => job.status,
            Err(_) => return false,
        };

        match status {
            JobStatus::Pending => {
                entry.cancel.store(true, Ordering::SeqCst);
                self.transition(id, JobStatus::Cancelled, None).is_ok()
            }
            JobStatus::Running => {
                entry.cancel.store(true, Ordering::SeqCst);
                if let Ok(job) = entry.lock() {
                    self.write_through(&job, true);
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.entry(id)
            .map(|entry| entry.cancel_requested())
            .unwrap_or(false)
    }

    /// Moves a job to `next`, stamping timestamps and notifying subscribers
    ///
    /// # Errors
    ///
    /// `CrawlError::InvalidTransition` if the state machine forbids the move.
    pub fn transition(
        &self,
        id: &str,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<(), CrawlError> {
        let entry = self.entry_or_err(id)?;
        {
            let mut job = entry.lock()?;
            if !job.status.can_transition_to(next) {
                return Err(CrawlError::InvalidTransition {
                    from: job.status,
                    to: next,
                });
            }

            let now = Utc::now();
            job.status = next;
            if next == JobStatus::Running {
                job.started_at = Some(now);
            }
            if next.is_terminal() {
                job.completed_at = Some(now);
                job.counters.urls_queued = 0;
            }
            if error.is_some() {
                job.error = error;
            }
            self.write_through(&job, entry.cancel_requested());
        }

        entry.status.send_replace(next);
        debug!(job_id = %id, status = %next, "Job transitioned");
        Ok(())
    }

    fn ensure_running(job: &CrawlJob) -> Result<(), CrawlError> {
        if job.status != JobStatus::Running {
            return Err(CrawlError::Internal(format!(
                "job {} is {}, not running",
                job.id, job.status
            )));
        }
        Ok(())
    }

    /// Publishes the dispatch loop's latest counters
    pub fn publish_counters(&self, id: &str, counters: CrawlCounters) -> Result<(), CrawlError> {
        let entry = self.entry_or_err(id)?;
        let mut job = entry.lock()?;
        Self::ensure_running(&job)?;
        job.counters = counters;
        Ok(())
    }

    /// Appends a page result (when the job retains results) and publishes
    /// the counters that include it
    pub fn record_page(
        &self,
        id: &str,
        result: PageResult,
        counters: CrawlCounters,
    ) -> Result<(), CrawlError> {
        let entry = self.entry_or_err(id)?;
        let mut job = entry.lock()?;
        Self::ensure_running(&job)?;
        job.counters = counters;
        self.write_through(&job, entry.cancel_requested());

        if job.store_results {
            let sequence = job.results.len();
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.append_page(id, sequence, &result) {
                    warn!(job_id = %id, url = %result.url, error = %e, "Failed to persist page result");
                }
            }
            job.results.push(result);
        }
        Ok(())
    }

    /// Receiver that observes every status change of a job
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobStatus>> {
        self.entry(id).map(|entry| entry.status.subscribe())
    }

    /// Waits until the job reaches a terminal status and returns its snapshot
    pub async fn wait_for_terminal(&self, id: &str) -> Option<JobSnapshot> {
        let mut rx = self.subscribe(id)?;
        loop {
            if rx.borrow_and_update().is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.get_status(id)
    }

    /// Snapshots of every job held in memory, oldest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        let entries: Vec<Arc<JobEntry>> = match self.jobs.read() {
            Ok(jobs) => jobs.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };

        let mut snapshots: Vec<JobSnapshot> = entries
            .iter()
            .filter_map(|entry| {
                let job = entry.lock().ok()?;
                Some(job.snapshot(entry.cancel_requested()))
            })
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Drops a terminal job from memory; persisted copies are kept
    pub fn remove(&self, id: &str) -> bool {
        let terminal = self
            .get_status(id)
            .map(|s| s.status.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return false;
        }
        self.jobs
            .write()
            .map(|mut jobs| jobs.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Deletes terminal jobs that finished more than `older_than` ago
    pub fn cleanup_completed_jobs(&self, older_than: chrono::Duration) -> usize {
        self.cleanup_completed_before(Utc::now() - older_than)
    }

    /// Deletes terminal jobs finished before `cutoff`, in memory and in
    /// storage; returns how many distinct jobs were removed
    pub fn cleanup_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed: HashSet<String> = HashSet::new();

        if let Ok(mut jobs) = self.jobs.write() {
            jobs.retain(|id, entry| {
                let stale = entry
                    .lock()
                    .map(|job| {
                        job.status.is_terminal()
                            && job.completed_at.map_or(false, |at| at < cutoff)
                    })
                    .unwrap_or(false);
                if stale {
                    removed.insert(id.clone());
                }
                !stale
            });
        }

        if let Some(storage) = &self.storage {
            match storage.delete_jobs_completed_before(cutoff) {
                Ok(ids) => removed.extend(ids),
                Err(e) => warn!(error = %e, "Failed to delete old persisted jobs"),
            }
        }

        if !removed.is_empty() {
            debug!(removed = removed.len(), "Cleaned up completed jobs");
        }
        removed.len()
    }

    /// Counts over every job held in memory
    pub fn statistics(&self) -> JobStatistics {
        JobStatistics::from_snapshots(&self.list())
    }
}
