//! SQLite storage implementation

use crate::jobs::{CrawlJob, JobSnapshot, PageResult};
use crate::session::BrowserSession;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
///
/// The connection sits behind a mutex so one instance can be shared by the
/// job store, the session manager, and every crawl task.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    settings_hash: Option<String>,
}

impl SqliteStorage {
    /// Opens or creates the database file at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            settings_hash: None,
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            settings_hash: None,
        })
    }

    /// Stamps every job row written from now on with `hash`
    pub fn with_settings_hash(mut self, hash: impl Into<String>) -> Self {
        self.settings_hash = Some(hash.into());
        self
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Returns the settings hash recorded with a job, if any
    pub fn job_settings_hash(&self, job_id: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let hash = conn
            .query_row(
                "SELECT settings_hash FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }
}

impl Storage for SqliteStorage {
    // ===== Jobs =====

    fn save_job(&self, job: &CrawlJob, cancel_requested: bool) -> StorageResult<()> {
        let snapshot = serde_json::to_string(&job.snapshot(cancel_requested))?;
        let rule = serde_json::to_string(&job.rule)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (id, start_url, status, settings_hash, rule, snapshot, created_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                snapshot = excluded.snapshot,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at",
            params![
                job.id,
                job.start_url,
                job.status.to_db_string(),
                self.settings_hash,
                rule,
                snapshot,
                job.created_at.to_rfc3339(),
                job.completed_at.map(|t| t.to_rfc3339()),
                now
            ],
        )?;
        Ok(())
    }

    fn load_job(&self, job_id: &str) -> StorageResult<Option<JobSnapshot>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    fn list_jobs(&self) -> StorageResult<Vec<JobSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT snapshot FROM jobs ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(serde_json::from_str(&row?)?);
        }
        Ok(jobs)
    }

    fn delete_jobs_completed_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, completed_at FROM jobs
             WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut stale = Vec::new();
        for row in rows {
            let (id, completed_at) = row?;
            let completed_at = DateTime::parse_from_rfc3339(&completed_at)
                .map_err(|e| StorageError::Corrupt(format!("job {} has bad completed_at: {}", id, e)))?
                .with_timezone(&Utc);
            if completed_at < cutoff {
                stale.push(id);
            }
        }
        drop(stmt);

        for id in &stale {
            conn.execute("DELETE FROM page_results WHERE job_id = ?1", params![id])?;
            conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        }
        Ok(stale)
    }

    // ===== Page results =====

    fn append_page(&self, job_id: &str, sequence: usize, page: &PageResult) -> StorageResult<()> {
        let result = serde_json::to_string(page)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO page_results (job_id, sequence, url, success, status_code, depth, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_id,
                sequence as i64,
                page.url,
                page.success,
                page.metadata.status_code,
                page.metadata.depth,
                result
            ],
        )?;
        Ok(())
    }

    fn load_pages(&self, job_id: &str) -> StorageResult<Vec<PageResult>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT result FROM page_results WHERE job_id = ?1 ORDER BY sequence")?;
        let rows = stmt.query_map(params![job_id], |row| row.get::<_, String>(0))?;

        let mut pages = Vec::new();
        for row in rows {
            pages.push(serde_json::from_str(&row?)?);
        }
        Ok(pages)
    }

    // ===== Sessions =====

    fn save_session(&self, session: &BrowserSession) -> StorageResult<()> {
        let record = serde_json::to_string(session)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (id, record, last_accessed) VALUES (?1, ?2, ?3)",
            params![session.id, record, session.last_accessed.to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete_session(&self, session_id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }

    fn load_sessions(&self) -> StorageResult<Vec<BrowserSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, record FROM sessions ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, record) = row?;
            let session: BrowserSession = serde_json::from_str(&record)?;
            if session.id != id {
                return Err(StorageError::Corrupt(format!(
                    "session row {} holds record for {}",
                    id, session.id
                )));
            }
            sessions.push(session);
        }
        Ok(sessions)
    }

    // ===== Page cache =====

    fn load_cached_page(&self, key: &str, now: DateTime<Utc>) -> StorageResult<Option<PageResult>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT result, expires_at FROM cache_entries WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((result, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| StorageError::Corrupt(format!("cache entry {}: {}", key, e)))?
            .with_timezone(&Utc);
        if expires_at <= now {
            return Ok(None);
        }

        conn.execute(
            "UPDATE cache_entries SET access_count = access_count + 1, last_accessed = ?2
             WHERE cache_key = ?1",
            params![key, now.to_rfc3339()],
        )?;
        Ok(Some(serde_json::from_str(&result)?))
    }

    fn store_cached_page(
        &self,
        key: &str,
        page: &PageResult,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let result = serde_json::to_string(page)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (cache_key, url, result, expires_at, access_count, last_accessed)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                key,
                page.url,
                result,
                expires_at.to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn cleanup_expired_cache(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT cache_key, expires_at FROM cache_entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (key, expires_at) = row?;
            // Unreadable timestamps count as expired
            let live = DateTime::parse_from_rfc3339(&expires_at)
                .map(|t| t.with_timezone(&Utc) > now)
                .unwrap_or(false);
            if !live {
                expired.push(key);
            }
        }
        drop(stmt);

        for key in &expired {
            conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])?;
        }
        Ok(expired.len())
    }
}
