use super::{BrowserSession, SessionConfig, SessionDetail, SessionStatistics};
use crate::storage::Storage;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Tracks browser sessions and their idle expiry
pub struct SessionManager {
    sessions: Mutex<HashMap<String, BrowserSession>>,
    defaults: SessionConfig,
    default_timeout: u64,
    created: AtomicU64,
    closed: AtomicU64,
    /// Sessions expired without the engine being told yet
    unreleased: Mutex<Vec<String>>,
    storage: Option<Arc<dyn Storage>>,
}

impl SessionManager {
    /// Creates a manager whose implicit sessions use `defaults`
    ///
    /// `default_timeout` is the idle expiry, in seconds, for sessions created
    /// without an explicit timeout.
    pub fn new(defaults: SessionConfig, default_timeout: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            defaults,
            default_timeout,
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            unreleased: Mutex::new(Vec::new()),
            storage: None,
        }
    }

    /// Mirrors session records into `storage`
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, BrowserSession>>, CrawlError> {
        self.sessions
            .lock()
            .map_err(|_| CrawlError::Internal("session table lock poisoned".to_string()))
    }

    fn persist(&self, session: &BrowserSession) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_session(session) {
                warn!(session_id = %session.id, error = %e, "Failed to persist session");
            }
        }
    }

    fn forget(&self, session_id: &str) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.delete_session(session_id) {
                warn!(session_id = %session_id, error = %e, "Failed to delete persisted session");
            }
        }
    }

    /// Allocates a session and returns its id
    ///
    /// # Errors
    ///
    /// * `CrawlError::Conflict` - `id` already names an active session
    /// * `CrawlError::Validation` - empty id, zero timeout, or bad config
    pub fn create_session(
        &self,
        config: Option<SessionConfig>,
        id: Option<&str>,
        timeout_seconds: Option<u64>,
    ) -> Result<String, CrawlError> {
        let config = config.unwrap_or_else(|| self.defaults.clone());
        config.validate()?;

        let timeout_seconds = timeout_seconds.unwrap_or(self.default_timeout);
        if timeout_seconds == 0 {
            return Err(CrawlError::Validation(
                "session timeout must be positive".to_string(),
            ));
        }

        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(CrawlError::Validation(
                    "session id must not be empty".to_string(),
                ))
            }
            Some(id) => id.to_string(),
            None => format!("session-{}", uuid::Uuid::new_v4().simple()),
        };

        let session = {
            let mut sessions = self.lock()?;
            if sessions.get(&id).map(|s| s.active).unwrap_or(false) {
                return Err(CrawlError::Conflict(id));
            }

            let now = Utc::now();
            let session = BrowserSession {
                id: id.clone(),
                config,
                timeout_seconds,
                created_at: now,
                last_accessed: now,
                page_count: 0,
                active: true,
                state: BTreeMap::new(),
            };
            sessions.insert(id.clone(), session.clone());
            session
        };

        self.created.fetch_add(1, Ordering::Relaxed);
        self.persist(&session);
        info!(session_id = %id, browser = ?session.config.browser_type, "Created session");
        Ok(id)
    }

    /// Returns an active session, refreshing its last-accessed time
    ///
    /// A session found idle past its timeout is closed here and None is
    /// returned. Its id is queued for [`SessionManager::take_unreleased`].
    pub fn get_session(&self, id: &str) -> Option<BrowserSession> {
        self.get_session_at(id, Utc::now())
    }

    /// [`SessionManager::get_session`] as seen at `now`
    pub fn get_session_at(&self, id: &str, now: DateTime<Utc>) -> Option<BrowserSession> {
        let mut sessions = self.lock().ok()?;
        let session = sessions.get_mut(id).filter(|s| s.active)?;

        if session.is_expired(now) {
            session.active = false;
            drop(sessions);
            self.closed.fetch_add(1, Ordering::Relaxed);
            self.forget(id);
            self.queue_release([id.to_string()]);
            info!(session_id = %id, "Session expired on access");
            return None;
        }

        session.last_accessed = now;
        Some(session.clone())
    }

    fn queue_release(&self, ids: impl IntoIterator<Item = String>) {
        match self.unreleased.lock() {
            Ok(mut unreleased) => unreleased.extend(ids),
            Err(_) => warn!("Release queue lock poisoned; engine state may leak"),
        }
    }

    /// Drains the ids of sessions that expired without an engine release
    ///
    /// Callers holding the engine pass each id to
    /// [`crate::engine::FetchEngine::release_session`].
    pub fn take_unreleased(&self) -> Vec<String> {
        self.unreleased
            .lock()
            .map(|mut unreleased| std::mem::take(&mut *unreleased))
            .unwrap_or_default()
    }

    /// Binds one fetch to session `id`, creating the session if needed
    ///
    /// Increments the page count and refreshes the access time.
    pub fn acquire(&self, id: &str) -> Result<BrowserSession, CrawlError> {
        if self.get_session(id).is_none() {
            match self.create_session(None, Some(id), None) {
                Ok(_) => debug!(session_id = %id, "Created session on first use"),
                // Lost a race with a concurrent first use
                Err(CrawlError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let session = {
            let mut sessions = self.lock()?;
            let session = sessions
                .get_mut(id)
                .filter(|s| s.active)
                .ok_or_else(|| CrawlError::Internal(format!("session {} vanished", id)))?;
            session.last_accessed = Utc::now();
            session.page_count += 1;
            session.clone()
        };

        self.persist(&session);
        Ok(session)
    }

    /// Lists sessions ordered by creation time
    pub fn list_sessions(&self, include_inactive: bool) -> Vec<BrowserSession> {
        let Ok(sessions) = self.lock() else {
            return Vec::new();
        };
        let mut list: Vec<BrowserSession> = sessions
            .values()
            .filter(|s| include_inactive || s.active)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Stores an opaque value on an active session
    pub fn update_session_state(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CrawlError> {
        let session = {
            let mut sessions = self.lock()?;
            let session = sessions
                .get_mut(id)
                .filter(|s| s.active)
                .ok_or_else(|| CrawlError::Validation(format!("no active session {}", id)))?;
            session.state.insert(key.to_string(), value);
            session.last_accessed = Utc::now();
            session.clone()
        };
        self.persist(&session);
        Ok(())
    }

    /// Marks a session inactive; false if it is unknown or already closed
    ///
    /// Engine-side resources are released by the caller.
    pub fn close_session(&self, id: &str) -> bool {
        let closed = match self.lock() {
            Ok(mut sessions) => match sessions.get_mut(id) {
                Some(session) if session.active => {
                    session.active = false;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };

        if closed {
            self.closed.fetch_add(1, Ordering::Relaxed);
            self.forget(id);
            info!(session_id = %id, "Closed session");
        }
        closed
    }

    /// Closes every active session idle past its timeout at `now`
    ///
    /// Returns the ids closed, so the caller can release engine resources.
    pub fn expire_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = match self.lock() {
            Ok(mut sessions) => sessions
                .values_mut()
                .filter(|s| s.active && s.is_expired(now))
                .map(|s| {
                    s.active = false;
                    s.id.clone()
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        for id in &expired {
            self.closed.fetch_add(1, Ordering::Relaxed);
            self.forget(id);
            info!(session_id = %id, "Expired idle session");
        }
        expired
    }

    /// Closes sessions idle past their timeout; returns how many were closed
    ///
    /// The closed ids are queued for [`SessionManager::take_unreleased`].
    pub fn cleanup_expired_sessions(&self) -> usize {
        let expired = self.expire_idle(Utc::now());
        let count = expired.len();
        self.queue_release(expired);
        count
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .map(|sessions| sessions.values().filter(|s| s.active).count())
            .unwrap_or(0)
    }

    pub fn get_session_statistics(&self) -> SessionStatistics {
        let now = Utc::now();
        let sessions = self.list_sessions(true);

        SessionStatistics {
            total_active: sessions.iter().filter(|s| s.active).count(),
            total_created: self.created.load(Ordering::Relaxed),
            total_closed: self.closed.load(Ordering::Relaxed),
            sessions: sessions
                .iter()
                .map(|s| SessionDetail {
                    id: s.id.clone(),
                    active: s.active,
                    age_seconds: s.age_seconds(now),
                    idle_seconds: s.idle_seconds(now),
                    page_count: s.page_count,
                    browser_type: s.config.browser_type,
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("active", &self.active_count())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
