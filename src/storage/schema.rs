//! Database schema definitions

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl job, rewritten on every status or counter change
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    start_url TEXT NOT NULL,
    status TEXT NOT NULL,
    settings_hash TEXT,
    rule TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_completed ON jobs(completed_at);

-- Page results in the order they completed
CREATE TABLE IF NOT EXISTS page_results (
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    sequence INTEGER NOT NULL,
    url TEXT NOT NULL,
    success INTEGER NOT NULL,
    status_code INTEGER,
    depth INTEGER NOT NULL,
    result TEXT NOT NULL,
    PRIMARY KEY (job_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_page_results_url ON page_results(url);

-- Active browser sessions
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    record TEXT NOT NULL,
    last_accessed TEXT NOT NULL
);

-- Successful page results keyed by URL and extraction settings
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    result TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
