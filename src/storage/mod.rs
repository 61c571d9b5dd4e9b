//! Persistence for job snapshots, page results, and sessions
//!
//! The in-memory job store is authoritative while a process runs. A
//! [`Storage`] backend receives writes as they happen so status and results
//! stay readable after the process exits.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;

/// Opens (or creates) the SQLite database at `path`
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}
