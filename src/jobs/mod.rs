//! Crawl job bookkeeping
//!
//! Jobs are owned by the [`JobStore`]; the dispatch loop writes to them and
//! everyone else reads snapshots.

mod model;
mod store;

pub use model::{
    CrawlCounters, CrawlJob, FetchMetadata, JobSnapshot, JobStatistics, JobStatus, PageError,
    PageErrorKind, PageResult,
};
pub use store::JobStore;
