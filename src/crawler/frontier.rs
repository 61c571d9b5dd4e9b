//! Breadth-first crawl frontier
//!
//! The frontier is owned by the dispatch loop alone, so it needs no locking.
//! Fetch tasks report their links back and the loop feeds them in here.

use crate::rules::RejectReason;
use crate::CrawlError;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
    /// Page the link was found on; None for the seed
    pub discovered_from: Option<Url>,
}

/// Outcome of offering a discovered link to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// First sighting; the caller decides whether to accept it
    New,
    /// Rejected earlier for depth, now found at a shallower depth
    Reconsider,
    /// Already visited, queued, or rejected for a reason that still holds
    Seen,
}

/// Per-depth FIFO queues plus the visited set used for deduplication
///
/// Pops always come from the shallowest non-empty depth. Links found late
/// by a slow shallow page still run ahead of deeper work queued meanwhile.
#[derive(Debug, Default)]
pub struct Frontier {
    queues: BTreeMap<u32, VecDeque<FrontierEntry>>,
    /// Every URL ever enqueued, whether or not it has been dispatched
    visited: HashSet<String>,
    /// Links the rule engine turned away. Depth rejections keep the depth
    /// they were found at; every other reason is final.
    rejected: HashMap<String, Option<u32>>,
    queued: usize,
}

impl Frontier {
    /// Creates a frontier holding only the seed at depth 0
    pub fn seeded(seed: Url) -> Self {
        let mut frontier = Self::default();
        frontier.push(FrontierEntry {
            url: seed,
            depth: 0,
            discovered_from: None,
        });
        frontier
    }

    /// Checks how `url`, found at `depth`, relates to earlier sightings
    ///
    /// Nothing is recorded.
    pub fn offer(&self, url: &Url, depth: u32) -> Offer {
        let key = url.as_str();
        if self.visited.contains(key) {
            return Offer::Seen;
        }
        match self.rejected.get(key) {
            None => Offer::New,
            Some(Some(rejected_at)) if depth < *rejected_at => Offer::Reconsider,
            Some(_) => Offer::Seen,
        }
    }

    /// Queues an accepted link behind others of the same depth
    ///
    /// Returns false if the URL was already in the visited set.
    pub fn push(&mut self, entry: FrontierEntry) -> bool {
        let key = entry.url.as_str().to_string();
        if !self.visited.insert(key.clone()) {
            return false;
        }
        self.rejected.remove(&key);
        self.queues.entry(entry.depth).or_default().push_back(entry);
        self.queued += 1;
        true
    }

    /// Remembers a rejected link so later sightings are not re-evaluated
    ///
    /// A depth rejection is kept open for the same URL found shallower.
    pub fn reject(&mut self, url: &Url, depth: u32, reason: &RejectReason) {
        let rejected_at = match reason {
            RejectReason::DepthExceeded { .. } => Some(depth),
            _ => None,
        };
        let slot = self.rejected.entry(url.as_str().to_string()).or_insert(rejected_at);
        *slot = match (*slot, rejected_at) {
            (Some(earlier), Some(now)) => Some(earlier.min(now)),
            _ => None,
        };
    }

    /// Takes the oldest entry at the shallowest queued depth
    ///
    /// # Errors
    ///
    /// `CrawlError::Internal` if an entry sits in the queue of another
    /// depth, meaning the frontier was corrupted.
    pub fn pop(&mut self) -> Result<Option<FrontierEntry>, CrawlError> {
        let Some(mut bucket) = self.queues.first_entry() else {
            return Ok(None);
        };
        let depth = *bucket.key();
        let entry = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        let Some(entry) = entry else {
            return Err(CrawlError::Internal(format!(
                "frontier kept an empty queue for depth {}",
                depth
            )));
        };
        if entry.depth != depth {
            return Err(CrawlError::Internal(format!(
                "frontier queue for depth {} held {} at depth {}",
                depth, entry.url, entry.depth
            )));
        }
        self.queued = self.queued.saturating_sub(1);
        Ok(Some(entry))
    }

    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Shallowest depth with queued work
    pub fn next_depth(&self) -> Option<u32> {
        self.queues.keys().next().copied()
    }

    /// Number of distinct URLs ever enqueued, seed included
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}
