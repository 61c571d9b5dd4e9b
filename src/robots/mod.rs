//! Robots.txt handling
//!
//! Robots files are supplied by the fetch engine, parsed with the robotstxt
//! crate, and cached per origin for the lifetime of a crawl.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

/// Returns the robots.txt location for the origin of `url`
pub fn robots_url(url: &url::Url) -> Option<url::Url> {
    if url.host_str().is_none() {
        return None;
    }
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}

/// Returns the cache key for the origin serving `url`
pub fn origin_key(url: &url::Url) -> String {
    url.origin().ascii_serialization()
}
