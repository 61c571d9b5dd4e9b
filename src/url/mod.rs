//! URL handling for crawl traversal
//!
//! Normalization produces the dedup key used by the crawl frontier; the domain
//! helpers decide whether a discovered link stays on the start site.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, registrable_domain};
pub use matcher::is_same_or_subdomain;
pub use normalize::normalize_url;
