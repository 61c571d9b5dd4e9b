//! Settings for Tidecrawl
//!
//! This module handles loading, parsing, and validating TOML settings files.
//!
//! # Example
//!
//! ```no_run
//! use tidecrawl::config::load_settings;
//! use std::path::Path;
//!
//! let settings = load_settings(Path::new("tidecrawl.toml")).unwrap();
//! println!("Crawls will use max depth: {}", settings.crawl.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{BatchSettings, ScrapeSettings, Settings, StorageSettings};

pub use parser::{compute_settings_hash, load_settings, load_settings_with_hash, parse_settings};
pub use validation::validate_settings;
