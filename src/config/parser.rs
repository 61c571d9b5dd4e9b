use crate::config::types::Settings;
use crate::config::validation::validate_settings;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and validates a settings file
///
/// # Arguments
///
/// * `path` - Path to the TOML settings file
///
/// # Returns
///
/// * `Ok(Settings)` - Successfully loaded and validated settings
/// * `Err(ConfigError)` - Failed to read, parse, or validate the file
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use tidecrawl::config::load_settings;
///
/// let settings = load_settings(Path::new("tidecrawl.toml")).unwrap();
/// println!("Max depth: {}", settings.crawl.max_depth);
/// ```
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_settings(&content)
}

/// Parses and validates settings from TOML text
pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = toml::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Computes a SHA-256 hash of the effective settings
///
/// The hash is taken over the canonical JSON form, so two files that differ
/// only in formatting or omitted defaults hash the same.
pub fn compute_settings_hash(settings: &Settings) -> String {
    let canonical = serde_json::to_vec(settings).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Loads settings and returns them with their hash
pub fn load_settings_with_hash(path: &Path) -> Result<(Settings, String), ConfigError> {
    let settings = load_settings(path)?;
    let hash = compute_settings_hash(&settings);
    Ok((settings, hash))
}
