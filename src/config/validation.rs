use crate::config::types::{BatchSettings, ScrapeSettings, Settings, StorageSettings};
use crate::session::SessionConfig;
use crate::{ConfigError, CrawlError};
use regex::Regex;

/// Validates the entire settings tree
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    validate_browser_settings(&settings.browser)?;
    validate_scrape_settings(&settings.scrape)?;
    validate_crawl_patterns(&settings.crawl.include_patterns)?;
    validate_crawl_patterns(&settings.crawl.exclude_patterns)?;
    settings.crawl.validate().map_err(to_config_error)?;
    validate_batch_settings(&settings.batch)?;
    validate_storage_settings(&settings.storage)?;
    Ok(())
}

fn to_config_error(error: CrawlError) -> ConfigError {
    match error {
        CrawlError::Config(e) => e,
        CrawlError::Validation(msg) => ConfigError::Validation(msg),
        other => ConfigError::Validation(other.to_string()),
    }
}

/// Validates browser defaults: timeout, viewport and proxy
fn validate_browser_settings(config: &SessionConfig) -> Result<(), ConfigError> {
    config.validate().map_err(to_config_error)
}

fn validate_scrape_settings(config: &ScrapeSettings) -> Result<(), ConfigError> {
    if config.timeout < 1 || config.timeout > 300 {
        return Err(ConfigError::Validation(format!(
            "scrape timeout must be between 1 and 300 seconds, got {}",
            config.timeout
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "scrape user-agent cannot be empty".to_string(),
        ));
    }

    if !config.retry_delay.is_finite() || config.retry_delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "retry-delay must be a non-negative number of seconds, got {}",
            config.retry_delay
        )));
    }

    if config.cache_enabled && config.cache_ttl < 1 {
        return Err(ConfigError::Validation(
            "cache-ttl must be at least 1 second when the cache is enabled".to_string(),
        ));
    }

    Ok(())
}

/// Checks that every crawl pattern is a valid regex
fn validate_crawl_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid pattern '{}': {}", pattern, e))
        })?;
    }
    Ok(())
}

fn validate_batch_settings(config: &BatchSettings) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 100 {
        return Err(ConfigError::Validation(format!(
            "batch max-concurrent must be between 1 and 100, got {}",
            config.max_concurrent
        )));
    }

    if !config.delay.is_finite() || config.delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "batch delay must be a non-negative number of seconds, got {}",
            config.delay
        )));
    }

    Ok(())
}

fn validate_storage_settings(config: &StorageSettings) -> Result<(), ConfigError> {
    if let Some(path) = &config.database_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
    }

    if config.session_timeout < 1 {
        return Err(ConfigError::Validation(
            "session-timeout must be at least 1 second".to_string(),
        ));
    }

    if config.session_cleanup_interval < 1 {
        return Err(ConfigError::Validation(
            "session-cleanup-interval must be at least 1 second".to_string(),
        ));
    }

    if config.job_retention < 1 {
        return Err(ConfigError::Validation(
            "job-retention must be at least 1 second".to_string(),
        ));
    }

    Ok(())
}
