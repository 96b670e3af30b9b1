use crate::config::types::{
    CacheConfig, Config, HttpConfig, OutputConfig, QualityConfig, RateLimitConfig, SourceConfig,
    WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Largest tolerated sum of `(1 - min_completeness) + max_failure_rate`
pub const MAX_QUALITY_SLACK: f64 = 1.5;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_http_config(&config.http)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_worker_config(&config.workers)?;
    validate_cache_config(&config.cache)?;
    validate_output_config(&config.output)?;
    validate_quality_config(&config.quality)?;
    Ok(())
}

/// Validates source configuration
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    for start in &config.start_urls {
        let url = Url::parse(start).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Start URL '{}' must use HTTP or HTTPS",
                start
            )));
        }
    }

    if config.max_listing_pages < 1 {
        return Err(ConfigError::Validation(
            "max_listing_pages must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates HTTP transport configuration
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.timeout_secs < 1 || config.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be between 1 and 300, got {}",
            config.timeout_secs
        )));
    }

    if config.connect_timeout_secs < 1 || config.connect_timeout_secs > config.timeout_secs {
        return Err(ConfigError::Validation(format!(
            "connect_timeout_secs must be between 1 and timeout_secs ({}), got {}",
            config.timeout_secs, config.connect_timeout_secs
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if !(1.0..=10.0).contains(&config.backoff_factor) {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be between 1.0 and 10.0, got {}",
            config.backoff_factor
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.max_throttle_retries < 1 {
        return Err(ConfigError::Validation(
            "max_throttle_retries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates rate limit configuration
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.requests_per_minute < 1 || config.requests_per_minute > 600 {
        return Err(ConfigError::Validation(format!(
            "requests_per_minute must be between 1 and 600, got {}",
            config.requests_per_minute
        )));
    }

    if config.business_hours_factor <= 0.0 || config.business_hours_factor > 1.0 {
        return Err(ConfigError::Validation(format!(
            "business_hours_factor must be in (0, 1], got {}",
            config.business_hours_factor
        )));
    }

    if config.business_hours_start >= config.business_hours_end
        || config.business_hours_end > 24
    {
        return Err(ConfigError::Validation(format!(
            "business hours must satisfy start < end <= 24, got {}..{}",
            config.business_hours_start, config.business_hours_end
        )));
    }

    if config.throttle_cooldown_secs > 3600 {
        return Err(ConfigError::Validation(format!(
            "throttle_cooldown_secs must be <= 3600, got {}",
            config.throttle_cooldown_secs
        )));
    }

    Ok(())
}

/// Validates worker pool configuration
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 64 {
        return Err(ConfigError::Validation(format!(
            "workers.count must be between 1 and 64, got {}",
            config.count
        )));
    }

    if config.queue_size < 1 {
        return Err(ConfigError::Validation(
            "workers.queue_size must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(
            "workers.checkpoint_interval must be >= 1".to_string(),
        ));
    }

    if config.checkpoints_to_keep < 1 {
        return Err(ConfigError::Validation(
            "workers.checkpoints_to_keep must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates cache configuration
fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if config.ttl_hours < 1 {
        return Err(ConfigError::Validation("cache.ttl_hours must be >= 1".to_string()));
    }

    if config.max_size_mb < 1 {
        return Err(ConfigError::Validation(
            "cache.max_size_mb must be >= 1".to_string(),
        ));
    }

    if config.max_entries < 1 {
        return Err(ConfigError::Validation(
            "cache.max_entries must be >= 1".to_string(),
        ));
    }

    if config.directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "cache.directory cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("output.path cannot be empty".to_string()));
    }

    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates quality thresholds, including the cross-field degeneracy rule
fn validate_quality_config(config: &QualityConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.min_completeness) {
        return Err(ConfigError::Validation(format!(
            "min_completeness must be between 0 and 1, got {}",
            config.min_completeness
        )));
    }

    if !(0.0..=1.0).contains(&config.max_failure_rate) {
        return Err(ConfigError::Validation(format!(
            "max_failure_rate must be between 0 and 1, got {}",
            config.max_failure_rate
        )));
    }

    let slack = (1.0 - config.min_completeness) + config.max_failure_rate;
    if slack > MAX_QUALITY_SLACK {
        return Err(ConfigError::Validation(format!(
            "min_completeness {} with max_failure_rate {} would accept near-total failure",
            config.min_completeness, config.max_failure_rate
        )));
    }

    Ok(())
}
