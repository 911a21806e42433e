use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("manager.max_concurrent_jobs must be at least 1")]
    NoJobSlots,

    #[error("manager.list_limit_max must be at least 1")]
    InvalidListLimit,

    #[error("crawl.{field} must be positive")]
    NonPositiveCrawlDefault { field: &'static str },

    #[error("Rate limit window must be positive (rule '{pattern}')")]
    InvalidRateWindow { pattern: String },

    #[error("Rate limit must allow at least one request per window (rule '{pattern}')")]
    ZeroRateLimit { pattern: String },

    #[error("Rate limit rule has an empty pattern")]
    EmptyRatePattern,

    #[error("Invalid {field} URL '{value}'")]
    InvalidEndpoint { field: &'static str, value: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_manager(config)?;
    validate_crawl_defaults(config)?;
    validate_rate_limits(config)?;
    validate_integrations(config)?;
    Ok(())
}

fn validate_manager(config: &Config) -> Result<(), ValidationError> {
    if config.manager.max_concurrent_jobs == 0 {
        return Err(ValidationError::NoJobSlots);
    }
    if config.manager.list_limit_max == 0 {
        return Err(ValidationError::InvalidListLimit);
    }
    Ok(())
}

fn validate_crawl_defaults(config: &Config) -> Result<(), ValidationError> {
    let crawl = &config.crawl;
    if crawl.timeout_seconds == 0 {
        return Err(ValidationError::NonPositiveCrawlDefault {
            field: "timeout_seconds",
        });
    }
    if crawl.max_content_size.as_u64() == 0 {
        return Err(ValidationError::NonPositiveCrawlDefault {
            field: "max_content_size",
        });
    }
    if crawl.connect_timeout_seconds == 0 {
        return Err(ValidationError::NonPositiveCrawlDefault {
            field: "connect_timeout_seconds",
        });
    }
    Ok(())
}

fn validate_rate_limits(config: &Config) -> Result<(), ValidationError> {
    if config.rate_limits.default_window_secs == 0 {
        return Err(ValidationError::InvalidRateWindow {
            pattern: "default".to_string(),
        });
    }
    if config.rate_limits.default_max_requests == 0 {
        return Err(ValidationError::ZeroRateLimit {
            pattern: "default".to_string(),
        });
    }
    for rule in &config.rate_limits.rules {
        if rule.pattern.trim().is_empty() {
            return Err(ValidationError::EmptyRatePattern);
        }
        if rule.window_secs == 0 {
            return Err(ValidationError::InvalidRateWindow {
                pattern: rule.pattern.clone(),
            });
        }
        if rule.max_requests == 0 {
            return Err(ValidationError::ZeroRateLimit {
                pattern: rule.pattern.clone(),
            });
        }
    }
    Ok(())
}

fn validate_integrations(config: &Config) -> Result<(), ValidationError> {
    let endpoints = [
        ("graph_endpoint", &config.integrations.graph_endpoint),
        ("embedding_endpoint", &config.integrations.embedding_endpoint),
    ];
    for (field, value) in endpoints {
        if let Some(value) = value {
            let ok = url::Url::parse(value)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !ok {
                return Err(ValidationError::InvalidEndpoint {
                    field,
                    value: value.clone(),
                });
            }
        }
    }
    Ok(())
}
