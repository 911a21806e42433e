use thiserror::Error;

use crate::crawl::CrawlError;
use crate::jobs::JobError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Concurrency limit of {0} running jobs reached")]
    ConcurrencyLimit(usize),
}

impl From<JobError> for ManagerError {
    fn from(e: JobError) -> Self {
        ManagerError::Validation(e.to_string())
    }
}

/// Why a running job failed. The display text becomes the job's
/// `error_message`.
#[derive(Debug, Error)]
pub enum CrawlExecutionError {
    #[error("Rate limit exceeded for {key}, retry in {retry_after_secs}s")]
    RateLimited { key: String, retry_after_secs: u64 },

    #[error("Requests to {key} are blocked by a zero-request rate limit rule")]
    Blocked { key: String },

    #[error("{key} answered HTTP 429, cooling down for {cooldown_secs}s")]
    Throttled { key: String, cooldown_secs: u64 },

    #[error(transparent)]
    Crawl(#[from] CrawlError),
}
