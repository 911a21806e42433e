use thiserror::Error;

use super::models::CrawlStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("invalid crawl config: {0}")]
    InvalidConfig(String),

    #[error("invalid job record: {0}")]
    InvalidRecord(String),
}

/// Rejected lifecycle change; the job is left untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal transition from {from} to {to}")]
pub struct TransitionError {
    pub from: CrawlStatus,
    pub to: CrawlStatus,
}
