pub mod error;
pub mod models;

pub use error::{JobError, TransitionError};
pub use models::{
    validate_url, ContentFingerprint, CrawlConfig, CrawlJob, CrawlResult, CrawlStatus, JobRecord,
    DEFAULT_MAX_CONTENT_SIZE, DEFAULT_MAX_DEPTH, DEFAULT_TIMEOUT_SECONDS, DEFAULT_USER_AGENT,
};
