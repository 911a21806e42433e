//! Crawl job orchestration.
//!
//! [`CrawlJobManager`] owns the job store and launches one tokio task per
//! running job. The per-job mutex serializes lifecycle transitions; the
//! running counter enforces `max_concurrent_jobs` and is only changed while
//! that mutex is held.

pub mod error;
mod orchestrator;

pub use crate::config::RateLimitPolicy;
pub use error::{CrawlExecutionError, ManagerError};
pub use orchestrator::{CrawlJobManager, ManagerBuilder, ManagerStats, PersistOutcome};
