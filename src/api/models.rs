//! Request and response bodies for the crawl API.
//!
//! - `POST /crawl` accepts a [`CreateCrawlRequest`]
//! - Job endpoints answer with a [`JobRecord`]
//! - `GET /crawl` answers with a [`JobListResponse`]
//!
//! A create request needs only a URL; every crawl option falls back to the
//! server's `[crawl]` defaults:
//!
//! ```json
//! {
//!   "url": "https://example.com/docs",
//!   "max_depth": 2,
//!   "timeout_seconds": 15,
//!   "extract_metadata": true,
//!   "start": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::CrawlDefaults;
use crate::jobs::{CrawlConfig, JobRecord};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCrawlRequest {
    pub url: String,
    pub max_depth: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub max_content_size: Option<u64>,
    pub respect_robots: Option<bool>,
    pub user_agent: Option<String>,
    pub follow_redirects: Option<bool>,
    pub extract_metadata: Option<bool>,
    /// Start the job right after creating it
    #[serde(default)]
    pub start: bool,
}

impl CreateCrawlRequest {
    pub fn to_config(&self, defaults: &CrawlDefaults) -> CrawlConfig {
        let base = defaults.to_crawl_config();
        CrawlConfig {
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            timeout_seconds: self.timeout_seconds.unwrap_or(base.timeout_seconds),
            max_content_size: self.max_content_size.unwrap_or(base.max_content_size),
            respect_robots: self.respect_robots.unwrap_or(base.respect_robots),
            user_agent: self.user_agent.clone().unwrap_or(base.user_agent),
            follow_redirects: self.follow_redirects.unwrap_or(base.follow_redirects),
            extract_metadata: self.extract_metadata.unwrap_or(base.extract_metadata),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobActionResponse {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub jobs: BTreeMap<String, usize>,
    pub running: usize,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
