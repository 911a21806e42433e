//! Crawl job data model.
//!
//! - [`CrawlConfig`] - per-job crawl parameters, flat-map serializable
//! - [`CrawlResult`] - normalized output of one crawl
//! - [`CrawlJob`] - one crawl request and its lifecycle state
//! - [`JobRecord`] - the flat serialized form of a job
//!
//! # Lifecycle
//!
//! ```text
//! PENDING  -> RUNNING | CANCELLED
//! RUNNING  -> COMPLETED | FAILED | CANCELLED
//! COMPLETED, FAILED, CANCELLED are terminal
//! ```
//!
//! Transitions go through the `mark_*` methods, which reject anything not in
//! the table above without touching the job.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use super::error::{JobError, TransitionError};

pub const DEFAULT_MAX_DEPTH: u32 = 1;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MAX_CONTENT_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_USER_AGENT: &str = "RAGFlow-Crawler/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl CrawlStatus {
    pub const ALL: [CrawlStatus; 5] = [
        CrawlStatus::Pending,
        CrawlStatus::Running,
        CrawlStatus::Completed,
        CrawlStatus::Failed,
        CrawlStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::Running => "running",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Failed => "failed",
            CrawlStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlStatus::Completed | CrawlStatus::Failed | CrawlStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: CrawlStatus) -> bool {
        use CrawlStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CrawlStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| JobError::UnknownStatus(s.to_string()))
    }
}

/// Crawl parameters attached to a job. Missing keys take their defaults when
/// deserialized, so partial maps are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub max_depth: u32,
    pub timeout_seconds: u64,
    /// Upper bound on fetched body and extracted content, in bytes
    pub max_content_size: u64,
    pub respect_robots: bool,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub extract_metadata: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
            respect_robots: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: true,
            extract_metadata: true,
        }
    }
}

impl CrawlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.timeout_seconds == 0 {
            return Err(JobError::InvalidConfig(
                "timeout_seconds must be positive".to_string(),
            ));
        }
        if self.max_content_size == 0 {
            return Err(JobError::InvalidConfig(
                "max_content_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("max_depth".into(), self.max_depth.into());
        map.insert("timeout_seconds".into(), self.timeout_seconds.into());
        map.insert("max_content_size".into(), self.max_content_size.into());
        map.insert("respect_robots".into(), self.respect_robots.into());
        map.insert("user_agent".into(), self.user_agent.clone().into());
        map.insert("follow_redirects".into(), self.follow_redirects.into());
        map.insert("extract_metadata".into(), self.extract_metadata.into());
        map
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, JobError> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| JobError::InvalidConfig(e.to_string()))
    }
}

/// Normalized output of a single crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    /// Final URL after redirects
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub links: Vec<String>,
    /// SHA-256 hex digest of `content`
    pub content_hash: String,
    pub content_size: usize,
    /// Seconds spent in the crawler engine
    pub crawl_time: f64,
    pub extracted_at: DateTime<Utc>,
}

/// Deduplication key set for a piece of crawled content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub content_hash: String,
    pub url_hash: String,
    pub title_hash: Option<String>,
}

/// Checks that `raw` is an absolute URL with a scheme and a host.
pub fn validate_url(raw: &str) -> Result<Url, JobError> {
    let invalid = |reason: &str| JobError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(invalid("missing host")),
    }
}

/// One crawl request and its lifecycle state.
///
/// Fields are private so the status-dependent invariants (`result` only when
/// completed, `error_message` only when failed, `completed_at` only when
/// terminal) can only be changed through the `mark_*` transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "JobRecord", try_from = "JobRecord")]
pub struct CrawlJob {
    id: String,
    url: String,
    status: CrawlStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    config: CrawlConfig,
    result: Option<CrawlResult>,
    error_message: Option<String>,
}

impl CrawlJob {
    pub fn new(url: impl Into<String>, config: CrawlConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            url: url.into(),
            status: CrawlStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            config,
            result: None,
            error_message: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> CrawlStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn result(&self) -> Option<&CrawlResult> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.transition(CrawlStatus::Running)
    }

    pub fn mark_completed(&mut self, result: CrawlResult) -> Result<(), TransitionError> {
        self.transition(CrawlStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(CrawlStatus::Failed)?;
        self.error_message = Some(error_message.into());
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), TransitionError> {
        self.transition(CrawlStatus::Cancelled)
    }

    fn transition(&mut self, to: CrawlStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }

        // Wall clock may step backwards; updated_at must not.
        let now = Utc::now().max(self.updated_at);
        self.status = to;
        self.updated_at = now;
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

/// Flat, serializable form of a [`CrawlJob`] as exposed to API callers and
/// written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub url: String,
    pub status: CrawlStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: Map<String, Value>,
    pub result: Option<CrawlResult>,
    pub error_message: Option<String>,
}

impl From<&CrawlJob> for JobRecord {
    fn from(job: &CrawlJob) -> Self {
        Self {
            id: job.id.clone(),
            url: job.url.clone(),
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            config: job.config.to_map(),
            result: job.result.clone(),
            error_message: job.error_message.clone(),
        }
    }
}

impl From<CrawlJob> for JobRecord {
    fn from(job: CrawlJob) -> Self {
        JobRecord::from(&job)
    }
}

impl TryFrom<JobRecord> for CrawlJob {
    type Error = JobError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let status = record.status;

        if record.result.is_some() != (status == CrawlStatus::Completed) {
            return Err(JobError::InvalidRecord(format!(
                "job {} has status {} but result presence does not match",
                record.id, status
            )));
        }
        if record.error_message.is_some() != (status == CrawlStatus::Failed) {
            return Err(JobError::InvalidRecord(format!(
                "job {} has status {} but error_message presence does not match",
                record.id, status
            )));
        }
        if record.completed_at.is_some() != status.is_terminal() {
            return Err(JobError::InvalidRecord(format!(
                "job {} has status {} but completed_at presence does not match",
                record.id, status
            )));
        }
        if record.updated_at < record.created_at {
            return Err(JobError::InvalidRecord(format!(
                "job {} was updated before it was created",
                record.id
            )));
        }

        Ok(Self {
            config: CrawlConfig::from_map(&record.config)?,
            id: record.id,
            url: record.url,
            status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
            result: record.result,
            error_message: record.error_message,
        })
    }
}
