use crate::humanize::ByteSize;
use crate::jobs::{
    CrawlConfig, DEFAULT_MAX_CONTENT_SIZE, DEFAULT_MAX_DEPTH, DEFAULT_TIMEOUT_SECONDS,
    DEFAULT_USER_AGENT,
};
use crate::ratelimit::{
    RateLimitRule, DEFAULT_COOLDOWN_SECS, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub crawl: CrawlDefaults,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Job ledger location; jobs are kept in memory only when unset
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: None,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// What a job does when its target is over its rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPolicy {
    /// Sleep until the window rolls over, then crawl
    #[default]
    Wait,
    /// Fail the job immediately
    Fail,
}

/// Job manager settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_list_limit_max")]
    pub list_limit_max: usize,
    /// Characters of content sent to the knowledge graph per episode
    #[serde(default = "default_episode_body_limit")]
    pub episode_body_limit: usize,
    #[serde(default)]
    pub rate_limit_policy: RateLimitPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            list_limit_max: default_list_limit_max(),
            episode_body_limit: default_episode_body_limit(),
            rate_limit_policy: RateLimitPolicy::default(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_list_limit_max() -> usize {
    100
}

fn default_episode_body_limit() -> usize {
    10_000
}

/// Defaults applied to crawl requests that leave a field unset
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlDefaults {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_content_size")]
    pub max_content_size: ByteSize,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_true")]
    pub extract_metadata: bool,
    /// TCP connect timeout for the HTTP crawler engine
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            timeout_seconds: default_timeout_seconds(),
            max_content_size: default_max_content_size(),
            respect_robots: true,
            user_agent: default_user_agent(),
            follow_redirects: true,
            extract_metadata: true,
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

impl CrawlDefaults {
    pub fn to_crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            max_depth: self.max_depth,
            timeout_seconds: self.timeout_seconds,
            max_content_size: self.max_content_size.as_u64(),
            respect_robots: self.respect_robots,
            user_agent: self.user_agent.clone(),
            follow_redirects: self.follow_redirects,
            extract_metadata: self.extract_metadata,
        }
    }
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_content_size() -> ByteSize {
    ByteSize(DEFAULT_MAX_CONTENT_SIZE)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Per-host rate limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub default_max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
    /// Cooldown after a 429 without `Retry-After`, for hosts no rule covers
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_max_requests: default_max_requests(),
            default_window_secs: default_window_secs(),
            default_cooldown_secs: default_cooldown_secs(),
            rules: Vec::new(),
        }
    }
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

/// Downstream backends. Each one is disabled when its location is unset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntegrationsConfig {
    /// Directory for the document store
    pub storage_path: Option<PathBuf>,
    pub graph_endpoint: Option<String>,
    /// Knowledge-graph API key (loaded from environment, not from config file)
    #[serde(skip)]
    pub graph_api_key: Option<String>,
    /// Ollama host used for embeddings
    pub embedding_endpoint: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_integration_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            graph_endpoint: None,
            graph_api_key: None,
            embedding_endpoint: None,
            embedding_model: default_embedding_model(),
            request_timeout_seconds: default_integration_timeout_seconds(),
        }
    }
}

fn default_embedding_model() -> String {
    crate::integrations::embeddings::DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_integration_timeout_seconds() -> u64 {
    30
}
