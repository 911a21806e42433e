//! Configuration management for CrawlBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use crawlbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `CRAWLBOX__<section>__<key>`
//!
//! Examples:
//! - `CRAWLBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CRAWLBOX__MANAGER__MAX_CONCURRENT_JOBS=10`
//! - `CRAWLBOX__CRAWL__MAX_CONTENT_SIZE=10MB`
//!
//! `GRAPH_API_KEY` is read from the environment only. `OLLAMA_HOST` is used
//! as the embedding endpoint when none is configured.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/crawlbox.toml`.
//! This can be overridden using the `CRAWLBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, CrawlDefaults, IntegrationsConfig, ManagerConfig, RateLimitConfig, RateLimitPolicy,
    ServerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`CRAWLBOX__*`)
    /// 2. TOML file (default: `config/crawlbox.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
