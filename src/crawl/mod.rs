//! Crawl execution: the engine seam and the service that drives it

pub mod engine;
pub mod service;

pub use engine::{CrawlerEngine, EngineError, HttpCrawlerEngine, RawLink, RawPage};
pub use service::{CrawlError, CrawlService, ServiceGuard};
