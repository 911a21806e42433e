//! Crawl service: owns the engine handle and normalizes raw pages

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use scraper::Html;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::engine::{CrawlerEngine, EngineError, RawPage};
use crate::dedup::content_hash;
use crate::jobs::{CrawlConfig, CrawlResult};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Crawler service is not started")]
    NotStarted,

    #[error("Crawl timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, CrawlError>;

/// Wraps a [`CrawlerEngine`] with start/stop lifecycle and result building.
///
/// The engine is only reachable between [`start`](Self::start) and
/// [`stop`](Self::stop); `crawl_url` outside that range fails with
/// [`CrawlError::NotStarted`].
pub struct CrawlService {
    engine: Arc<dyn CrawlerEngine>,
    active: RwLock<Option<Arc<dyn CrawlerEngine>>>,
}

impl CrawlService {
    pub fn new(engine: Arc<dyn CrawlerEngine>) -> Self {
        Self {
            engine,
            active: RwLock::new(None),
        }
    }

    /// Acquire the engine handle. Starting twice is a no-op.
    pub fn start(&self) {
        let mut active = self.active.write().unwrap_or_else(|p| p.into_inner());
        if active.is_none() {
            *active = Some(Arc::clone(&self.engine));
            info!("Crawler service started");
        }
    }

    /// Release the engine handle and close the engine.
    pub async fn stop(&self) {
        let handle = self
            .active
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(engine) = handle {
            engine.close().await;
            info!("Crawler service stopped");
        }
    }

    pub fn health_check(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Starts a service, returning a guard that stops it when dropped.
    pub fn start_guarded(self: Arc<Self>) -> ServiceGuard {
        self.start();
        ServiceGuard {
            service: Some(self),
        }
    }

    /// Runs `f` against a started service and stops the service afterwards.
    ///
    /// The service is also stopped when the returned future is dropped early
    /// or `f` panics; the guard's drop then closes the engine on the runtime.
    pub async fn scoped<F, Fut, T>(engine: Arc<dyn CrawlerEngine>, f: F) -> T
    where
        F: FnOnce(Arc<CrawlService>) -> Fut,
        Fut: Future<Output = T>,
    {
        let service = Arc::new(CrawlService::new(engine));
        let guard = Arc::clone(&service).start_guarded();
        let out = f(service).await;
        guard.stop().await;
        out
    }

    pub async fn crawl_url(&self, url: &str, config: &CrawlConfig) -> Result<CrawlResult> {
        let engine = self
            .active
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(CrawlError::NotStarted)?;

        let started = Instant::now();
        let page = tokio::time::timeout(config.timeout(), engine.fetch(url, config))
            .await
            .map_err(|_| CrawlError::Timeout(config.timeout_seconds))??;
        let elapsed = started.elapsed().as_secs_f64();

        let result = build_result(url, config, page, elapsed);
        debug!(
            url,
            final_url = %result.url,
            content_size = result.content_size,
            links = result.links.len(),
            "Crawl result built"
        );
        Ok(result)
    }
}

/// Stops the wrapped service on drop. Needs a tokio runtime to run the
/// asynchronous close; without one the engine is released without closing.
pub struct ServiceGuard {
    service: Option<Arc<CrawlService>>,
}

impl ServiceGuard {
    pub fn service(&self) -> Option<&Arc<CrawlService>> {
        self.service.as_ref()
    }

    /// Stop now and wait for the engine to close.
    pub async fn stop(mut self) {
        if let Some(service) = self.service.take() {
            service.stop().await;
        }
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        let Some(service) = self.service.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { service.stop().await });
            }
            Err(_) => {
                warn!("No runtime while dropping service guard; engine not closed");
                service
                    .active
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .take();
            }
        }
    }
}

fn build_result(requested: &str, config: &CrawlConfig, page: RawPage, crawl_time: f64) -> CrawlResult {
    let final_url = page
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(requested)
        .to_string();

    let mut content = page
        .markdown
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .or(page.html.as_deref())
        .unwrap_or_default()
        .to_string();

    let limit = usize::try_from(config.max_content_size).unwrap_or(usize::MAX);
    let truncated = content.len() > limit;
    if truncated {
        let cut = floor_char_boundary(&content, limit);
        content.truncate(cut);
    }

    let title = page
        .metadata
        .get("title")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| page.html.as_deref().and_then(title_from_html));

    let links = resolve_links(&final_url, &page);

    let mut metadata = Map::new();
    if config.extract_metadata {
        if let Ok(parsed) = Url::parse(&final_url) {
            if let Some(host) = parsed.host_str() {
                metadata.insert("domain".into(), Value::String(host.to_string()));
            }
            metadata.insert("scheme".into(), Value::String(parsed.scheme().to_string()));
        }
        for key in ["description", "keywords", "author", "language", "content_type"] {
            if let Some(value) = page.metadata.get(key) {
                metadata.insert(key.into(), Value::String(value.clone()));
            }
        }
    }
    metadata.insert("crawl_config".into(), Value::Object(config.to_map()));
    if truncated {
        metadata.insert("truncated".into(), Value::Bool(true));
    }

    CrawlResult {
        url: final_url,
        title,
        content_hash: content_hash(&content),
        content_size: content.len(),
        content,
        metadata,
        links,
        crawl_time: crawl_time.max(0.0),
        extracted_at: Utc::now(),
    }
}

fn title_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    super::engine::first_text(&document, "title")
}

/// Absolute http(s) links without fragments, deduplicated in first-seen order.
fn resolve_links(base: &str, page: &RawPage) -> Vec<String> {
    let base = Url::parse(base).ok();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for href in page.links.iter().filter_map(|l| l.href()) {
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let resolved = match &base {
            Some(base) => base.join(href),
            None => Url::parse(href),
        };
        let Ok(mut url) = resolved else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);
        let url = url.to_string();
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }
    links
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
