//! Crawler engine seam and the reqwest-backed implementation

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{redirect, Client, StatusCode};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::jobs::CrawlConfig;

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {0}")]
    Status(u16),

    /// HTTP 429. `retry_after` is the server's `Retry-After` when it sent a
    /// usable one.
    #[error("HTTP 429 Too Many Requests")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Body of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Engine is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// A link as reported by an engine: either a bare URL or an anchor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLink {
    Url(String),
    Anchor {
        href: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
}

impl RawLink {
    pub fn href(&self) -> Option<&str> {
        match self {
            RawLink::Url(url) => Some(url.as_str()),
            RawLink::Anchor { href, .. } => href.as_deref(),
        }
    }
}

/// Unnormalized page as returned by an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPage {
    /// Final URL after redirects, if the engine knows it
    pub url: Option<String>,
    pub html: Option<String>,
    pub markdown: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub links: Vec<RawLink>,
}

/// Fetches a single page. Implementations must be shareable across tasks.
#[async_trait]
pub trait CrawlerEngine: Send + Sync {
    async fn fetch(&self, url: &str, config: &CrawlConfig) -> Result<RawPage>;

    /// Release engine resources. Called once when the owning service stops.
    async fn close(&self) {}
}

/// Plain HTTP engine: one GET, no rendering, no link following.
pub struct HttpCrawlerEngine {
    following: Client,
    direct: Client,
}

impl HttpCrawlerEngine {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let build = |policy: redirect::Policy| {
            Client::builder()
                .connect_timeout(connect_timeout)
                .redirect(policy)
                .build()
                .map_err(|e| EngineError::Request(e.to_string()))
        };

        Ok(Self {
            following: build(redirect::Policy::limited(MAX_REDIRECTS))?,
            direct: build(redirect::Policy::none())?,
        })
    }

    fn client(&self, config: &CrawlConfig) -> &Client {
        if config.follow_redirects {
            &self.following
        } else {
            &self.direct
        }
    }
}

#[async_trait]
impl CrawlerEngine for HttpCrawlerEngine {
    async fn fetch(&self, url: &str, config: &CrawlConfig) -> Result<RawPage> {
        debug!(url, "Fetching page");

        let mut response = self
            .client(config)
            .get(url)
            .header(USER_AGENT, &config.user_agent)
            .timeout(config.timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else if e.is_builder() {
                    EngineError::InvalidUrl(url.to_string())
                } else {
                    EngineError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(EngineError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(EngineError::Status(status.as_u16()));
        }

        let limit = config.max_content_size;
        if let Some(size) = response.content_length().filter(|size| *size > limit) {
            return Err(EngineError::TooLarge { size, limit });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout
            } else {
                EngineError::Body(e.to_string())
            }
        })? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > limit {
                return Err(EngineError::TooLarge {
                    size: body.len() as u64,
                    limit,
                });
            }
        }
        let text = String::from_utf8_lossy(&body).into_owned();

        debug!(url, final_url = %final_url, size = body.len(), "Page fetched");

        Ok(page_from_body(final_url, content_type.as_deref(), text))
    }
}

/// Builds a [`RawPage`] from a response body. Kept synchronous because
/// `scraper::Html` is not `Send`.
fn page_from_body(final_url: String, content_type: Option<&str>, body: String) -> RawPage {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    let mut metadata = BTreeMap::new();
    if let Some(ct) = content_type {
        metadata.insert("content_type".to_string(), ct.to_string());
    }

    match mime.as_deref() {
        Some("text/markdown") | Some("text/plain") => RawPage {
            url: Some(final_url),
            html: None,
            markdown: Some(body),
            metadata,
            links: Vec::new(),
        },
        _ => {
            let document = Html::parse_document(&body);
            extract_html_metadata(&document, &mut metadata);
            let links = extract_anchors(&document);
            RawPage {
                url: Some(final_url),
                html: Some(body),
                markdown: None,
                metadata,
                links,
            }
        }
    }
}

fn extract_html_metadata(document: &Html, metadata: &mut BTreeMap<String, String>) {
    if let Some(title) = first_text(document, "title") {
        metadata.insert("title".to_string(), title);
    }

    for name in ["description", "keywords", "author"] {
        let Ok(selector) = Selector::parse(&format!("meta[name=\"{name}\"]")) else {
            continue;
        };
        let content = document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty());
        if let Some(content) = content {
            metadata.insert(name.to_string(), content.to_string());
        }
    }

    let lang = Selector::parse("html[lang]").ok().and_then(|selector| {
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("lang"))
            .map(str::to_string)
            .next()
    });
    if let Some(lang) = lang {
        metadata.insert("language".to_string(), lang);
    }
}

fn extract_anchors(document: &Html) -> Vec<RawLink> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| {
            let text = el.text().collect::<String>().trim().to_string();
            RawLink::Anchor {
                href: el.value().attr("href").map(str::to_string),
                text: (!text.is_empty()).then_some(text),
            }
        })
        .collect()
}

/// Trimmed text of the first element matching `selector`, if non-empty.
pub(crate) fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// `Retry-After` as delta seconds or an HTTP date. Dates in the past give
/// zero.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
