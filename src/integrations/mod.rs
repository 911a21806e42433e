//! Downstream sinks for crawled content.
//!
//! Each backend sits behind a trait so the job manager can be wired with real
//! clients, test doubles, or [`NoopIntegration`] when a backend is not
//! configured. Failures here never change a job's status.

pub mod documents;
pub mod embeddings;
pub mod graph;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use documents::ObjectDocumentStore;
pub use embeddings::OllamaEmbedder;
pub use graph::HttpKnowledgeGraph;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    /// Content with this hash is already stored.
    #[error("Duplicate content: {0}")]
    Duplicate(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Integration not configured")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, IntegrationError>;

impl From<reqwest::Error> for IntegrationError {
    fn from(e: reqwest::Error) -> Self {
        IntegrationError::Backend(e.to_string())
    }
}

/// Metadata stored alongside a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source_url: String,
    pub crawl_job_id: String,
    pub title: String,
    pub content_hash: String,
    /// SHA-256 of the normalized source URL
    #[serde(default)]
    pub url_hash: String,
    /// SHA-256 of the trimmed, lowercased title; absent when untitled
    #[serde(default)]
    pub title_hash: Option<String>,
    pub extracted_at: DateTime<Utc>,
    pub content_size: usize,
}

/// A knowledge-graph episode built from one crawl result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub name: String,
    pub episode_body: String,
    pub source_description: String,
    pub reference_time: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `content` keyed by `metadata.content_hash`. Storing a hash that
    /// already exists fails with [`IntegrationError::Duplicate`].
    async fn store_document(
        &self,
        content: &str,
        metadata: &DocumentMetadata,
        embedding: Option<&[f32]>,
    ) -> Result<()>;
}

#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn add_episode(&self, episode: &Episode) -> Result<()>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Stand-in for an unconfigured backend. Every call reports
/// [`IntegrationError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIntegration;

#[async_trait]
impl DocumentStore for NoopIntegration {
    async fn store_document(
        &self,
        _content: &str,
        metadata: &DocumentMetadata,
        _embedding: Option<&[f32]>,
    ) -> Result<()> {
        tracing::debug!(content_hash = %metadata.content_hash, "No document store configured");
        Err(IntegrationError::Unavailable)
    }
}

#[async_trait]
impl KnowledgeGraph for NoopIntegration {
    async fn add_episode(&self, episode: &Episode) -> Result<()> {
        tracing::debug!(episode = %episode.name, "No knowledge graph configured");
        Err(IntegrationError::Unavailable)
    }
}

#[async_trait]
impl Embedder for NoopIntegration {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(IntegrationError::Unavailable)
    }
}

/// The set of downstream backends a job manager writes to.
#[derive(Clone)]
pub struct Integrations {
    pub documents: Arc<dyn DocumentStore>,
    pub graph: Arc<dyn KnowledgeGraph>,
    pub embedder: Arc<dyn Embedder>,
}

impl Default for Integrations {
    fn default() -> Self {
        Self {
            documents: Arc::new(NoopIntegration),
            graph: Arc::new(NoopIntegration),
            embedder: Arc::new(NoopIntegration),
        }
    }
}

impl Integrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn KnowledgeGraph>) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }
}

impl std::fmt::Debug for Integrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrations").finish_non_exhaustive()
    }
}
