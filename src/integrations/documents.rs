//! Document store on top of object_store.
//!
//! Documents are written once to `documents/{content_hash}.json`; a second
//! write for the same hash is rejected by the backend and reported as
//! [`IntegrationError::Duplicate`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StoragePath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};

use super::{DocumentMetadata, DocumentStore, IntegrationError, Result};

const DOCUMENT_PREFIX: &str = "documents";

/// What gets written for each document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Clone)]
pub struct ObjectDocumentStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectDocumentStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Store documents under a local directory, creating it if needed.
    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| IntegrationError::Backend(e.to_string()))?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| IntegrationError::Backend(e.to_string()))?;
        Ok(Self::new(Arc::new(fs)))
    }

    fn key(content_hash: &str) -> StoragePath {
        StoragePath::from(format!("{DOCUMENT_PREFIX}/{content_hash}.json"))
    }

    pub async fn exists(&self, content_hash: &str) -> Result<bool> {
        match self.store.head(&Self::key(content_hash)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(IntegrationError::Backend(e.to_string())),
        }
    }

    pub async fn load(&self, content_hash: &str) -> Result<Option<StoredDocument>> {
        let result = match self.store.get(&Self::key(content_hash)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(IntegrationError::Backend(e.to_string())),
        };
        let bytes = result
            .bytes()
            .await
            .map_err(|e| IntegrationError::Backend(e.to_string()))?;
        let doc = serde_json::from_slice(&bytes)
            .map_err(|e| IntegrationError::Backend(e.to_string()))?;
        Ok(Some(doc))
    }
}

#[async_trait]
impl DocumentStore for ObjectDocumentStore {
    async fn store_document(
        &self,
        content: &str,
        metadata: &DocumentMetadata,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        let doc = StoredDocument {
            content: content.to_string(),
            metadata: metadata.clone(),
            embedding: embedding.map(<[f32]>::to_vec),
        };
        let body = serde_json::to_vec(&doc).map_err(|e| IntegrationError::Backend(e.to_string()))?;
        let size = body.len();
        let key = Self::key(&metadata.content_hash);

        match self
            .store
            .put_opts(&key, PutPayload::from(body), PutOptions::from(PutMode::Create))
            .await
        {
            Ok(_) => {
                tracing::info!(key = %key, size, "Stored document");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(IntegrationError::Duplicate(metadata.content_hash.clone()))
            }
            Err(e) => Err(IntegrationError::Backend(e.to_string())),
        }
    }
}
