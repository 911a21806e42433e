//! Content fingerprinting and seen-set tracking

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::jobs::ContentFingerprint;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid"];

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub total_hashes: usize,
}

/// Tracks content hashes that have already been persisted.
#[derive(Debug, Default)]
pub struct ContentDeduplicator {
    seen: Mutex<HashSet<String>>,
}

impl ContentDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(&self, content: &str) -> String {
        content_hash(content)
    }

    pub fn create_fingerprint(
        &self,
        url: &str,
        content: &str,
        title: Option<&str>,
    ) -> ContentFingerprint {
        let title_hash = title
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .map(|t| content_hash(&t));

        ContentFingerprint {
            content_hash: content_hash(content),
            url_hash: content_hash(&Self::normalize_url(url)),
            title_hash,
        }
    }

    pub fn is_duplicate(&self, hash: &str) -> bool {
        self.lock().contains(hash)
    }

    /// Returns true when the hash was not seen before.
    pub fn record(&self, hash: &str) -> bool {
        self.lock().insert(hash.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total_hashes: self.len(),
        }
    }

    /// Lowercases, drops tracking query parameters and strips a trailing
    /// slash. Input that does not parse as a URL is only lowercased and
    /// trimmed.
    pub fn normalize_url(raw: &str) -> String {
        let Ok(mut url) = Url::parse(raw.trim()) else {
            return raw.trim().trim_end_matches('/').to_lowercase();
        };

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        url.as_str().trim_end_matches('/').to_lowercase()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
