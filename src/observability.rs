//! In-process counters for job orchestration

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_created: AtomicU64,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    documents_stored: AtomicU64,
    duplicates_skipped: AtomicU64,
    integration_failures: AtomicU64,
    rate_limited: AtomicU64,
}

macro_rules! counter {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = stringify!($field), "Metric incremented");
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(job_created, jobs_created);
    counter!(job_started, jobs_started);
    counter!(job_completed, jobs_completed);
    counter!(job_failed, jobs_failed);
    counter!(job_cancelled, jobs_cancelled);
    counter!(document_stored, documents_stored);
    counter!(duplicate_skipped, duplicates_skipped);
    counter!(integration_failed, integration_failures);
    counter!(rate_limit_hit, rate_limited);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            documents_stored: self.documents_stored.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            integration_failures: self.integration_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_created: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub documents_stored: u64,
    pub duplicates_skipped: u64,
    pub integration_failures: u64,
    pub rate_limited: u64,
}
