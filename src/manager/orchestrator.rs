use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{CrawlExecutionError, ManagerError};
use crate::config::{ManagerConfig, RateLimitPolicy};
use crate::crawl::{CrawlError, CrawlService, EngineError};
use crate::dedup::{content_hash, ContentDeduplicator, DedupStats};
use crate::integrations::{DocumentMetadata, Episode, IntegrationError, Integrations};
use crate::jobs::{validate_url, CrawlConfig, CrawlJob, CrawlResult, CrawlStatus, JobRecord, TransitionError};
use crate::ledger::{FjallLedger, LedgerError};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::ratelimit::RateLimiter;

const INTERRUPTED_MESSAGE: &str = "interrupted by shutdown";
const UNTITLED: &str = "Crawled Content";
const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_millis(50);

/// What happened to a completed crawl's content in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored,
    /// Already stored earlier, either known locally or reported by the store
    Duplicate,
    /// No document store configured
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_jobs: usize,
    pub by_status: BTreeMap<String, usize>,
    pub running: usize,
    pub max_concurrent_jobs: usize,
    pub dedup: DedupStats,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
struct JobSlot {
    /// Creation order, used for newest-first listing
    seq: u64,
    job: Arc<Mutex<CrawlJob>>,
}

struct TaskHandle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    settings: ManagerConfig,
    service: Arc<CrawlService>,
    rate_limiter: Arc<RateLimiter>,
    dedup: Arc<ContentDeduplicator>,
    integrations: Integrations,
    ledger: Option<FjallLedger>,
    metrics: Arc<Metrics>,
    jobs: RwLock<HashMap<String, JobSlot>>,
    next_seq: AtomicU64,
    running: AtomicUsize,
    // Lock order: `tasks` before any job mutex.
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

/// Builder for [`CrawlJobManager`]. Anything not set falls back to defaults
/// with no-op integrations and no ledger.
pub struct ManagerBuilder {
    service: Arc<CrawlService>,
    settings: ManagerConfig,
    rate_limiter: Arc<RateLimiter>,
    dedup: Arc<ContentDeduplicator>,
    integrations: Integrations,
    ledger: Option<FjallLedger>,
    metrics: Arc<Metrics>,
}

impl ManagerBuilder {
    pub fn settings(mut self, settings: ManagerConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn deduplicator(mut self, dedup: Arc<ContentDeduplicator>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }

    pub fn ledger(mut self, ledger: FjallLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> CrawlJobManager {
        CrawlJobManager {
            inner: Arc::new(Inner {
                settings: self.settings,
                service: self.service,
                rate_limiter: self.rate_limiter,
                dedup: self.dedup,
                integrations: self.integrations,
                ledger: self.ledger,
                metrics: self.metrics,
                jobs: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                running: AtomicUsize::new(0),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Orchestrates crawl jobs: creation, launch under a concurrency ceiling,
/// cancellation, and fan-out of results to downstream integrations.
///
/// Cheap to clone; clones share the same job store.
#[derive(Clone)]
pub struct CrawlJobManager {
    inner: Arc<Inner>,
}

impl CrawlJobManager {
    pub fn builder(service: Arc<CrawlService>) -> ManagerBuilder {
        ManagerBuilder {
            service,
            settings: ManagerConfig::default(),
            rate_limiter: Arc::new(RateLimiter::default()),
            dedup: Arc::new(ContentDeduplicator::new()),
            integrations: Integrations::default(),
            ledger: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn new(service: Arc<CrawlService>, settings: ManagerConfig) -> Self {
        Self::builder(service).settings(settings).build()
    }

    pub fn settings(&self) -> &ManagerConfig {
        &self.inner.settings
    }

    pub fn service(&self) -> &Arc<CrawlService> {
        &self.inner.service
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn deduplicator(&self) -> &Arc<ContentDeduplicator> {
        &self.inner.dedup
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.rate_limiter
    }

    /// Register a new PENDING job. Nothing is fetched until
    /// [`start_job`](Self::start_job).
    pub fn create_job(&self, url: &str, config: CrawlConfig) -> Result<CrawlJob, ManagerError> {
        validate_url(url)?;
        config.validate()?;

        let job = CrawlJob::new(url.trim(), config);
        let snapshot = job.clone();
        self.inner.insert(job);
        self.inner.metrics.job_created();

        info!(job_id = %snapshot.id(), url = %snapshot.url(), "Created crawl job");
        Ok(snapshot)
    }

    /// Launch a PENDING job in the background.
    ///
    /// Returns `Ok(false)` when the job is not PENDING and
    /// [`ManagerError::ConcurrencyLimit`] when the running ceiling is reached;
    /// in both cases the job is left as it was.
    pub fn start_job(&self, job_id: &str) -> Result<bool, ManagerError> {
        let inner = &self.inner;
        let slot = inner
            .slot(job_id)
            .ok_or_else(|| ManagerError::NotFound(job_id.to_string()))?;

        let mut tasks = lock(&inner.tasks);
        let mut job = lock(&slot.job);
        if job.status() != CrawlStatus::Pending {
            debug!(job_id, status = %job.status(), "Job is not pending, not starting");
            return Ok(false);
        }

        let max = inner.settings.max_concurrent_jobs;
        let reserved = inner
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok();
        if !reserved {
            warn!(job_id, max, "Concurrency limit reached");
            return Err(ManagerError::ConcurrencyLimit(max));
        }

        if let Err(e) = inner.transition(&mut job, CrawlJob::mark_running) {
            inner.running.fetch_sub(1, Ordering::SeqCst);
            warn!(job_id, error = %e, "Could not mark job running");
            return Ok(false);
        }
        drop(job);

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(execute(
            Arc::clone(inner),
            job_id.to_string(),
            Arc::clone(&slot.job),
            cancel_rx,
        ));
        tasks.insert(job_id.to_string(), TaskHandle { cancel, handle });

        inner.metrics.job_started();
        info!(job_id, "Started crawl job");
        Ok(true)
    }

    pub fn get_job(&self, job_id: &str) -> Option<CrawlJob> {
        self.inner.slot(job_id).map(|slot| lock(&slot.job).clone())
    }

    /// Jobs newest first, optionally filtered by status.
    pub fn list_jobs(
        &self,
        status: Option<CrawlStatus>,
        limit: usize,
    ) -> Result<Vec<CrawlJob>, ManagerError> {
        let max = self.inner.settings.list_limit_max;
        if limit == 0 || limit > max {
            return Err(ManagerError::Validation(format!(
                "limit must be between 1 and {max}, got {limit}"
            )));
        }

        let mut slots: Vec<JobSlot> = read(&self.inner.jobs).values().cloned().collect();
        slots.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(slots
            .iter()
            .map(|slot| lock(&slot.job).clone())
            .filter(|job| status.is_none_or(|s| job.status() == s))
            .take(limit)
            .collect())
    }

    /// Like [`list_jobs`](Self::list_jobs) with the status given as text.
    pub fn list_jobs_by_name(
        &self,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CrawlJob>, ManagerError> {
        let status = status.map(str::parse::<CrawlStatus>).transpose()?;
        self.list_jobs(status, limit)
    }

    /// Cancel a PENDING or RUNNING job. Returns false for unknown or
    /// already-terminal jobs.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let inner = &self.inner;
        let Some(slot) = inner.slot(job_id) else {
            return false;
        };

        let task = {
            let mut tasks = lock(&inner.tasks);
            let mut job = lock(&slot.job);
            if let Err(e) = inner.transition(&mut job, CrawlJob::mark_cancelled) {
                debug!(job_id, error = %e, "Job cannot be cancelled");
                return false;
            }
            tasks.remove(job_id)
        };

        if let Some(task) = task {
            let _ = task.cancel.send(true);
            task.handle.abort();
        }

        inner.metrics.job_cancelled();
        info!(job_id, "Cancelled crawl job");
        true
    }

    /// Store a completed crawl's content unless it was seen before.
    pub async fn persist_crawl_result(&self, job_id: &str, result: &CrawlResult) -> PersistOutcome {
        self.inner.persist_crawl_result(job_id, result).await
    }

    /// Send a completed crawl to the knowledge graph. Returns whether the
    /// episode was accepted.
    pub async fn integrate_with_graph(&self, job: &CrawlJob, result: &CrawlResult) -> bool {
        self.inner.integrate_with_graph(job, result).await
    }

    /// Reload jobs from the ledger. Jobs that were RUNNING when the previous
    /// process stopped come back FAILED. Returns the number of jobs restored.
    pub fn restore(&self) -> Result<usize, LedgerError> {
        let inner = &self.inner;
        let Some(ledger) = &inner.ledger else {
            return Ok(0);
        };

        let mut restored = 0;
        for record in ledger.load_all()? {
            let id = record.id.clone();
            if inner.slot(&id).is_some() {
                continue;
            }
            let mut job = match CrawlJob::try_from(record) {
                Ok(job) => job,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Skipping invalid ledger record");
                    continue;
                }
            };

            if job.status() == CrawlStatus::Running {
                // Not counted in `running`, so no counter adjustment.
                if job.mark_failed(INTERRUPTED_MESSAGE).is_ok() {
                    ledger.upsert(&JobRecord::from(&job))?;
                    warn!(job_id = %id, "Job was interrupted by shutdown");
                }
            }
            inner.insert_existing(job);
            restored += 1;
        }

        info!(restored, "Restored jobs from ledger");
        Ok(restored)
    }

    /// Stop all in-flight jobs, wait for their tasks, then stop the crawl
    /// service. Interrupted jobs end CANCELLED.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let tasks: Vec<(String, TaskHandle)> = lock(&inner.tasks).drain().collect();
        info!(in_flight = tasks.len(), "Shutting down job manager");

        for (_, task) in &tasks {
            let _ = task.cancel.send(true);
        }
        for (job_id, task) in tasks {
            if let Err(e) = task.handle.await {
                warn!(job_id = %job_id, error = %e, "Job task ended abnormally");
            }
        }

        inner.service.stop().await;
        if let Some(ledger) = &inner.ledger {
            if let Err(e) = ledger.persist() {
                warn!(error = %e, "Failed to flush job ledger");
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn active_tasks(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    /// Poll until the job is terminal. Returns `None` for an unknown job.
    pub async fn wait_until_terminal(&self, job_id: &str, poll: Duration) -> Option<CrawlJob> {
        loop {
            let job = self.get_job(job_id)?;
            if job.is_terminal() {
                return Some(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Poll until no job task is in flight, including downstream
    /// integration after completion.
    pub async fn wait_for_tasks(&self, poll: Duration) {
        while self.active_tasks() > 0 {
            tokio::time::sleep(poll).await;
        }
    }

    pub fn stats(&self) -> ManagerStats {
        let slots: Vec<JobSlot> = read(&self.inner.jobs).values().cloned().collect();
        let mut by_status: BTreeMap<String, usize> = CrawlStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for slot in &slots {
            let status = lock(&slot.job).status();
            *by_status.entry(status.as_str().to_string()).or_default() += 1;
        }

        ManagerStats {
            total_jobs: slots.len(),
            by_status,
            running: self.running_count(),
            max_concurrent_jobs: self.inner.settings.max_concurrent_jobs,
            dedup: self.inner.dedup.stats(),
            metrics: self.inner.metrics.snapshot(),
        }
    }
}

impl Inner {
    fn slot(&self, job_id: &str) -> Option<JobSlot> {
        read(&self.jobs).get(job_id).cloned()
    }

    fn insert(&self, job: CrawlJob) {
        self.persist(&job);
        self.insert_existing(job);
    }

    fn insert_existing(&self, job: CrawlJob) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = job.id().to_string();
        let slot = JobSlot {
            seq,
            job: Arc::new(Mutex::new(job)),
        };
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot);
    }

    fn persist(&self, job: &CrawlJob) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.upsert(&JobRecord::from(job)) {
                warn!(job_id = %job.id(), error = %e, "Failed to write job to ledger");
            }
        }
    }

    /// Apply a lifecycle change with the job's mutex held. Releases the
    /// running slot exactly when the job leaves RUNNING.
    fn transition<F>(&self, job: &mut CrawlJob, change: F) -> Result<(), TransitionError>
    where
        F: FnOnce(&mut CrawlJob) -> Result<(), TransitionError>,
    {
        let was_running = job.status() == CrawlStatus::Running;
        change(job)?;
        if was_running && job.status() != CrawlStatus::Running {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        self.persist(job);
        Ok(())
    }

    async fn run_crawl(
        &self,
        job_id: &str,
        url: &str,
        config: &CrawlConfig,
    ) -> Result<CrawlResult, CrawlExecutionError> {
        let key = RateLimiter::key_for_url(url);
        if let Some(key) = &key {
            if self.rate_limiter.rule_for(key).blocks_all() {
                return Err(CrawlExecutionError::Blocked { key: key.clone() });
            }
            while !self.rate_limiter.try_acquire(key) {
                self.metrics.rate_limit_hit();
                let wait = self.rate_limiter.time_until_reset(key);
                match self.settings.rate_limit_policy {
                    RateLimitPolicy::Fail => {
                        return Err(CrawlExecutionError::RateLimited {
                            key: key.clone(),
                            retry_after_secs: wait.as_secs(),
                        });
                    }
                    RateLimitPolicy::Wait => {
                        info!(job_id, key = %key, wait_ms = wait.as_millis() as u64, "Rate limited, waiting");
                        tokio::time::sleep(wait.max(MIN_RATE_LIMIT_WAIT)).await;
                    }
                }
            }
        }

        match self.service.crawl_url(url, config).await {
            Err(CrawlError::Engine(EngineError::RateLimited { retry_after })) => {
                let Some(key) = key else {
                    return Err(CrawlError::Engine(EngineError::RateLimited { retry_after }).into());
                };
                let cooldown =
                    retry_after.unwrap_or_else(|| self.rate_limiter.rule_for(&key).cooldown());
                self.rate_limiter.cooldown(&key, cooldown);
                self.metrics.rate_limit_hit();
                warn!(
                    job_id,
                    key = %key,
                    cooldown_secs = cooldown.as_secs(),
                    "Target answered 429, cooling down"
                );
                Err(CrawlExecutionError::Throttled {
                    key,
                    cooldown_secs: cooldown.as_secs(),
                })
            }
            other => Ok(other?),
        }
    }

    async fn integrate_with_downstream(&self, job: &CrawlJob, result: &CrawlResult) {
        self.persist_crawl_result(job.id(), result).await;
        self.integrate_with_graph(job, result).await;
    }

    async fn persist_crawl_result(&self, job_id: &str, result: &CrawlResult) -> PersistOutcome {
        let fingerprint =
            self.dedup
                .create_fingerprint(&result.url, &result.content, result.title.as_deref());
        let hash = fingerprint.content_hash.clone();

        if self.dedup.is_duplicate(&hash) {
            debug!(job_id, content_hash = %hash, "Content already stored, skipping");
            self.metrics.duplicate_skipped();
            return PersistOutcome::Duplicate;
        }

        let embedding = match self.integrations.embedder.embed(&result.content).await {
            Ok(vector) => Some(vector),
            Err(IntegrationError::Unavailable) => None,
            Err(e) => {
                warn!(job_id, error = %e, "Embedding failed, storing without embedding");
                self.metrics.integration_failed();
                None
            }
        };

        let metadata = DocumentMetadata {
            source_url: result.url.clone(),
            crawl_job_id: job_id.to_string(),
            title: result.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
            content_hash: fingerprint.content_hash,
            url_hash: fingerprint.url_hash,
            title_hash: fingerprint.title_hash,
            extracted_at: result.extracted_at,
            content_size: result.content_size,
        };

        match self
            .integrations
            .documents
            .store_document(&result.content, &metadata, embedding.as_deref())
            .await
        {
            Ok(()) => {
                self.dedup.record(&hash);
                self.metrics.document_stored();
                info!(job_id, url = %result.url, content_hash = %hash, "Stored crawled content");
                PersistOutcome::Stored
            }
            Err(IntegrationError::Duplicate(_)) => {
                self.dedup.record(&hash);
                self.metrics.duplicate_skipped();
                debug!(job_id, content_hash = %hash, "Document store already had content");
                PersistOutcome::Duplicate
            }
            Err(IntegrationError::Unavailable) => {
                debug!(job_id, "Document store not configured, skipping");
                PersistOutcome::Skipped
            }
            Err(e) => {
                warn!(job_id, error = %e, "Failed to store crawled content");
                self.metrics.integration_failed();
                PersistOutcome::Failed
            }
        }
    }

    async fn integrate_with_graph(&self, job: &CrawlJob, result: &CrawlResult) -> bool {
        let url_hash = content_hash(&result.url);
        let episode = Episode {
            name: format!("crawl_{}_{}", job.id(), &url_hash[..8]),
            episode_body: result
                .content
                .chars()
                .take(self.settings.episode_body_limit)
                .collect(),
            source_description: format!("Crawled content from {}", result.url),
            reference_time: result.extracted_at,
        };

        match self.integrations.graph.add_episode(&episode).await {
            Ok(()) => {
                info!(job_id = %job.id(), episode = %episode.name, "Added crawl to knowledge graph");
                true
            }
            Err(IntegrationError::Unavailable) => {
                debug!(job_id = %job.id(), "Knowledge graph not configured, skipping");
                false
            }
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Knowledge graph integration failed");
                self.metrics.integration_failed();
                false
            }
        }
    }
}

/// Body of a job task: crawl, record the outcome, then fan out.
async fn execute(
    inner: Arc<Inner>,
    job_id: String,
    job: Arc<Mutex<CrawlJob>>,
    mut cancel: watch::Receiver<bool>,
) {
    let (url, config) = {
        let job = lock(&job);
        (job.url().to_string(), job.config().clone())
    };

    let outcome = tokio::select! {
        _ = cancelled(&mut cancel) => None,
        res = inner.run_crawl(&job_id, &url, &config) => Some(res),
    };

    match outcome {
        None => {
            let mut guard = lock(&job);
            if inner.transition(&mut guard, CrawlJob::mark_cancelled).is_ok() {
                inner.metrics.job_cancelled();
            }
            info!(job_id = %job_id, "Crawl interrupted");
        }
        Some(Ok(result)) => {
            let completed = {
                let mut guard = lock(&job);
                let stored = result.clone();
                match inner.transition(&mut guard, move |j| j.mark_completed(stored)) {
                    Ok(()) => Some(guard.clone()),
                    Err(e) => {
                        debug!(job_id = %job_id, error = %e, "Discarding result of finished job");
                        None
                    }
                }
            };

            if let Some(snapshot) = completed {
                inner.metrics.job_completed();
                info!(
                    job_id = %job_id,
                    url = %result.url,
                    content_size = result.content_size,
                    crawl_time = result.crawl_time,
                    "Crawl completed"
                );
                tokio::select! {
                    _ = cancelled(&mut cancel) => {
                        warn!(job_id = %job_id, "Downstream integration interrupted");
                    }
                    _ = inner.integrate_with_downstream(&snapshot, &result) => {}
                }
            }
        }
        Some(Err(e)) => {
            let message = e.to_string();
            let mut guard = lock(&job);
            match inner.transition(&mut guard, |j| j.mark_failed(message)) {
                Ok(()) => {
                    inner.metrics.job_failed();
                    warn!(job_id = %job_id, url = %url, error = %e, "Crawl failed");
                }
                Err(t) => debug!(job_id = %job_id, error = %t, "Discarding failure of finished job"),
            }
        }
    }

    lock(&inner.tasks).remove(&job_id);
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// is gone without signalling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::{CrawlerEngine, RawLink, RawPage};
    use crate::integrations::{DocumentStore, Embedder, KnowledgeGraph};
    use crate::ratelimit::RateLimitRule;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};

    const POLL: Duration = Duration::from_millis(5);

    struct FakeEngine {
        delay: Duration,
        fail_status: Option<u16>,
        throttled: Option<Option<Duration>>,
        content: Option<String>,
        links: Vec<RawLink>,
    }

    impl FakeEngine {
        fn fast() -> Self {
            Self {
                delay: Duration::ZERO,
                fail_status: None,
                throttled: None,
                content: None,
                links: Vec::new(),
            }
        }

        /// Answers HTTP 429 with the given `Retry-After`
        fn throttled(retry_after: Option<Duration>) -> Self {
            Self {
                throttled: Some(retry_after),
                ..Self::fast()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::fast()
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                fail_status: Some(status),
                ..Self::fast()
            }
        }

        fn constant(content: &str) -> Self {
            Self {
                content: Some(content.to_string()),
                ..Self::fast()
            }
        }
    }

    #[async_trait]
    impl CrawlerEngine for FakeEngine {
        async fn fetch(&self, url: &str, _config: &CrawlConfig) -> Result<RawPage, EngineError> {
            tokio::time::sleep(self.delay).await;
            if let Some(status) = self.fail_status {
                return Err(EngineError::Status(status));
            }
            if let Some(retry_after) = self.throttled {
                return Err(EngineError::RateLimited { retry_after });
            }
            Ok(RawPage {
                url: Some(url.to_string()),
                html: None,
                markdown: Some(
                    self.content
                        .clone()
                        .unwrap_or_else(|| format!("content of {url}")),
                ),
                metadata: BTreeMap::from([("title".to_string(), "Page".to_string())]),
                links: self.links.clone(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        fail: bool,
        seen: Mutex<HashSet<String>>,
        stored: Mutex<Vec<(DocumentMetadata, bool)>>,
    }

    #[async_trait]
    impl DocumentStore for RecordingStore {
        async fn store_document(
            &self,
            _content: &str,
            metadata: &DocumentMetadata,
            embedding: Option<&[f32]>,
        ) -> crate::integrations::Result<()> {
            if self.fail {
                return Err(IntegrationError::Backend("disk full".to_string()));
            }
            if !lock(&self.seen).insert(metadata.content_hash.clone()) {
                return Err(IntegrationError::Duplicate(metadata.content_hash.clone()));
            }
            lock(&self.stored).push((metadata.clone(), embedding.is_some()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGraph {
        episodes: Mutex<Vec<Episode>>,
    }

    #[async_trait]
    impl KnowledgeGraph for RecordingGraph {
        async fn add_episode(&self, episode: &Episode) -> crate::integrations::Result<()> {
            lock(&self.episodes).push(episode.clone());
            Ok(())
        }
    }

    struct FailingGraph;

    #[async_trait]
    impl KnowledgeGraph for FailingGraph {
        async fn add_episode(&self, _episode: &Episode) -> crate::integrations::Result<()> {
            Err(IntegrationError::Backend("graph returned 503".to_string()))
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> crate::integrations::Result<Vec<f32>> {
            Ok(vec![0.25; 4])
        }
    }

    fn started(engine: FakeEngine) -> Arc<CrawlService> {
        let service = Arc::new(CrawlService::new(Arc::new(engine)));
        service.start();
        service
    }

    fn settings(max_concurrent_jobs: usize) -> ManagerConfig {
        ManagerConfig {
            max_concurrent_jobs,
            ..ManagerConfig::default()
        }
    }

    fn manager(engine: FakeEngine) -> CrawlJobManager {
        CrawlJobManager::new(started(engine), ManagerConfig::default())
    }

    fn sample_result(url: &str, content: &str) -> CrawlResult {
        CrawlResult {
            url: url.to_string(),
            title: None,
            content: content.to_string(),
            metadata: Default::default(),
            links: Vec::new(),
            content_hash: content_hash(content),
            content_size: content.len(),
            crawl_time: 0.1,
            extracted_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_job_validates_input() {
        let manager = manager(FakeEngine::fast());

        assert!(matches!(
            manager.create_job("not-a-url", CrawlConfig::default()),
            Err(ManagerError::Validation(_))
        ));
        let bad_config = CrawlConfig {
            timeout_seconds: 0,
            ..CrawlConfig::default()
        };
        assert!(matches!(
            manager.create_job("https://example.com", bad_config),
            Err(ManagerError::Validation(_))
        ));

        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        assert_eq!(job.status(), CrawlStatus::Pending);
        assert_eq!(manager.get_job(job.id()), Some(job));
        assert_eq!(manager.metrics().snapshot().jobs_created, 1);
    }

    #[tokio::test]
    async fn start_unknown_job_is_not_found() {
        let manager = manager(FakeEngine::fast());
        assert_eq!(
            manager.start_job("missing"),
            Err(ManagerError::NotFound("missing".to_string()))
        );
        assert_eq!(manager.active_tasks(), 0);
    }

    #[tokio::test]
    async fn job_runs_to_completion() {
        let manager = manager(FakeEngine::fast());
        let job = manager
            .create_job("https://example.com/a", CrawlConfig::default())
            .unwrap();

        assert_eq!(manager.start_job(job.id()), Ok(true));
        assert_eq!(manager.start_job(job.id()), Ok(false));

        let done = manager.wait_until_terminal(job.id(), POLL).await.unwrap();
        assert_eq!(done.status(), CrawlStatus::Completed);
        let result = done.result().unwrap();
        assert_eq!(result.content, "content of https://example.com/a");
        assert_eq!(result.title.as_deref(), Some("Page"));
        assert!(done.completed_at().is_some());

        manager.wait_for_tasks(POLL).await;
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.start_job(job.id()), Ok(false));
    }

    #[tokio::test]
    async fn engine_error_fails_job() {
        let manager = manager(FakeEngine::failing(500));
        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();

        let done = manager.wait_until_terminal(job.id(), POLL).await.unwrap();
        assert_eq!(done.status(), CrawlStatus::Failed);
        assert!(done.error_message().unwrap().contains("500"));
        assert!(done.result().is_none());
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.metrics().snapshot().jobs_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_respects_concurrency_limit() {
        let manager = CrawlJobManager::new(
            started(FakeEngine::slow(Duration::from_secs(10))),
            settings(2),
        );
        let jobs: Vec<CrawlJob> = (0..3)
            .map(|i| {
                manager
                    .create_job(&format!("https://example.com/{i}"), CrawlConfig::default())
                    .unwrap()
            })
            .collect();

        assert_eq!(manager.start_job(jobs[0].id()), Ok(true));
        assert_eq!(manager.start_job(jobs[1].id()), Ok(true));
        assert_eq!(
            manager.start_job(jobs[2].id()),
            Err(ManagerError::ConcurrencyLimit(2))
        );
        assert_eq!(
            manager.get_job(jobs[2].id()).unwrap().status(),
            CrawlStatus::Pending
        );
        assert_eq!(manager.running_count(), 2);

        manager.wait_until_terminal(jobs[0].id(), POLL).await;
        assert_eq!(manager.start_job(jobs[2].id()), Ok(true));

        let last = manager.wait_until_terminal(jobs[2].id(), POLL).await.unwrap();
        assert_eq!(last.status(), CrawlStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_running_job_releases_slot() {
        let manager = CrawlJobManager::new(
            started(FakeEngine::slow(Duration::from_secs(10))),
            settings(1),
        );
        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();
        tokio::task::yield_now().await;

        assert!(manager.cancel_job(job.id()));
        let cancelled = manager.get_job(job.id()).unwrap();
        assert_eq!(cancelled.status(), CrawlStatus::Cancelled);
        assert!(cancelled.completed_at().is_some());
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.active_tasks(), 0);
        assert!(!manager.cancel_job(job.id()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        let later = manager.get_job(job.id()).unwrap();
        assert_eq!(later.status(), CrawlStatus::Cancelled);
        assert!(later.result().is_none());

        let next = manager
            .create_job("https://example.com/next", CrawlConfig::default())
            .unwrap();
        assert_eq!(manager.start_job(next.id()), Ok(true));
    }

    #[tokio::test]
    async fn cancel_pending_job_prevents_start() {
        let manager = manager(FakeEngine::fast());
        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();

        assert!(manager.cancel_job(job.id()));
        assert_eq!(manager.start_job(job.id()), Ok(false));
        assert!(!manager.cancel_job("missing"));
        assert_eq!(manager.metrics().snapshot().jobs_cancelled, 1);
    }

    #[tokio::test]
    async fn list_jobs_newest_first_with_filter() {
        let manager = manager(FakeEngine::fast());
        let first = manager
            .create_job("https://a.com", CrawlConfig::default())
            .unwrap();
        let second = manager
            .create_job("https://b.com", CrawlConfig::default())
            .unwrap();
        let third = manager
            .create_job("https://c.com", CrawlConfig::default())
            .unwrap();
        manager.cancel_job(second.id());

        let all = manager.list_jobs(None, 10).unwrap();
        let ids: Vec<&str> = all.iter().map(CrawlJob::id).collect();
        assert_eq!(ids, vec![third.id(), second.id(), first.id()]);

        let pending = manager.list_jobs(Some(CrawlStatus::Pending), 1).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), third.id());

        let cancelled = manager.list_jobs_by_name(Some("cancelled"), 10).unwrap();
        assert_eq!(cancelled.len(), 1);

        assert!(matches!(
            manager.list_jobs(None, 0),
            Err(ManagerError::Validation(_))
        ));
        assert!(matches!(
            manager.list_jobs(None, 101),
            Err(ManagerError::Validation(_))
        ));
        assert!(matches!(
            manager.list_jobs_by_name(Some("invalid"), 10),
            Err(ManagerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_fail_policy_fails_job() {
        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .settings(ManagerConfig {
                rate_limit_policy: RateLimitPolicy::Fail,
                ..ManagerConfig::default()
            })
            .rate_limiter(Arc::new(RateLimiter::new(1, 3600)))
            .build();

        let first = manager
            .create_job("https://www.example.com/1", CrawlConfig::default())
            .unwrap();
        let second = manager
            .create_job("https://example.com/2", CrawlConfig::default())
            .unwrap();

        manager.start_job(first.id()).unwrap();
        let first = manager.wait_until_terminal(first.id(), POLL).await.unwrap();
        assert_eq!(first.status(), CrawlStatus::Completed);

        manager.start_job(second.id()).unwrap();
        let second = manager.wait_until_terminal(second.id(), POLL).await.unwrap();
        assert_eq!(second.status(), CrawlStatus::Failed);
        assert!(second
            .error_message()
            .unwrap()
            .starts_with("Rate limit exceeded for example.com"));
        assert_eq!(manager.metrics().snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn persist_skips_known_content() {
        let store = Arc::new(RecordingStore::default());
        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .integrations(
                Integrations::new()
                    .with_documents(store.clone())
                    .with_embedder(Arc::new(FixedEmbedder)),
            )
            .build();
        let result = sample_result("https://example.com", "same body");

        assert_eq!(
            manager.persist_crawl_result("job-1", &result).await,
            PersistOutcome::Stored
        );
        assert_eq!(
            manager.persist_crawl_result("job-2", &result).await,
            PersistOutcome::Duplicate
        );

        let stored = lock(&store.stored);
        assert_eq!(stored.len(), 1);
        let (metadata, had_embedding) = &stored[0];
        assert_eq!(metadata.crawl_job_id, "job-1");
        assert_eq!(metadata.title, "Crawled Content");
        assert!(had_embedding);
        assert!(manager.deduplicator().is_duplicate(&result.content_hash));
    }

    #[tokio::test]
    async fn store_duplicate_counts_as_success() {
        let store = Arc::new(RecordingStore::default());
        lock(&store.seen).insert(content_hash("body"));
        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .integrations(Integrations::new().with_documents(store.clone()))
            .build();

        let outcome = manager
            .persist_crawl_result("job-1", &sample_result("https://x.com", "body"))
            .await;
        assert_eq!(outcome, PersistOutcome::Duplicate);
        assert!(manager.deduplicator().is_duplicate(&content_hash("body")));
        assert_eq!(manager.metrics().snapshot().integration_failures, 0);
    }

    #[tokio::test]
    async fn noop_integrations_are_skipped() {
        let manager = manager(FakeEngine::fast());
        let result = sample_result("https://x.com", "body");

        assert_eq!(
            manager.persist_crawl_result("job-1", &result).await,
            PersistOutcome::Skipped
        );
        let job = CrawlJob::new("https://x.com", CrawlConfig::default());
        assert!(!manager.integrate_with_graph(&job, &result).await);
        assert!(manager.deduplicator().is_empty());
    }

    #[tokio::test]
    async fn completed_jobs_fan_out_once_per_content() {
        let store = Arc::new(RecordingStore::default());
        let graph = Arc::new(RecordingGraph::default());
        let manager = CrawlJobManager::builder(started(FakeEngine::constant("shared body")))
            .settings(ManagerConfig {
                episode_body_limit: 6,
                ..ManagerConfig::default()
            })
            .integrations(
                Integrations::new()
                    .with_documents(store.clone())
                    .with_graph(graph.clone()),
            )
            .build();

        let a = manager
            .create_job("https://example.com/a", CrawlConfig::default())
            .unwrap();
        let b = manager
            .create_job("https://example.com/b", CrawlConfig::default())
            .unwrap();
        manager.start_job(a.id()).unwrap();
        manager.start_job(b.id()).unwrap();
        manager.wait_for_tasks(POLL).await;

        assert_eq!(lock(&store.stored).len(), 1);
        let snap = manager.metrics().snapshot();
        assert_eq!(snap.documents_stored, 1);
        assert_eq!(snap.duplicates_skipped, 1);
        assert_eq!(snap.jobs_completed, 2);

        let episodes = lock(&graph.episodes);
        assert_eq!(episodes.len(), 2);
        let url_hash = content_hash("https://example.com/a");
        let expected = format!("crawl_{}_{}", a.id(), &url_hash[..8]);
        let episode = episodes.iter().find(|e| e.name == expected).unwrap();
        assert_eq!(episode.episode_body, "shared");
        assert_eq!(
            episode.source_description,
            "Crawled content from https://example.com/a"
        );
    }

    #[tokio::test]
    async fn store_failure_leaves_job_completed() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .integrations(Integrations::new().with_documents(store))
            .build();

        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();
        manager.wait_for_tasks(POLL).await;

        let done = manager.get_job(job.id()).unwrap();
        assert_eq!(done.status(), CrawlStatus::Completed);
        assert_eq!(manager.metrics().snapshot().integration_failures, 1);
        assert!(!manager.deduplicator().is_duplicate(&content_hash(
            "content of https://example.com"
        )));
    }

    #[tokio::test]
    async fn restore_fails_interrupted_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FjallLedger::open(dir.path().join("ledger")).unwrap();

        let pending = CrawlJob::new("https://a.com", CrawlConfig::default());
        let mut interrupted = CrawlJob::new("https://b.com", CrawlConfig::default());
        interrupted.mark_running().unwrap();
        ledger.upsert(&JobRecord::from(&pending)).unwrap();
        ledger.upsert(&JobRecord::from(&interrupted)).unwrap();

        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .ledger(ledger.clone())
            .build();
        assert_eq!(manager.restore().unwrap(), 2);
        assert_eq!(manager.restore().unwrap(), 0);

        let failed = manager.get_job(interrupted.id()).unwrap();
        assert_eq!(failed.status(), CrawlStatus::Failed);
        assert_eq!(failed.error_message(), Some("interrupted by shutdown"));
        assert_eq!(
            ledger.get(interrupted.id()).unwrap().unwrap().status,
            CrawlStatus::Failed
        );

        let ids: Vec<String> = manager
            .list_jobs(None, 10)
            .unwrap()
            .iter()
            .map(|j| j.id().to_string())
            .collect();
        assert_eq!(ids, vec![interrupted.id().to_string(), pending.id().to_string()]);

        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.start_job(pending.id()), Ok(true));
        let done = manager.wait_until_terminal(pending.id(), POLL).await.unwrap();
        assert_eq!(done.status(), CrawlStatus::Completed);
        assert_eq!(
            ledger.get(pending.id()).unwrap().unwrap().status,
            CrawlStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_in_flight_jobs() {
        let service = started(FakeEngine::slow(Duration::from_secs(10)));
        let manager = CrawlJobManager::new(Arc::clone(&service), ManagerConfig::default());
        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();
        tokio::task::yield_now().await;

        manager.shutdown().await;

        assert_eq!(
            manager.get_job(job.id()).unwrap().status(),
            CrawlStatus::Cancelled
        );
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.active_tasks(), 0);
        assert!(!service.health_check());
    }

    #[tokio::test]
    async fn stats_count_jobs_by_status() {
        let manager = manager(FakeEngine::fast());
        manager
            .create_job("https://a.com", CrawlConfig::default())
            .unwrap();
        let b = manager
            .create_job("https://b.com", CrawlConfig::default())
            .unwrap();
        manager.cancel_job(b.id());

        let stats = manager.stats();
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.by_status["pending"], 1);
        assert_eq!(stats.by_status["cancelled"], 1);
        assert_eq!(stats.by_status["running"], 0);
        assert_eq!(stats.max_concurrent_jobs, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_never_exceed_ceiling() {
        let manager = CrawlJobManager::new(
            started(FakeEngine::slow(Duration::from_secs(60))),
            settings(3),
        );
        let ids: Vec<String> = (0..24)
            .map(|i| {
                manager
                    .create_job(&format!("https://site{i}.example.com"), CrawlConfig::default())
                    .unwrap()
                    .id()
                    .to_string()
            })
            .collect();

        let barrier = Arc::new(tokio::sync::Barrier::new(ids.len()));
        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let manager = manager.clone();
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.start_job(&id)
                })
            })
            .collect();

        let mut started_jobs = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(true) => started_jobs += 1,
                Err(ManagerError::ConcurrencyLimit(3)) => refused += 1,
                other => panic!("unexpected start outcome: {other:?}"),
            }
        }

        assert_eq!(started_jobs, 3);
        assert_eq!(refused, 21);
        assert_eq!(manager.running_count(), 3);
        let running = manager.list_jobs(Some(CrawlStatus::Running), 100).unwrap();
        assert_eq!(running.len(), 3);

        manager.shutdown().await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn completed_result_matches_engine_page() {
        let engine = FakeEngine {
            content: Some("Test content".to_string()),
            links: vec![
                RawLink::Url("https://example.com/page1".to_string()),
                RawLink::Url("https://example.com/page2".to_string()),
                RawLink::Anchor {
                    href: Some("/page1".to_string()),
                    text: Some("Page 1 again".to_string()),
                },
            ],
            ..FakeEngine::fast()
        };
        let manager = manager(engine);
        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();

        let done = manager.wait_until_terminal(job.id(), POLL).await.unwrap();
        assert_eq!(done.status(), CrawlStatus::Completed);
        let result = done.result().unwrap();
        assert_eq!(result.content, "Test content");
        assert_eq!(result.content_size, 12);
        assert_eq!(result.content_hash, content_hash("Test content"));
        assert!(result.content_hash.starts_with("9d9595c5"));
        assert_eq!(
            result.links,
            vec![
                "https://example.com/page1".to_string(),
                "https://example.com/page2".to_string(),
            ]
        );
        assert_eq!(result.title.as_deref(), Some("Page"));
    }

    #[tokio::test]
    async fn graph_failure_leaves_job_completed() {
        let store = Arc::new(RecordingStore::default());
        let manager = CrawlJobManager::builder(started(FakeEngine::constant("Test content")))
            .integrations(
                Integrations::new()
                    .with_documents(store.clone())
                    .with_graph(Arc::new(FailingGraph)),
            )
            .build();

        let job = manager
            .create_job("https://example.com", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();
        manager.wait_for_tasks(POLL).await;

        let done = manager.get_job(job.id()).unwrap();
        assert_eq!(done.status(), CrawlStatus::Completed);
        assert!(done.error_message().is_none());
        let result = done.result().unwrap();
        assert_eq!(result.content, "Test content");
        assert_eq!(result.content_hash, content_hash("Test content"));

        assert_eq!(lock(&store.stored).len(), 1);
        let snap = manager.metrics().snapshot();
        assert_eq!(snap.integration_failures, 1);
        assert_eq!(snap.jobs_completed, 1);
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_request_rule_fails_job_and_frees_slot() {
        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .settings(settings(1))
            .rate_limiter(Arc::new(
                RateLimiter::new(30, 60).with_rule(RateLimitRule::new("blocked.com", 0, 60)),
            ))
            .build();

        let blocked = manager
            .create_job("https://www.blocked.com/page", CrawlConfig::default())
            .unwrap();
        manager.start_job(blocked.id()).unwrap();

        let done = manager.wait_until_terminal(blocked.id(), POLL).await.unwrap();
        assert_eq!(done.status(), CrawlStatus::Failed);
        assert!(done.error_message().unwrap().contains("blocked.com"));
        manager.wait_for_tasks(POLL).await;
        assert_eq!(manager.running_count(), 0);

        let other = manager
            .create_job("https://open.org", CrawlConfig::default())
            .unwrap();
        assert_eq!(manager.start_job(other.id()), Ok(true));
        let other = manager.wait_until_terminal(other.id(), POLL).await.unwrap();
        assert_eq!(other.status(), CrawlStatus::Completed);
    }

    #[tokio::test]
    async fn throttled_response_starts_host_cooldown() {
        let manager = CrawlJobManager::builder(started(FakeEngine::throttled(Some(
            Duration::from_secs(600),
        ))))
        .settings(ManagerConfig {
            rate_limit_policy: RateLimitPolicy::Fail,
            ..ManagerConfig::default()
        })
        .build();

        let first = manager
            .create_job("https://api.example.com/a", CrawlConfig::default())
            .unwrap();
        manager.start_job(first.id()).unwrap();
        let first = manager.wait_until_terminal(first.id(), POLL).await.unwrap();
        assert_eq!(first.status(), CrawlStatus::Failed);
        assert!(first.error_message().unwrap().contains("429"));

        let limiter = manager.rate_limiter();
        assert!(!limiter.check("api.example.com"));
        assert!(limiter.time_until_reset("api.example.com") > Duration::from_secs(590));
        assert!(limiter.check("other.example.com"));

        // The next job to the same host is refused by the limiter, not the target
        let second = manager
            .create_job("https://api.example.com/b", CrawlConfig::default())
            .unwrap();
        manager.start_job(second.id()).unwrap();
        let second = manager.wait_until_terminal(second.id(), POLL).await.unwrap();
        assert!(second
            .error_message()
            .unwrap()
            .starts_with("Rate limit exceeded for api.example.com"));
        assert_eq!(manager.metrics().snapshot().rate_limited, 2);
    }

    #[tokio::test]
    async fn throttled_response_without_hint_uses_rule_cooldown() {
        let manager = CrawlJobManager::builder(started(FakeEngine::throttled(None)))
            .rate_limiter(Arc::new(
                RateLimiter::new(30, 60)
                    .with_default_cooldown(5)
                    .with_rule(RateLimitRule::new("slow.org", 30, 60).with_cooldown(900)),
            ))
            .build();

        let job = manager
            .create_job("https://slow.org", CrawlConfig::default())
            .unwrap();
        manager.start_job(job.id()).unwrap();
        let done = manager.wait_until_terminal(job.id(), POLL).await.unwrap();
        assert_eq!(done.status(), CrawlStatus::Failed);

        let wait = manager.rate_limiter().time_until_reset("slow.org");
        assert!(wait > Duration::from_secs(890) && wait <= Duration::from_secs(900));
    }

    #[tokio::test]
    async fn stored_metadata_carries_full_fingerprint() {
        let store = Arc::new(RecordingStore::default());
        let manager = CrawlJobManager::builder(started(FakeEngine::fast()))
            .integrations(Integrations::new().with_documents(store.clone()))
            .build();
        let mut result = sample_result("https://Example.com/docs/?utm_source=x", "body");
        result.title = Some("  Docs Home ".to_string());

        assert_eq!(
            manager.persist_crawl_result("job-1", &result).await,
            PersistOutcome::Stored
        );

        let stored = lock(&store.stored);
        let metadata = &stored[0].0;
        assert_eq!(metadata.content_hash, content_hash("body"));
        assert_eq!(metadata.url_hash, content_hash("https://example.com/docs"));
        assert_eq!(metadata.title_hash, Some(content_hash("docs home")));
    }
}
