use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crawlbox::api::{self, state::AppState};
use crawlbox::config::Config;
use crawlbox::crawl::{CrawlService, HttpCrawlerEngine};
use crawlbox::dedup::ContentDeduplicator;
use crawlbox::integrations::{HttpKnowledgeGraph, Integrations, ObjectDocumentStore, OllamaEmbedder};
use crawlbox::jobs::{CrawlStatus, JobRecord};
use crawlbox::ledger::FjallLedger;
use crawlbox::manager::CrawlJobManager;
use crawlbox::observability::Metrics;
use crawlbox::ratelimit::RateLimiter;
use tracing::{info, warn};

use crate::cli::CrawlArgs;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const CLI_POLL: Duration = Duration::from_millis(100);

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let mut config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    if let Some(address) = address {
        config.server.bind_addr = address;
    }

    let manager = build_manager(&config)?;
    manager.service().start();
    let restored = manager
        .restore()
        .map_err(|e| format!("Failed to restore jobs: {}", e))?;
    if restored > 0 {
        info!(restored, "Resumed job history from ledger");
    }

    let address = config.server.bind_addr;
    let state = AppState::new(config, manager.clone());
    api::serve(address, state, shutdown_signal()).await?;

    manager.shutdown().await;
    info!("CrawlBox stopped");
    Ok(())
}

/// Crawl one URL to completion and print the job record.
pub async fn crawl_once(args: CrawlArgs) -> Result<(), AnyError> {
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let mut crawl_config = config.crawl.to_crawl_config();
    if let Some(timeout) = args.timeout_seconds {
        crawl_config.timeout_seconds = timeout;
    }
    if let Some(user_agent) = args.user_agent {
        crawl_config.user_agent = user_agent;
    }
    if args.no_metadata {
        crawl_config.extract_metadata = false;
    }
    if args.no_redirects {
        crawl_config.follow_redirects = false;
    }

    let manager = build_manager(&config)?;
    manager.service().start();

    let job = manager.create_job(&args.url, crawl_config)?;
    manager.start_job(job.id())?;
    manager.wait_for_tasks(CLI_POLL).await;

    let job = manager
        .get_job(job.id())
        .ok_or_else(|| format!("job {} disappeared", job.id()))?;
    manager.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&JobRecord::from(&job))?);

    match job.status() {
        CrawlStatus::Completed => Ok(()),
        status => Err(format!(
            "crawl ended {}: {}",
            status,
            job.error_message().unwrap_or("no details")
        )
        .into()),
    }
}

/// Print the effective configuration as TOML.
pub fn print_config() -> Result<(), AnyError> {
    let config = Config::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn build_manager(config: &Config) -> Result<CrawlJobManager, AnyError> {
    let engine = HttpCrawlerEngine::new(Duration::from_secs(config.crawl.connect_timeout_seconds))?;
    let service = Arc::new(CrawlService::new(Arc::new(engine)));

    let rate_limiter = RateLimiter::new(
        config.rate_limits.default_max_requests,
        config.rate_limits.default_window_secs,
    )
    .with_default_cooldown(config.rate_limits.default_cooldown_secs)
    .with_rules(config.rate_limits.rules.iter().cloned());

    let mut builder = CrawlJobManager::builder(service)
        .settings(config.manager.clone())
        .rate_limiter(Arc::new(rate_limiter))
        .deduplicator(Arc::new(ContentDeduplicator::new()))
        .integrations(build_integrations(config)?)
        .metrics(Arc::new(Metrics::new()));

    if let Some(path) = &config.server.ledger_path {
        let ledger = FjallLedger::open(path)
            .map_err(|e| format!("Failed to open ledger: {}", e))?;
        builder = builder.ledger(ledger);
    }

    Ok(builder.build())
}

fn build_integrations(config: &Config) -> Result<Integrations, AnyError> {
    let settings = &config.integrations;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_seconds))
        .build()?;
    let mut integrations = Integrations::new();

    if let Some(path) = &settings.storage_path {
        info!(path = %path.display(), "Document store enabled");
        integrations = integrations.with_documents(Arc::new(ObjectDocumentStore::local(path)?));
    }
    if let Some(endpoint) = &settings.graph_endpoint {
        info!(endpoint = %endpoint, "Knowledge graph enabled");
        integrations = integrations.with_graph(Arc::new(HttpKnowledgeGraph::new(
            client.clone(),
            endpoint.clone(),
            settings.graph_api_key.clone(),
        )));
    }
    if let Some(endpoint) = &settings.embedding_endpoint {
        info!(endpoint = %endpoint, model = %settings.embedding_model, "Embeddings enabled");
        integrations = integrations.with_embedder(Arc::new(OllamaEmbedder::new(
            client,
            endpoint.clone(),
            settings.embedding_model.clone(),
        )));
    }

    Ok(integrations)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
