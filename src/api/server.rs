use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{cancel_crawl, create_crawl, get_crawl, health, list_crawls, start_crawl},
    state::AppState,
};

/// All API routes bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/crawl", post(create_crawl).get(list_crawls))
        .route("/crawl/{job_id}", get(get_crawl))
        .route("/crawl/{job_id}/start", post(start_crawl))
        .route("/crawl/{job_id}/cancel", post(cancel_crawl))
        .route("/health", get(health))
        .with_state(state)
        // Clients may gzip large create requests
        .layer(RequestDecompressionLayer::new())
}

/// Serve the API on `address` until `shutdown` resolves.
pub async fn serve<F>(address: SocketAddr, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = TcpListener::bind(address).await?;
    info!(%address, "CrawlBox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
