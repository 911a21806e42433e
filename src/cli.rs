use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "crawlbox")]
#[command(about = "CrawlBox crawl job orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Server(ServerArgs),
    /// Crawl a single URL and print the finished job
    Crawl(CrawlArgs),
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides `server.bind_addr`)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct CrawlArgs {
    /// URL to crawl
    pub url: String,
    /// Per-crawl timeout in seconds
    #[arg(long)]
    pub timeout_seconds: Option<u64>,
    /// User-Agent header sent with the request
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Skip page metadata extraction
    #[arg(long)]
    pub no_metadata: bool,
    /// Do not follow redirects
    #[arg(long)]
    pub no_redirects: bool,
}
