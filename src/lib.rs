pub mod api;
pub mod config;
pub mod crawl;
pub mod dedup;
pub mod humanize;
pub mod integrations;
pub mod jobs;
pub mod ledger;
pub mod manager;
pub mod observability;
pub mod ratelimit;
