use std::sync::Arc;

use crate::config::Config;
use crate::manager::CrawlJobManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: CrawlJobManager,
}

impl AppState {
    pub fn new(config: Config, manager: CrawlJobManager) -> Self {
        Self {
            config: Arc::new(config),
            manager,
        }
    }
}
