use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    progress::ProgressLog,
    queue::{JobQueue, TaskDispatcher},
    tasks::TaskStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub progress: Arc<dyn ProgressLog>,
    pub tasks: Arc<dyn TaskStore>,
    /// Redis handle for the health check. `None` with in-memory stores.
    pub queue: Option<Arc<JobQueue>>,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        dispatcher: Arc<dyn TaskDispatcher>,
        progress: Arc<dyn ProgressLog>,
        tasks: Arc<dyn TaskStore>,
        queue: Option<Arc<JobQueue>>,
    ) -> Self {
        Self {
            dispatcher,
            progress,
            tasks,
            queue,
            upload_dir: config.upload_dir(),
            results_dir: config.results_dir(),
        }
    }
}
