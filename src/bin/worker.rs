use hanzi_import::{
    config::AppConfig,
    models::task::ImportTask,
    services::{
        ocr::{HandwritingOcrClient, OcrSettings},
        orchestrator::{ImportOrchestrator, OrchestratorConfig},
        progress::RedisProgressLog,
        queue::{JobQueue, QueueError},
        storage::{ObjectStore, S3ImageStore},
        tasks::RedisTaskStore,
        worker::ImportWorker,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting hanzi import worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Initializing services");
    let store = S3ImageStore::from_config(&config)
        .expect("Failed to initialize image storage")
        .map(|store| Arc::new(store) as Arc<dyn ObjectStore>);
    if store.is_none() {
        tracing::warn!("Image storage credentials missing; every recognition will fail");
    }

    let ocr = HandwritingOcrClient::new(OcrSettings::from_config(&config), store)
        .expect("Failed to initialize OCR client");
    let progress =
        RedisProgressLog::new(&config.redis_url).expect("Failed to initialize progress log");
    let tasks = RedisTaskStore::new(&config.redis_url).expect("Failed to initialize task store");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let orchestrator = Arc::new(ImportOrchestrator::new(
        Arc::new(ocr),
        Arc::new(progress),
        OrchestratorConfig {
            staging_root: config.staging_root(),
        },
    ));
    let worker = ImportWorker::new(orchestrator, Arc::new(tasks));

    tracing::info!("Worker ready, starting import loop");

    loop {
        match process_next_task(&queue, &worker).await {
            Ok(true) => {
                tracing::debug!("Task processed, checking for next task");
            }
            Ok(false) => {
                tracing::trace!("No tasks available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue error, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Run the next queued import, if any. Returns Ok(false) when the queue is
/// empty.
///
/// Import failures end up in the task's outcome, so only queue errors
/// surface here.
async fn process_next_task(queue: &JobQueue, worker: &ImportWorker) -> Result<bool, QueueError> {
    let job = match queue.dequeue().await? {
        Some(job) => job,
        None => return Ok(false),
    };

    tracing::info!(
        task_id = %job.task_id,
        archive = %job.request.archive_path.display(),
        "Processing import task"
    );

    let outcome = worker
        .execute(ImportTask::new(job.task_id, job.request.clone()))
        .await;
    queue.complete(&job).await?;

    tracing::info!(
        task_id = %job.task_id,
        success = outcome.is_success(),
        "Import task finished"
    );
    Ok(true)
}
