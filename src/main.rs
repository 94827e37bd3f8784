use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use hanzi_import::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        ocr::{HandwritingOcrClient, OcrSettings},
        orchestrator::{ImportOrchestrator, OrchestratorConfig},
        progress::{ProgressLog, RedisProgressLog},
        queue::{JobQueue, LocalDispatcher, QueueDispatcher, TaskDispatcher},
        storage::{ObjectStore, S3ImageStore},
        tasks::{RedisTaskStore, TaskStore},
        worker::ImportWorker,
    },
};

/// Archives of a few thousand scans fit comfortably.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing hanzi-import server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("import_tasks_total", "Total import tasks started");
    metrics::describe_counter!("import_tasks_failed", "Import tasks that ended in error");
    metrics::describe_counter!("import_images_recognized", "Images recognized successfully");
    metrics::describe_counter!("import_images_failed", "Images recorded as failures");
    metrics::describe_histogram!("import_task_seconds", "Wall time of a finished import task");
    metrics::describe_gauge!("import_queue_depth", "Import tasks waiting in the Redis queue");

    tracing::info!("Connecting to Redis");
    let progress = Arc::new(
        RedisProgressLog::new(&config.redis_url).expect("Failed to initialize progress log"),
    );
    let tasks: Arc<dyn TaskStore> =
        Arc::new(RedisTaskStore::new(&config.redis_url).expect("Failed to initialize task store"));
    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    let dispatcher: Arc<dyn TaskDispatcher> = if config.inline_workers > 0 {
        tracing::info!(workers = config.inline_workers, "Running imports in-process");
        let store = S3ImageStore::from_config(&config)
            .expect("Failed to initialize image storage")
            .map(|store| Arc::new(store) as Arc<dyn ObjectStore>);
        if store.is_none() {
            tracing::warn!("Image storage credentials missing; every recognition will fail");
        }
        let ocr = HandwritingOcrClient::new(OcrSettings::from_config(&config), store)
            .expect("Failed to initialize OCR client");
        let orchestrator = Arc::new(ImportOrchestrator::new(
            Arc::new(ocr),
            progress.clone(),
            OrchestratorConfig {
                staging_root: config.staging_root(),
            },
        ));
        let worker = Arc::new(ImportWorker::new(orchestrator, tasks.clone()));
        Arc::new(LocalDispatcher::new(worker, tasks.clone(), config.inline_workers))
    } else {
        tracing::info!("Dispatching imports to the Redis queue");
        Arc::new(QueueDispatcher::new(queue.clone(), tasks.clone()))
    };

    let results_dir = config.results_dir();
    let progress: Arc<dyn ProgressLog> = progress;
    let state = AppState::new(&config, dispatcher, progress, tasks, Some(queue));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/import/tasks", post(routes::import::submit_import))
        .route(
            "/api/v1/import/tasks/{task_id}",
            get(routes::import::get_task),
        )
        .route(
            "/api/v1/import/tasks/{task_id}/logs",
            get(routes::import::get_task_logs),
        )
        .route(
            "/api/v1/import/tasks/{task_id}/events",
            get(routes::import::task_event_stream),
        )
        .with_state(state)
        // Generated spreadsheets and failure logs
        .nest_service("/media/import_results", ServeDir::new(results_dir))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES));

    tracing::info!("Starting hanzi-import on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
