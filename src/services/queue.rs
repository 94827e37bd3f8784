use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use garde::Validate;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::task::{ImportRequest, ImportTask, TaskId, TaskRecord};
use crate::services::tasks::{TaskStore, TaskStoreError};
use crate::services::worker::ImportWorker;

const QUEUE_KEY: &str = "hanzi_import:jobs";
const PROCESSING_KEY: &str = "hanzi_import:processing";

/// Hands import requests to whatever executes them.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Record the task as pending and dispatch it, returning immediately.
    async fn submit(&self, request: ImportRequest) -> Result<TaskId, DispatchError>;
}

fn validate(request: &ImportRequest) -> Result<(), DispatchError> {
    request
        .validate()
        .map_err(|report| DispatchError::Invalid(report.to_string()))
}

/// Job payload serialized into Redis.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedImport {
    pub task_id: TaskId,
    pub request: ImportRequest,
}

/// Redis-backed job queue consumed by the worker binary.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue an import job.
    pub async fn enqueue(&self, job: &QueuedImport) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Dequeue a job for processing (pop with move to the processing list).
    pub async fn dequeue(&self) -> Result<Option<QueuedImport>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job: QueuedImport = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Mark a job as complete (remove from the processing list).
    pub async fn complete(&self, job: &QueuedImport) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Dispatches through [`JobQueue`] to external worker processes.
pub struct QueueDispatcher {
    queue: Arc<JobQueue>,
    tasks: Arc<dyn TaskStore>,
}

impl QueueDispatcher {
    pub fn new(queue: Arc<JobQueue>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { queue, tasks }
    }
}

#[async_trait]
impl TaskDispatcher for QueueDispatcher {
    async fn submit(&self, request: ImportRequest) -> Result<TaskId, DispatchError> {
        validate(&request)?;
        let task_id = Uuid::new_v4();
        self.tasks.put(&TaskRecord::pending(task_id)).await?;
        self.queue.enqueue(&QueuedImport { task_id, request }).await?;
        tracing::info!(task_id = %task_id, "Import task queued");
        Ok(task_id)
    }
}

/// In-process worker pool: at most `workers` imports run at once.
pub struct LocalDispatcher {
    worker: Arc<ImportWorker>,
    tasks: Arc<dyn TaskStore>,
    permits: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl LocalDispatcher {
    pub fn new(worker: Arc<ImportWorker>, tasks: Arc<dyn TaskStore>, workers: usize) -> Self {
        Self {
            worker,
            tasks,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Request cancellation of a submitted task. Takes effect at the next
    /// image boundary. Returns false when the task is not running here.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let running = self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match running.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn submit(&self, request: ImportRequest) -> Result<TaskId, DispatchError> {
        validate(&request)?;
        let task_id = Uuid::new_v4();
        self.tasks.put(&TaskRecord::pending(task_id)).await?;

        let task = ImportTask::new(task_id, request);
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task_id, task.cancel.clone());

        let worker = self.worker.clone();
        let permits = self.permits.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => {
                    worker.execute(task).await;
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Worker pool closed, task dropped");
                }
            }
            running
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&task_id);
        });

        tracing::info!(task_id = %task_id, "Import task dispatched to local pool");
        Ok(task_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid import request: {0}")]
    Invalid(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Task store error: {0}")]
    Store(#[from] TaskStoreError),
}
