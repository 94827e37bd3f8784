use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::models::task::{TaskId, TaskRecord};
use crate::services::progress::PROGRESS_RETENTION;

/// Status and terminal outcome of import tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn put(&self, record: &TaskRecord) -> Result<(), TaskStoreError>;
    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, TaskStoreError>;
}

fn record_key(task_id: TaskId) -> String {
    format!("task_result:{task_id}")
}

/// Task records as JSON strings in Redis, with the progress log's retention.
pub struct RedisTaskStore {
    client: redis::Client,
}

impl RedisTaskStore {
    pub fn new(redis_url: &str) -> Result<Self, TaskStoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), TaskStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(record_key(record.task_id), payload, PROGRESS_RETENTION.as_secs())
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, TaskStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(record_key(task_id)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), TaskStoreError> {
        self.records.write().await.insert(record.task_id, record.clone());
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, TaskStoreError> {
        Ok(self.records.read().await.get(&task_id).cloned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
