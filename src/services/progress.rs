//! Per-task progress log.
//!
//! The orchestrator appends through [`ProgressSink`]. Pollers read the whole
//! log, and subscribers tail it with their own offset via [`tail`]. A task's
//! log expires as a whole after [`PROGRESS_RETENTION`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::Stream;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::models::progress::ProgressEvent;
use crate::models::task::TaskId;

pub const PROGRESS_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const TAIL_INTERVAL: Duration = Duration::from_secs(1);

/// Where the orchestrator reports progress.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn append(&self, task_id: TaskId, event: ProgressEvent) -> Result<(), ProgressError>;
}

/// A progress sink that can also be read back.
#[async_trait]
pub trait ProgressLog: ProgressSink {
    async fn len(&self, task_id: TaskId) -> Result<usize, ProgressError>;

    /// Events from `offset` (inclusive) to the current end.
    async fn read_from(&self, task_id: TaskId, offset: usize) -> Result<Vec<ProgressEvent>, ProgressError>;

    async fn read_all(&self, task_id: TaskId) -> Result<Vec<ProgressEvent>, ProgressError> {
        self.read_from(task_id, 0).await
    }
}

fn log_key(task_id: TaskId) -> String {
    format!("task_logs:{task_id}")
}

/// Redis list per task, refreshed to expire after the retention window on
/// every append.
pub struct RedisProgressLog {
    client: redis::Client,
}

impl RedisProgressLog {
    pub fn new(redis_url: &str) -> Result<Self, ProgressError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProgressSink for RedisProgressLog {
    async fn append(&self, task_id: TaskId, event: ProgressEvent) -> Result<(), ProgressError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = log_key(task_id);
        let payload = serde_json::to_string(&event)?;
        conn.rpush::<_, _, ()>(&key, payload).await?;
        conn.expire::<_, ()>(&key, PROGRESS_RETENTION.as_secs() as i64).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressLog for RedisProgressLog {
    async fn len(&self, task_id: TaskId) -> Result<usize, ProgressError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: usize = conn.llen(log_key(task_id)).await?;
        Ok(len)
    }

    async fn read_from(&self, task_id: TaskId, offset: usize) -> Result<Vec<ProgressEvent>, ProgressError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Vec<String> = conn.lrange(log_key(task_id), offset as isize, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|item| match serde_json::from_str(item) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Skipping undecodable progress entry");
                    None
                }
            })
            .collect())
    }
}

struct TaskLog {
    created: Instant,
    events: Vec<ProgressEvent>,
}

/// In-process progress log for inline workers and tests.
pub struct MemoryProgressLog {
    logs: RwLock<HashMap<TaskId, TaskLog>>,
    retention: Duration,
}

impl Default for MemoryProgressLog {
    fn default() -> Self {
        Self::new(PROGRESS_RETENTION)
    }
}

impl MemoryProgressLog {
    pub fn new(retention: Duration) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    fn expired(&self, log: &TaskLog) -> bool {
        log.created.elapsed() >= self.retention
    }

    /// Drop every log past its retention window.
    pub async fn purge_expired(&self) -> usize {
        let mut logs = self.logs.write().await;
        let before = logs.len();
        logs.retain(|_, log| log.created.elapsed() < self.retention);
        before - logs.len()
    }
}

#[async_trait]
impl ProgressSink for MemoryProgressLog {
    async fn append(&self, task_id: TaskId, event: ProgressEvent) -> Result<(), ProgressError> {
        let mut logs = self.logs.write().await;
        let retention = self.retention;
        let log = logs.entry(task_id).or_insert_with(|| TaskLog {
            created: Instant::now(),
            events: Vec::new(),
        });
        if log.created.elapsed() >= retention {
            log.created = Instant::now();
            log.events.clear();
        }
        log.events.push(event);
        Ok(())
    }
}

#[async_trait]
impl ProgressLog for MemoryProgressLog {
    async fn len(&self, task_id: TaskId) -> Result<usize, ProgressError> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(&task_id)
            .filter(|log| !self.expired(log))
            .map_or(0, |log| log.events.len()))
    }

    async fn read_from(&self, task_id: TaskId, offset: usize) -> Result<Vec<ProgressEvent>, ProgressError> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(&task_id)
            .filter(|log| !self.expired(log))
            .map(|log| log.events.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }
}

/// Endless stream of newly appended events for `task_id`.
///
/// Each stream keeps its own read offset and polls every `interval`. It
/// never ends on its own; dropping it is the way to unsubscribe.
pub fn tail(
    log: Arc<dyn ProgressLog>,
    task_id: TaskId,
    interval: Duration,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    async_stream::stream! {
        let mut offset = 0usize;
        loop {
            match log.read_from(task_id, offset).await {
                Ok(events) => {
                    offset += events.len();
                    for event in events {
                        yield event;
                    }
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Progress read failed, retrying");
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
