use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::recognition::ImportOutcome;

/// Opaque identifier handed back to the submitter.
pub type TaskId = Uuid;

/// Lifecycle of an import task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Input references of an import, as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ImportRequest {
    #[garde(custom(non_empty_path))]
    pub archive_path: PathBuf,

    #[garde(skip)]
    pub level_overrides_path: Option<PathBuf>,

    #[garde(skip)]
    pub comment_overrides_path: Option<PathBuf>,

    #[garde(custom(non_empty_path))]
    pub output_dir: PathBuf,
}

fn non_empty_path(value: &PathBuf, _ctx: &()) -> garde::Result {
    if value.as_os_str().is_empty() {
        return Err(garde::Error::new("path must not be empty"));
    }
    Ok(())
}

/// A request bound to its task id, as executed by a worker.
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub id: TaskId,
    pub request: ImportRequest,
    /// Checked at every image boundary while recognizing.
    pub cancel: CancellationToken,
}

impl ImportTask {
    pub fn new(id: TaskId, request: ImportRequest) -> Self {
        Self {
            id,
            request,
            cancel: CancellationToken::new(),
        }
    }
}

/// Persisted view of a task: its status and, once terminal, its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub outcome: Option<ImportOutcome>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn pending(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            outcome: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(task_id: TaskId, status: TaskStatus, outcome: Option<ImportOutcome>) -> Self {
        Self {
            task_id,
            status,
            outcome,
            updated_at: Utc::now(),
        }
    }
}
