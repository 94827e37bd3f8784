use std::sync::Arc;

use crate::models::recognition::ImportOutcome;
use crate::models::task::{ImportTask, TaskRecord, TaskStatus};
use crate::services::orchestrator::ImportOrchestrator;
use crate::services::tasks::TaskStore;

/// Runs one import task and keeps its task record current.
pub struct ImportWorker {
    orchestrator: Arc<ImportOrchestrator>,
    tasks: Arc<dyn TaskStore>,
}

impl ImportWorker {
    pub fn new(orchestrator: Arc<ImportOrchestrator>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { orchestrator, tasks }
    }

    pub async fn execute(&self, task: ImportTask) -> ImportOutcome {
        self.record(TaskRecord::with_status(task.id, TaskStatus::Running, None))
            .await;

        let outcome = self.orchestrator.run(&task).await;
        let status = if outcome.is_success() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };

        self.record(TaskRecord::with_status(task.id, status, Some(outcome.clone())))
            .await;
        outcome
    }

    async fn record(&self, record: TaskRecord) {
        if let Err(e) = self.tasks.put(&record).await {
            tracing::error!(
                task_id = %record.task_id,
                status = %record.status,
                error = %e,
                "Failed to store task record"
            );
        }
    }
}
