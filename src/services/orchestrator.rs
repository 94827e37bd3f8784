//! End-to-end import of one archive.
//!
//! Phases run in order `Preparing → Extracting → Recognizing → Finalizing`.
//! Recognition failures of single images are recorded and skipped; anything
//! else aborts the task. The staged workspace is removed on every exit path,
//! before the final progress event is emitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use strum::Display;

use crate::models::progress::ProgressEvent;
use crate::models::recognition::{FailureRecord, ImportCounts, ImportOutcome, RecognitionResult};
use crate::models::task::{ImportTask, TaskId};
use crate::services::metadata::{load_overrides, Overrides};
use crate::services::ocr::Recognizer;
use crate::services::progress::ProgressSink;
use crate::services::report::{self, ReportError, ReportPaths};
use crate::services::staging::{self, StagedWorkspace, StagingError};

const EMPTY_RESULT_REASON: &str = "识别失败";

const PROGRESS_PREPARING: u8 = 5;
const PROGRESS_EXTRACTING: u8 = 15;
const PROGRESS_RECOGNIZING: u8 = 25;
const PROGRESS_FINALIZING: u8 = 95;
const PROGRESS_DONE: u8 = 100;
/// Share of the bar covered by per-image recognition (25 → 95).
const RECOGNITION_SPAN: usize = 70;
/// Roughly how many progress events the recognition phase emits.
const RECOGNITION_UPDATES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ImportPhase {
    Preparing,
    Extracting,
    Recognizing,
    Finalizing,
    Done,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parent directory of per-task staging workspaces.
    pub staging_root: PathBuf,
}

/// Everything one run produced, including the per-image records.
#[derive(Debug, Clone)]
pub struct ImportRun {
    pub outcome: ImportOutcome,
    pub results: Vec<RecognitionResult>,
    pub failures: Vec<FailureRecord>,
}

pub struct ImportOrchestrator {
    recognizer: Arc<dyn Recognizer>,
    sink: Arc<dyn ProgressSink>,
    config: OrchestratorConfig,
}

/// Emits progress for one task, never letting the value go backwards.
struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    task_id: TaskId,
    last: u8,
}

impl ProgressReporter<'_> {
    async fn emit(&mut self, phase: ImportPhase, progress: u8, message: String) {
        let progress = progress.max(self.last);
        self.last = progress;
        tracing::info!(task_id = %self.task_id, phase = %phase, progress, message = %message, "Import progress");
        self.push(ProgressEvent::new(progress, message)).await;
    }

    async fn fail(&mut self, message: String) {
        self.last = PROGRESS_DONE;
        self.push(ProgressEvent::error(message)).await;
    }

    async fn push(&self, event: ProgressEvent) {
        if let Err(e) = self.sink.append(self.task_id, event).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "Failed to record progress event");
        }
    }
}

/// Everything a run accumulates, kept outside the fallible pipeline so that
/// cleanup and outcome reporting see it on every exit path.
#[derive(Default)]
struct RunState {
    workspace: Option<StagedWorkspace>,
    /// Set once recognition starts.
    total: Option<usize>,
    results: Vec<RecognitionResult>,
    failures: Vec<FailureRecord>,
}

impl RunState {
    fn counts(&self) -> Option<ImportCounts> {
        self.total.map(|total| ImportCounts {
            total,
            success: self.results.len(),
            failed: self.failures.len(),
        })
    }
}

impl ImportOrchestrator {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        sink: Arc<dyn ProgressSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            recognizer,
            sink,
            config,
        }
    }

    pub async fn run(&self, task: &ImportTask) -> ImportOutcome {
        self.run_with_details(task).await.outcome
    }

    pub async fn run_with_details(&self, task: &ImportTask) -> ImportRun {
        let start = Instant::now();
        metrics::counter!("import_tasks_total").increment(1);
        tracing::info!(
            task_id = %task.id,
            archive = %task.request.archive_path.display(),
            "Starting import task"
        );

        let mut reporter = ProgressReporter {
            sink: self.sink.as_ref(),
            task_id: task.id,
            last: 0,
        };
        let mut state = RunState::default();

        let result = self.execute(task, &mut reporter, &mut state).await;

        if let Some(workspace) = state.workspace.take() {
            release_workspace(task.id, workspace);
        }

        let outcome = match result {
            Ok((paths, log_written)) => {
                let counts = state.counts().unwrap_or_default();
                reporter
                    .emit(ImportPhase::Done, PROGRESS_DONE, "导入完成".to_string())
                    .await;
                metrics::histogram!("import_task_seconds").record(start.elapsed().as_secs_f64());
                tracing::info!(
                    task_id = %task.id,
                    total = counts.total,
                    success = counts.success,
                    failed = counts.failed,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Import task completed"
                );
                ImportOutcome::Success {
                    excel_path: paths.spreadsheet,
                    excel_url: paths.spreadsheet_url,
                    failure_log_path: log_written.then_some(paths.failure_log),
                    counts,
                }
            }
            Err(e) => {
                metrics::counter!("import_tasks_failed").increment(1);
                tracing::error!(task_id = %task.id, error = %e, "Import task failed");
                reporter.fail(format!("导入失败：{e}")).await;
                ImportOutcome::Error {
                    message: e.to_string(),
                    counts: state.counts(),
                }
            }
        };

        ImportRun {
            outcome,
            results: state.results,
            failures: state.failures,
        }
    }

    async fn execute(
        &self,
        task: &ImportTask,
        reporter: &mut ProgressReporter<'_>,
        state: &mut RunState,
    ) -> Result<(ReportPaths, bool), ImportError> {
        let request = &task.request;

        reporter
            .emit(ImportPhase::Preparing, PROGRESS_PREPARING, "正在准备导入环境…".to_string())
            .await;
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let levels = load_overrides(request.level_overrides_path.as_deref());
        let comments = load_overrides(request.comment_overrides_path.as_deref());

        reporter
            .emit(ImportPhase::Extracting, PROGRESS_EXTRACTING, "正在解压 ZIP…".to_string())
            .await;
        let archive = request.archive_path.clone();
        let staging_root = self.config.staging_root.clone();
        let staged =
            tokio::task::spawn_blocking(move || staging::stage_archive(&archive, &staging_root)).await??;
        let images = state.workspace.insert(staged).images()?;
        if images.is_empty() {
            return Err(ImportError::Extraction(StagingError::NoImages));
        }

        self.recognize_all(task, reporter, state, &images, &levels, &comments)
            .await?;

        reporter
            .emit(
                ImportPhase::Finalizing,
                PROGRESS_FINALIZING,
                "正在生成 Excel 结果文件…".to_string(),
            )
            .await;
        let paths = ReportPaths::new(&request.output_dir, Local::now());
        let log_written =
            write_reports(paths.clone(), state.results.clone(), state.failures.clone()).await?;

        Ok((paths, log_written))
    }

    async fn recognize_all(
        &self,
        task: &ImportTask,
        reporter: &mut ProgressReporter<'_>,
        state: &mut RunState,
        images: &[PathBuf],
        levels: &Overrides,
        comments: &Overrides,
    ) -> Result<(), ImportError> {
        let total = images.len();
        state.total = Some(total);
        reporter
            .emit(
                ImportPhase::Recognizing,
                PROGRESS_RECOGNIZING,
                format!("共找到 {total} 张图片，开始识别…"),
            )
            .await;

        let cadence = (total / RECOGNITION_UPDATES).max(1);

        for (index, image) in images.iter().enumerate() {
            if task.cancel.is_cancelled() {
                return Err(ImportError::Cancelled { processed: index });
            }
            if index % cadence == 0 {
                let progress = PROGRESS_RECOGNIZING as usize + index * RECOGNITION_SPAN / total;
                reporter
                    .emit(
                        ImportPhase::Recognizing,
                        progress as u8,
                        format!("正在处理 {}/{}…", index + 1, total),
                    )
                    .await;
            }

            let filename = file_name(image);
            match self.recognizer.recognize(image).await {
                Ok(recognition) if recognition.is_empty() => {
                    tracing::warn!(task_id = %task.id, image = %filename, "Empty recognition result");
                    metrics::counter!("import_images_failed").increment(1);
                    state.failures.push(FailureRecord::new(filename, EMPTY_RESULT_REASON));
                }
                Ok(recognition) => {
                    let mut result = RecognitionResult::new(&filename, recognition);
                    if let Some(level) = levels.get(&filename) {
                        result.level = level.clone();
                    }
                    if let Some(comment) = comments.get(&filename) {
                        result.comment = comment.clone();
                    }
                    metrics::counter!("import_images_recognized").increment(1);
                    state.results.push(result);
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.id, image = %filename, error = %e, "Recognition failed");
                    metrics::counter!("import_images_failed").increment(1);
                    state.failures.push(FailureRecord::new(filename, e.to_string()));
                }
            }
        }

        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn release_workspace(task_id: TaskId, workspace: StagedWorkspace) {
    let root = workspace.root().to_path_buf();
    match workspace.cleanup() {
        Ok(()) => tracing::debug!(task_id = %task_id, workspace = %root.display(), "Workspace removed"),
        Err(e) => tracing::warn!(
            task_id = %task_id,
            workspace = %root.display(),
            error = %e,
            "Failed to remove workspace"
        ),
    }
}

/// Write the spreadsheet, plus the failure log when there are failures.
/// Returns whether the failure log was written.
async fn write_reports(
    paths: ReportPaths,
    results: Vec<RecognitionResult>,
    failures: Vec<FailureRecord>,
) -> Result<bool, ImportError> {
    tokio::task::spawn_blocking(move || -> Result<bool, ReportError> {
        report::write_spreadsheet(&paths.spreadsheet, &results)?;
        if failures.is_empty() {
            return Ok(false);
        }
        report::write_failure_log(&paths.failure_log, &failures)?;
        Ok(true)
    })
    .await?
    .map_err(ImportError::Finalization)
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] StagingError),

    #[error("Finalization failed: {0}")]
    Finalization(#[from] ReportError),

    #[error("Import cancelled after {processed} images")]
    Cancelled { processed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
