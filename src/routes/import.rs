use std::convert::Infallible;
use std::path::{Path as FsPath, PathBuf};

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::progress::ProgressEvent;
use crate::models::task::{ImportRequest, TaskId, TaskRecord};
use crate::services::progress::{self, TAIL_INTERVAL};
use crate::services::queue::DispatchError;

const ARCHIVE_FIELD: &str = "image_zip";
const LEVEL_FIELD: &str = "json_level";
const COMMENT_FIELD: &str = "json_comment";

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize)]
pub struct TaskLogsResponse {
    pub task_id: TaskId,
    pub logs: Vec<ProgressEvent>,
}

/// Files saved from one submit request.
#[derive(Debug, Default)]
struct Uploads {
    archive: Option<PathBuf>,
    levels: Option<PathBuf>,
    comments: Option<PathBuf>,
}

impl Uploads {
    /// Remove every saved file. Used when the request is not accepted.
    async fn discard(self) {
        for path in [self.archive, self.levels, self.comments].into_iter().flatten() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove rejected upload");
            }
        }
    }
}

/// POST /api/v1/import/tasks: upload an archive (plus optional metadata
/// files) and start an import task.
pub async fn submit_import(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let mut uploads = Uploads::default();
    if let Err(status) = receive_uploads(&mut multipart, &state.upload_dir, &mut uploads).await {
        uploads.discard().await;
        return Err(status);
    }

    let Some(archive_path) = uploads.archive.clone() else {
        uploads.discard().await;
        return Err(StatusCode::BAD_REQUEST);
    };
    let request = ImportRequest {
        archive_path,
        level_overrides_path: uploads.levels.clone(),
        comment_overrides_path: uploads.comments.clone(),
        output_dir: state.results_dir.clone(),
    };

    match state.dispatcher.submit(request).await {
        Ok(task_id) => Ok(Json(SubmitResponse { task_id })),
        Err(e) => {
            let status = match e {
                DispatchError::Invalid(reason) => {
                    tracing::warn!(reason = %reason, "Rejected import request");
                    StatusCode::BAD_REQUEST
                }
                other => {
                    tracing::error!(error = %other, "Failed to dispatch import task");
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            uploads.discard().await;
            Err(status)
        }
    }
}

async fn receive_uploads(
    multipart: &mut Multipart,
    upload_dir: &FsPath,
    uploads: &mut Uploads,
) -> Result<(), StatusCode> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let (slot, default_ext) = match field.name() {
            Some(ARCHIVE_FIELD) => (&mut uploads.archive, "zip"),
            Some(LEVEL_FIELD) => (&mut uploads.levels, "json"),
            Some(COMMENT_FIELD) => (&mut uploads.comments, "json"),
            _ => continue,
        };
        let extension = field
            .file_name()
            .and_then(|name| FsPath::new(name).extension())
            .and_then(|ext| ext.to_str())
            .unwrap_or(default_ext)
            .to_ascii_lowercase();
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        if data.is_empty() {
            continue;
        }
        let saved = save_upload(upload_dir, &extension, &data).await?;
        // A repeated field replaces the earlier upload.
        if let Some(previous) = slot.replace(saved) {
            let _ = tokio::fs::remove_file(previous).await;
        }
    }
    Ok(())
}

async fn save_upload(dir: &FsPath, extension: &str, data: &[u8]) -> Result<PathBuf, StatusCode> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        tracing::error!(dir = %dir.display(), error = %e, "Failed to create upload directory");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let path = dir.join(format!("{}.{extension}", Uuid::new_v4()));
    tokio::fs::write(&path, data).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to save upload");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(path)
}

/// GET /api/v1/import/tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskRecord>, StatusCode> {
    match state.tasks.get(task_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Failed to load task record");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// GET /api/v1/import/tasks/{task_id}/logs: every progress event so far.
pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskLogsResponse>, StatusCode> {
    let logs = state.progress.read_all(task_id).await.map_err(|e| {
        tracing::error!(task_id = %task_id, error = %e, "Failed to read progress log");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok(Json(TaskLogsResponse { task_id, logs }))
}

/// GET /api/v1/import/tasks/{task_id}/events: progress as server-sent
/// events. The stream stays open until the client goes away.
pub async fn task_event_stream(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(task_id = %task_id, "Progress subscriber connected");

    let stream = progress::tail(state.progress.clone(), task_id, TAIL_INTERVAL).filter_map(
        move |event| async move {
            match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to serialize progress event");
                    None
                }
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
