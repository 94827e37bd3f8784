use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a task's progress log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set to `"error"` on the terminal event of an aborted task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ProgressEvent {
    pub fn new(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: progress.min(100),
            message: message.into(),
            timestamp: Utc::now(),
            status: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some("error".to_string()),
            ..Self::new(100, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }
}
