use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_STRUCTURE: &str = "未知结构";
pub const DEFAULT_VARIANT: &str = "简体";
pub const DEFAULT_LEVEL: &str = "D";
pub const DEFAULT_COMMENT: &str = "无";

/// Characters read from one recognition unit.
///
/// A single character stays scalar; anything longer is split into an ordered
/// list of single characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recognition {
    Empty,
    Single(String),
    Multiple(Vec<String>),
}

impl Recognition {
    /// Classify already-concatenated text.
    pub fn from_text(text: &str) -> Self {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Recognition::Empty,
            (Some(c), None) => Recognition::Single(c.to_string()),
            _ => Recognition::Multiple(text.chars().map(String::from).collect()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Recognition::Empty => true,
            Recognition::Single(s) => s.is_empty(),
            Recognition::Multiple(v) => v.is_empty(),
        }
    }

    /// Flatten into the ordered character list.
    pub fn into_chars(self) -> Vec<String> {
        match self {
            Recognition::Empty => Vec::new(),
            Recognition::Single(s) => vec![s],
            Recognition::Multiple(v) => v,
        }
    }
}

impl fmt::Display for Recognition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recognition::Empty => Ok(()),
            Recognition::Single(s) => f.write_str(s),
            Recognition::Multiple(v) => f.write_str(&v.concat()),
        }
    }
}

/// A successfully recognized source image, ready for the result spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub source_filename: String,
    pub file_stem: String,
    pub characters: Recognition,
    pub structure: String,
    pub variant: String,
    pub level: String,
    pub comment: String,
}

impl RecognitionResult {
    pub fn new(source_filename: &str, characters: Recognition) -> Self {
        let file_stem = std::path::Path::new(source_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source_filename)
            .to_string();

        Self {
            source_filename: source_filename.to_string(),
            file_stem,
            characters,
            structure: DEFAULT_STRUCTURE.to_string(),
            variant: DEFAULT_VARIANT.to_string(),
            level: DEFAULT_LEVEL.to_string(),
            comment: DEFAULT_COMMENT.to_string(),
        }
    }
}

/// An image that produced no usable recognition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_filename: String,
    pub reason: String,
}

impl FailureRecord {
    pub fn new(source_filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_filename: source_filename.into(),
            reason: reason.into(),
        }
    }
}

/// Image tallies of a task that reached recognition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

/// Terminal summary of an import task.
///
/// An error outcome only carries counts when the task got as far as
/// recognizing images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    Success {
        excel_path: PathBuf,
        excel_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_log_path: Option<PathBuf>,
        #[serde(flatten)]
        counts: ImportCounts,
    },
    Error {
        message: String,
        #[serde(flatten)]
        counts: Option<ImportCounts>,
    },
}

impl ImportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ImportOutcome::Success { .. })
    }

    pub fn counts(&self) -> Option<ImportCounts> {
        match self {
            ImportOutcome::Success { counts, .. } => Some(*counts),
            ImportOutcome::Error { counts, .. } => *counts,
        }
    }
}
