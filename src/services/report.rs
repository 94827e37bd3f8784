use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::models::recognition::{FailureRecord, RecognitionResult};

/// Public prefix the results directory is served under.
pub const RESULTS_URL_PREFIX: &str = "/media/import_results";

const COLUMNS: [&str; 7] = [
    "character",
    "structure",
    "variant",
    "level",
    "comment",
    "image_path",
    "file_name",
];

/// Output locations of one import, sharing a timestamp suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub spreadsheet: PathBuf,
    pub spreadsheet_url: String,
    pub failure_log: PathBuf,
}

impl ReportPaths {
    pub fn new(output_dir: &Path, now: DateTime<Local>) -> Self {
        let stamp = now.format("%Y%m%d%H%M%S");
        let spreadsheet_name = format!("hanzi_import_{stamp}.xlsx");
        Self {
            spreadsheet: output_dir.join(&spreadsheet_name),
            spreadsheet_url: format!("{RESULTS_URL_PREFIX}/{spreadsheet_name}"),
            failure_log: output_dir.join(format!("hanzi_import_{stamp}_failed.log")),
        }
    }
}

/// Write one row per recognized image, with a header row.
pub fn write_spreadsheet(path: &Path, results: &[RecognitionResult]) -> Result<(), ReportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, name) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &header)?;
    }

    for (i, result) in results.iter().enumerate() {
        let row = i as u32 + 1;
        let characters = result.characters.to_string();
        let cells = [
            characters.as_str(),
            result.structure.as_str(),
            result.variant.as_str(),
            result.level.as_str(),
            result.comment.as_str(),
            result.file_stem.as_str(),
            result.file_stem.as_str(),
        ];
        for (col, value) in cells.iter().enumerate() {
            sheet.write_string(row, col as u16, *value)?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Write `filename: reason` per failure.
pub fn write_failure_log(path: &Path, failures: &[FailureRecord]) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for failure in failures {
        writeln!(writer, "{}: {}", failure.source_filename, failure.reason)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write spreadsheet: {0}")]
    Spreadsheet(#[from] XlsxError),

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
}
