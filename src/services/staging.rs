use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg"];
const MAX_ARCHIVE_ENTRIES: usize = 10_000;
const MAX_ENTRY_UNCOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

/// Isolated directory holding the images extracted from one archive.
///
/// Removed by [`StagedWorkspace::cleanup`], or on drop if cleanup never ran.
#[derive(Debug)]
pub struct StagedWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl StagedWorkspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_dir(&self) -> PathBuf {
        self.root.join("img")
    }

    /// Image files in the workspace, sorted by filename.
    pub fn images(&self) -> Result<Vec<PathBuf>, StagingError> {
        let mut images = Vec::new();
        for entry in fs::read_dir(self.image_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry.file_name().to_str().is_some_and(is_image_name) {
                images.push(entry.path());
            }
        }
        images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(images)
    }

    /// Remove the workspace. Consumes self so it can only happen once.
    pub fn cleanup(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// Case-insensitive match on the raster suffixes the importer accepts.
pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Extract every image entry of `archive` into a fresh workspace under
/// `staging_root`, flattened to base filenames.
///
/// Colliding base names overwrite each other (last entry wins). On any
/// error the partially populated workspace is removed before returning.
pub fn stage_archive(archive: &Path, staging_root: &Path) -> Result<StagedWorkspace, StagingError> {
    fs::create_dir_all(staging_root)?;

    // The TempDir removes itself if any step below bails out.
    let dir = tempfile::Builder::new()
        .prefix("import-")
        .tempdir_in(staging_root)?;
    let img_dir = dir.path().join("img");
    fs::create_dir_all(&img_dir)?;

    let extracted = match extract_images(archive, &img_dir) {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(archive = %archive.display(), error = %e, "Failed to extract archive");
            return Err(e);
        }
    };

    if extracted == 0 {
        tracing::warn!(archive = %archive.display(), "Archive contains no images");
        return Err(StagingError::NoImages);
    }

    tracing::debug!(
        archive = %archive.display(),
        workspace = %dir.path().display(),
        extracted,
        "Archive staged"
    );

    let root = dir.path().to_path_buf();
    Ok(StagedWorkspace {
        dir: Some(dir),
        root,
    })
}

/// Last path segment of a raw entry name, whatever its directories say.
///
/// Absolute and `..`-laden names are kept; only the basename is ever
/// written, so extraction stays inside the workspace.
fn entry_basename(name: &str) -> Option<&str> {
    if name.contains('\0') {
        return None;
    }
    name.rsplit(['/', '\\'])
        .next()
        .filter(|base| !base.is_empty() && *base != "." && *base != "..")
}

fn extract_images(archive: &Path, img_dir: &Path) -> Result<usize, StagingError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;

    if zip.len() > MAX_ARCHIVE_ENTRIES {
        return Err(StagingError::Limit(format!(
            "archive has {} entries, limit is {}",
            zip.len(),
            MAX_ARCHIVE_ENTRIES
        )));
    }

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(base) = entry_basename(entry.name()).map(str::to_string) else {
            continue;
        };
        if !is_image_name(&base) {
            continue;
        }
        if entry.size() > MAX_ENTRY_UNCOMPRESSED_BYTES {
            return Err(StagingError::Limit(format!(
                "entry '{}' is {} bytes, limit is {}",
                entry.name(),
                entry.size(),
                MAX_ENTRY_UNCOMPRESSED_BYTES
            )));
        }

        let mut target = File::create(img_dir.join(&base))?;
        io::copy(&mut entry, &mut target)?;
        extracted += 1;
    }

    Ok(extracted)
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive contains no image files")]
    NoImages,

    #[error("Archive rejected: {0}")]
    Limit(String),

    #[error("Staging I/O error: {0}")]
    Io(#[from] io::Error),
}
