use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Longest edge a composite may have before its cells are scaled down.
pub const MAX_CANVAS_EDGE: u32 = 2160;
const JPEG_QUALITY: u8 = 95;

/// Columns by rows of a composite grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub cols: u32,
    pub rows: u32,
}

impl Default for GridShape {
    fn default() -> Self {
        Self { cols: 10, rows: 10 }
    }
}

impl GridShape {
    pub fn capacity(&self) -> usize {
        (self.cols as usize) * (self.rows as usize)
    }
}

/// Geometry of one composite canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub cols: u32,
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl CanvasLayout {
    pub fn width(&self) -> u32 {
        self.cols * self.cell_width
    }

    pub fn height(&self) -> u32 {
        self.rows * self.cell_height
    }
}

/// Size a canvas for `count` tiles whose first tile is `first` pixels.
///
/// Cells keep the first tile's native size unless the canvas would exceed
/// [`MAX_CANVAS_EDGE`], in which case every cell shrinks by the same factor
/// so the dominant axis fits the budget.
pub fn plan_layout(count: usize, grid: GridShape, first: (u32, u32)) -> CanvasLayout {
    let count = count.max(1) as u32;
    let cols = grid.cols.min(count);
    let rows = count.div_ceil(grid.cols);
    let (mut cell_width, mut cell_height) = first;

    let full_width = cell_width as u64 * cols as u64;
    let full_height = cell_height as u64 * rows as u64;
    let dominant = full_width.max(full_height);
    if dominant > MAX_CANVAS_EDGE as u64 {
        // scale = budget / dominant, applied in integers to floor exactly
        let budget = MAX_CANVAS_EDGE as u64;
        cell_width = ((cell_width as u64 * budget / dominant) as u32).max(1);
        cell_height = ((cell_height as u64 * budget / dominant) as u32).max(1);
    }

    CanvasLayout {
        cols,
        rows,
        cell_width,
        cell_height,
    }
}

/// Tile `paths` into composites of at most `grid.capacity()` images each,
/// written to the system temp dir.
///
/// Returns one kept JPEG per chunk, in chunk order. The caller owns the
/// returned files.
pub fn merge_images(paths: &[PathBuf], grid: GridShape) -> Result<Vec<PathBuf>, MergeError> {
    merge_images_in(paths, grid, &std::env::temp_dir())
}

/// [`merge_images`] writing composites into `out_dir`. Nothing is left
/// behind when an error is returned.
pub fn merge_images_in(paths: &[PathBuf], grid: GridShape, out_dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    if paths.is_empty() {
        return Err(MergeError::Empty);
    }
    if grid.cols == 0 || grid.rows == 0 {
        return Err(MergeError::InvalidGrid(grid.cols, grid.rows));
    }

    let mut merged = Vec::new();
    for (index, chunk) in paths.chunks(grid.capacity()).enumerate() {
        let path = match merge_chunk(chunk, grid, out_dir) {
            Ok(path) => path,
            Err(e) => {
                remove_composites(&merged);
                return Err(e);
            }
        };
        tracing::debug!(chunk = index, images = chunk.len(), path = %path.display(), "Composite written");
        merged.push(path);
    }
    Ok(merged)
}

/// Best-effort removal of composites written by [`merge_images`].
pub fn remove_composites(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove composite");
        }
    }
}

fn merge_chunk(chunk: &[PathBuf], grid: GridShape, out_dir: &Path) -> Result<PathBuf, MergeError> {
    let mut tiles = Vec::with_capacity(chunk.len());
    for path in chunk {
        let img = image::open(path).map_err(|source| MergeError::Decode {
            path: path.clone(),
            source,
        })?;
        tiles.push(img.to_rgb8());
    }

    let first = tiles[0].dimensions();
    let layout = plan_layout(tiles.len(), grid, first);
    let mut canvas = RgbImage::from_pixel(layout.width(), layout.height(), Rgb([255, 255, 255]));

    for (i, tile) in tiles.iter().enumerate() {
        let i = i as u32;
        let x = (i % grid.cols) * layout.cell_width;
        let y = (i / grid.cols) * layout.cell_height;
        if tile.dimensions() == (layout.cell_width, layout.cell_height) {
            imageops::replace(&mut canvas, tile, x as i64, y as i64);
        } else {
            let resized = imageops::resize(tile, layout.cell_width, layout.cell_height, FilterType::Lanczos3);
            imageops::replace(&mut canvas, &resized, x as i64, y as i64);
        }
    }

    let mut tmp = tempfile::Builder::new()
        .prefix("merged-")
        .suffix(".jpg")
        .tempfile_in(out_dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        encoder.encode_image(&canvas)?;
        writer.flush()?;
    }

    tmp.into_temp_path().keep().map_err(|e| MergeError::Io(e.error))
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("No images to merge")]
    Empty,

    #[error("Invalid grid {0}x{1}")]
    InvalidGrid(u32, u32),

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to encode composite: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Composite I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_tiles(dir: &Path, count: usize, width: u32, height: u32) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("{i:03}.png"));
                RgbImage::from_pixel(width, height, Rgb([0, 0, 0])).save(&path).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_layout_short_row() {
        let layout = plan_layout(7, GridShape::default(), (20, 30));
        assert_eq!((layout.cols, layout.rows), (7, 1));
        assert_eq!((layout.width(), layout.height()), (140, 30));
    }

    #[test]
    fn test_layout_partial_grid() {
        let layout = plan_layout(23, GridShape::default(), (20, 30));
        assert_eq!((layout.cols, layout.rows), (10, 3));
    }

    #[test]
    fn test_layout_scales_to_budget() {
        let layout = plan_layout(10, GridShape::default(), (300, 300));
        assert_eq!(layout.width(), MAX_CANVAS_EDGE);
        assert_eq!(layout.cell_height, 216);
        assert!(layout.height() <= MAX_CANVAS_EDGE);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(merge_images(&[], GridShape::default()), Err(MergeError::Empty)));
    }

    #[test]
    fn test_seven_images_make_one_row() {
        let tmp = tempfile::tempdir().unwrap();
        let tiles = write_tiles(tmp.path(), 7, 20, 30);
        let merged = merge_images(&tiles, GridShape::default()).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(image::image_dimensions(&merged[0]).unwrap(), (140, 30));
        for path in merged {
            std::fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_chunks_split_only_at_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let tiles = write_tiles(tmp.path(), 23, 8, 8);
        let merged = merge_images(&tiles, GridShape::default()).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(image::image_dimensions(&merged[0]).unwrap(), (80, 24));

        let tiles = write_tiles(tmp.path(), 101, 8, 8);
        let merged_101 = merge_images(&tiles, GridShape::default()).unwrap();
        assert_eq!(merged_101.len(), 2);
        assert_eq!(image::image_dimensions(&merged_101[1]).unwrap(), (8, 8));

        for path in merged.into_iter().chain(merged_101) {
            std::fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_mismatched_tiles_are_resized_to_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tiles = write_tiles(tmp.path(), 1, 10, 10);
        let odd = tmp.path().join("odd.png");
        RgbImage::from_pixel(25, 5, Rgb([9, 9, 9])).save(&odd).unwrap();
        tiles.push(odd);

        let merged = merge_images(&tiles, GridShape { cols: 2, rows: 1 }).unwrap();
        assert_eq!(image::image_dimensions(&merged[0]).unwrap(), (20, 10));
        std::fs::remove_file(&merged[0]).unwrap();
    }

    #[test]
    fn test_undecodable_chunk_removes_earlier_composites() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let mut tiles = write_tiles(tmp.path(), 2, 8, 8);
        let broken = tmp.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();
        tiles.push(broken);

        let err = merge_images_in(&tiles, GridShape { cols: 1, rows: 2 }, &out).unwrap_err();
        assert!(matches!(err, MergeError::Decode { .. }));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }
}
