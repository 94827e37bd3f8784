//! Shared builders and fakes for the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use hanzi_import::models::recognition::Recognition;
use hanzi_import::services::ocr::{OcrError, Recognizer};
use hanzi_import::services::storage::{ObjectStore, StorageError};
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Encode a solid-colour PNG.
pub fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}

pub fn write_png(path: &Path, width: u32, height: u32) -> PathBuf {
    std::fs::write(path, png_bytes(width, height, 0)).expect("Failed to write PNG");
    path.to_path_buf()
}

/// Write a ZIP archive holding `entries` as (name, bytes) pairs.
pub fn write_archive(path: &Path, entries: &[(&str, Vec<u8>)]) -> PathBuf {
    let file = std::fs::File::create(path).expect("Failed to create archive");
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("Failed to start archive entry");
        zip.write_all(data).expect("Failed to write archive entry");
    }
    zip.finish().expect("Failed to finish archive");
    path.to_path_buf()
}

/// Archive of `count` small PNGs named `img01.png`, `img02.png`, ...
pub fn image_archive(path: &Path, count: usize) -> PathBuf {
    let entries: Vec<(String, Vec<u8>)> = (1..=count)
        .map(|i| (format!("img{i:02}.png"), png_bytes(4, 4, i as u8)))
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.clone()))
        .collect();
    write_archive(path, &borrowed)
}

fn file_name(image: &Path) -> String {
    image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// What a [`ScriptedRecognizer`] answers for one file.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(&'static str),
    Fail(&'static str),
}

/// Answers per file name, falling back to a single fixed character.
pub struct ScriptedRecognizer {
    replies: HashMap<String, Reply>,
    fallback: &'static str,
    seen: Mutex<Vec<String>>,
}

impl ScriptedRecognizer {
    pub fn new(fallback: &'static str) -> Self {
        Self {
            replies: HashMap::new(),
            fallback,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(mut self, file_name: &str, reply: Reply) -> Self {
        self.replies.insert(file_name.to_string(), reply);
        self
    }

    /// File names in the order they were recognized.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, image: &Path) -> Result<Recognition, OcrError> {
        assert!(image.is_file(), "staged image must exist while recognizing");
        let name = file_name(image);
        self.seen.lock().unwrap().push(name.clone());
        match self.replies.get(&name) {
            Some(Reply::Text(text)) => Ok(Recognition::from_text(text)),
            Some(Reply::Fail(reason)) => Err(OcrError::Auth(reason.to_string())),
            None => Ok(Recognition::from_text(self.fallback)),
        }
    }
}

/// Cancels `token` once it has recognized `after` images.
pub struct CancellingRecognizer {
    pub token: CancellationToken,
    pub after: usize,
    calls: AtomicUsize,
}

impl CancellingRecognizer {
    pub fn new(token: CancellationToken, after: usize) -> Self {
        Self {
            token,
            after,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Recognizer for CancellingRecognizer {
    async fn recognize(&self, _image: &Path) -> Result<Recognition, OcrError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        Ok(Recognition::Single("永".to_string()))
    }
}

/// Object store keeping uploads in memory and handing out URLs under
/// `base_url`.
pub struct MemoryObjectStore {
    pub base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String, StorageError> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(format!("memory/{key}"))
    }

    async fn public_url(&self, uri: &str) -> Result<String, StorageError> {
        let key = uri
            .strip_prefix("memory/")
            .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
        Ok(format!("{}/{key}", self.base_url))
    }
}
