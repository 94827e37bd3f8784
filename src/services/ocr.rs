use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{credential, AppConfig};
use crate::models::recognition::Recognition;
use crate::services::merge::{self, GridShape, MergeError};
use crate::services::storage::{content_key, content_type_for, ObjectStore, StorageError};

/// Tokens are refreshed this long before their advertised expiry.
pub const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(300);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TOKEN_PATH: &str = "/oauth/2.0/token";
const HANDWRITING_PATH: &str = "/rest/2.0/ocr/v1/handwriting";

/// Anything that can turn one image file into recognized characters.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<Recognition, OcrError>;
}

/// Short-lived bearer token with its expiry.
#[derive(Debug, Default)]
pub struct CredentialCache {
    token: Option<String>,
    expires_at: Option<Instant>,
}

impl CredentialCache {
    /// Usable until [`TOKEN_SAFETY_MARGIN`] before expiry.
    pub fn is_fresh(&self, now: Instant) -> bool {
        match (&self.token, self.expires_at) {
            (Some(_), Some(expires_at)) => now + TOKEN_SAFETY_MARGIN < expires_at,
            _ => false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn store(&mut self, token: String, now: Instant, expires_in: Duration) {
        self.token = Some(token);
        self.expires_at = Some(now + expires_in);
    }
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl OcrSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api_key: credential(&config.ocr_api_key),
            secret_key: credential(&config.ocr_secret_key),
            base_url: config.ocr_base_url.trim_end_matches('/').to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    error_description: Option<String>,
}

/// Result of recognizing a set of images through merged composites.
#[derive(Debug, Clone)]
pub struct BatchRecognition {
    pub characters: Vec<String>,
    pub merged_paths: Vec<PathBuf>,
}

/// Two-step handwriting recognition: upload to object storage, then hand the
/// signed URL to the handwriting OCR endpoint.
pub struct HandwritingOcrClient {
    http: Client,
    settings: OcrSettings,
    store: Option<Arc<dyn ObjectStore>>,
    token: Mutex<CredentialCache>,
}

impl HandwritingOcrClient {
    pub fn new(settings: OcrSettings, store: Option<Arc<dyn ObjectStore>>) -> Result<Self, OcrError> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            http,
            settings,
            store,
            token: Mutex::new(CredentialCache::default()),
        })
    }

    /// Fails before any network call when either remote dependency lacks
    /// credentials.
    fn check_config(&self) -> Result<(&str, &str, &Arc<dyn ObjectStore>), OcrError> {
        let (Some(api_key), Some(secret_key)) =
            (self.settings.api_key.as_deref(), self.settings.secret_key.as_deref())
        else {
            return Err(OcrError::Config(
                "missing OCR credentials, set OCR_API_KEY and OCR_SECRET_KEY".to_string(),
            ));
        };
        let Some(store) = self.store.as_ref() else {
            return Err(OcrError::Config(
                "missing image storage credentials, set IMAGEX_SERVICE_ID, IMAGEX_ACCESS_KEY and IMAGEX_SECRET_KEY"
                    .to_string(),
            ));
        };
        Ok((api_key, secret_key, store))
    }

    /// Return the cached bearer token, refreshing it when close to expiry.
    pub async fn access_token(&self) -> Result<String, OcrError> {
        let (api_key, secret_key, _) = self.check_config()?;

        let mut cache = self.token.lock().await;
        if cache.is_fresh(Instant::now()) {
            if let Some(token) = cache.token() {
                return Ok(token.to_string());
            }
        }

        tracing::debug!("Refreshing OCR access token");
        let url = format!("{}{}", self.settings.base_url, TOKEN_PATH);
        let response = self
            .http
            .post(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", api_key),
                ("client_secret", secret_key),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        let access_token = token.access_token.ok_or_else(|| {
            OcrError::Auth(
                token
                    .error_description
                    .unwrap_or_else(|| "token response carried no access_token".to_string()),
            )
        })?;

        cache.store(
            access_token.clone(),
            Instant::now(),
            Duration::from_secs(token.expires_in),
        );
        Ok(access_token)
    }

    /// Upload the image and resolve a public URL for it.
    async fn publish(&self, store: &Arc<dyn ObjectStore>, image: &Path) -> Result<String, OcrError> {
        let path = image.to_path_buf();
        let (data, key) = tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, String), OcrError> {
            if !path.is_file() {
                return Err(OcrError::MissingImage(path));
            }
            let data = std::fs::read(&path)?;
            let ext = path.extension().and_then(|e| e.to_str());
            let key = content_key(&data, ext);
            Ok((data, key))
        })
        .await??;

        let uri = store.put(&key, data, content_type_for(&key)).await?;
        let url = store.public_url(&uri).await?;
        if url.is_empty() {
            return Err(OcrError::EmptyUrl(uri));
        }
        Ok(url)
    }

    async fn request_recognition(&self, image_url: &str) -> Result<Value, OcrError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.settings.base_url, HANDWRITING_PATH);

        let response = self
            .http
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("url", image_url), ("detect_direction", "true")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        if let Some(code) = payload.get("error_code").and_then(Value::as_i64) {
            let message = payload
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(OcrError::Remote { code, message });
        }
        Ok(payload)
    }

    /// Recognize one image file.
    pub async fn recognize_image(&self, image: &Path) -> Result<Recognition, OcrError> {
        let (_, _, store) = self.check_config()?;

        let start = Instant::now();
        let image_url = self.publish(store, image).await?;
        let payload = self.request_recognition(&image_url).await?;
        let recognition = extract_text(&payload);

        tracing::debug!(
            image = %image.display(),
            duration_ms = start.elapsed().as_millis() as u64,
            characters = %recognition,
            "Recognition complete"
        );
        Ok(recognition)
    }

    /// Merge `images` into composites, recognize each composite once and
    /// flatten everything into one ordered character list.
    pub async fn batch_recognize(
        &self,
        images: &[PathBuf],
        grid: GridShape,
    ) -> Result<BatchRecognition, OcrError> {
        self.batch_recognize_in(images, grid, &std::env::temp_dir()).await
    }

    /// [`Self::batch_recognize`] with composites written to `scratch_dir`.
    /// On error every composite is removed again.
    pub async fn batch_recognize_in(
        &self,
        images: &[PathBuf],
        grid: GridShape,
        scratch_dir: &Path,
    ) -> Result<BatchRecognition, OcrError> {
        self.check_config()?;

        let inputs = images.to_vec();
        let out_dir = scratch_dir.to_path_buf();
        let merged_paths =
            tokio::task::spawn_blocking(move || merge::merge_images_in(&inputs, grid, &out_dir)).await??;

        let mut characters = Vec::new();
        for merged in &merged_paths {
            match self.recognize_image(merged).await {
                Ok(recognition) => characters.extend(recognition.into_chars()),
                Err(e) => {
                    merge::remove_composites(&merged_paths);
                    return Err(e);
                }
            }
        }

        Ok(BatchRecognition {
            characters,
            merged_paths,
        })
    }
}

#[async_trait]
impl Recognizer for HandwritingOcrClient {
    async fn recognize(&self, image: &Path) -> Result<Recognition, OcrError> {
        self.recognize_image(image).await
    }
}

/// Concatenate every recognized line, dropping spaces.
pub fn extract_text(payload: &Value) -> Recognition {
    let Some(lines) = payload.get("words_result").and_then(Value::as_array) else {
        return Recognition::Empty;
    };

    let text: String = lines
        .iter()
        .filter_map(|line| line.get("words").and_then(Value::as_str))
        .flat_map(|words| words.chars().filter(|c| *c != ' '))
        .collect();

    Recognition::from_text(&text)
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OCR service error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Failed to obtain access token: {0}")]
    Auth(String),

    #[error("Image upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("No public URL for {0}")]
    EmptyUrl(String),

    #[error("Image file not found: {0}")]
    MissingImage(PathBuf),

    #[error("Failed to merge images: {0}")]
    Merge(#[from] MergeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
