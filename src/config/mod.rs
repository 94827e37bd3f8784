use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue, progress log and task records
    pub redis_url: String,

    /// Root for uploads, staging workspaces and import results
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Number of in-process import workers. Zero hands tasks to the Redis queue.
    #[serde(default)]
    pub inline_workers: usize,

    /// ImageX service id (bucket name on the S3-compatible endpoint)
    pub imagex_service_id: Option<String>,

    /// ImageX S3-compatible endpoint URL
    #[serde(default = "default_imagex_endpoint")]
    pub imagex_endpoint: String,

    #[serde(default = "default_imagex_region")]
    pub imagex_region: String,

    pub imagex_access_key: Option<String>,

    pub imagex_secret_key: Option<String>,

    /// Lifetime of signed image URLs, in seconds
    #[serde(default = "default_imagex_url_expire")]
    pub imagex_url_expire: u32,

    /// Handwriting OCR client-credentials key
    pub ocr_api_key: Option<String>,

    /// Handwriting OCR client-credentials secret
    pub ocr_secret_key: Option<String>,

    #[serde(default = "default_ocr_base_url")]
    pub ocr_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_imagex_endpoint() -> String {
    "https://imagex.volcengineapi.com".to_string()
}

fn default_imagex_region() -> String {
    "cn-north-1".to_string()
}

fn default_imagex_url_expire() -> u32 {
    600
}

fn default_ocr_base_url() -> String {
    "https://aip.baidubce.com".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.media_root.join("uploads").join("import")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.media_root.join("temp_import")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.media_root.join("import_results")
    }
}

/// Trim a credential and treat blanks as missing.
pub fn credential(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
