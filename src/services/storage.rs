use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use sha2::{Digest, Sha256};

use crate::config::{credential, AppConfig};

/// Object storage used to give the OCR service a fetchable copy of an image.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `data` under `key`, overwriting any existing object, and return
    /// the storage URI of the object.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError>;

    /// Turn a storage URI into a time-limited public URL.
    async fn public_url(&self, uri: &str) -> Result<String, StorageError>;
}

/// Content-derived storage key, so identical bytes map to the same object.
pub fn content_key(data: &[u8], extension: Option<&str>) -> String {
    let digest = Sha256::digest(data);
    let ext = extension
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    format!("ocr/{:x}.{}", digest, ext.trim_start_matches('.'))
}

pub fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

/// Client for the S3-compatible image bucket.
pub struct S3ImageStore {
    bucket: Box<Bucket>,
    url_expiry_secs: u32,
}

impl S3ImageStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        url_expiry_secs: u32,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            url_expiry_secs,
        })
    }

    /// Build the store from configuration. Returns `None` when any storage
    /// credential is missing; the OCR client reports that per call.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, StorageError> {
        let (Some(service_id), Some(access_key), Some(secret_key)) = (
            credential(&config.imagex_service_id),
            credential(&config.imagex_access_key),
            credential(&config.imagex_secret_key),
        ) else {
            return Ok(None);
        };

        Self::new(
            &service_id,
            &config.imagex_endpoint,
            &config.imagex_region,
            &access_key,
            &secret_key,
            config.imagex_url_expire,
        )
        .map(Some)
    }

    fn key_from_uri<'a>(&self, uri: &'a str) -> Result<&'a str, StorageError> {
        let bucket_name = self.bucket.name();
        uri.strip_prefix(bucket_name.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3ImageStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(StorageError::S3)?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status(status));
        }

        Ok(format!("{}/{}", self.bucket.name(), key))
    }

    async fn public_url(&self, uri: &str) -> Result<String, StorageError> {
        let key = self.key_from_uri(uri)?;
        self.bucket
            .presign_get(key, self.url_expiry_secs, None)
            .await
            .map_err(StorageError::S3)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Upload rejected with status {0}")]
    Status(u16),

    #[error("Unrecognized storage URI: {0}")]
    InvalidUri(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
