//! Storage gateway
//!
//! Persists request artifacts to object storage and hands back a URL. Upload
//! problems never fail a request: without credentials every upload is mocked,
//! and a failing backend yields the same placeholder URL.

use crate::config::Config;
use crate::error::StorageError;
use crate::metrics::Metrics;
use async_trait::async_trait;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ORIGINALS_FOLDER: &str = "originals";
pub const ENHANCED_FOLDER: &str = "enhanced";

/// Remote blob backend
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `name` in `bucket` and return a retrievable URL
    async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// Google Cloud Storage through `object_store`, one client per bucket
pub struct GcsBlobStore {
    credentials: PathBuf,
    /// One client per bucket; the HTTP layer only passes allow-listed names
    clients: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl GcsBlobStore {
    pub fn new(credentials: impl Into<PathBuf>) -> Self {
        Self {
            credentials: credentials.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| StorageError::Rejected("client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }

        let client: Arc<dyn ObjectStore> = Arc::new(
            GoogleCloudStorageBuilder::new()
                .with_service_account_path(self.credentials.to_string_lossy())
                .with_bucket_name(bucket)
                .build()?,
        );
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let client = self.client(bucket)?;
        client
            .put(&ObjectPath::from(name), PutPayload::from(bytes))
            .await?;
        Ok(public_url(bucket, name))
    }
}

pub fn public_url(bucket: &str, name: &str) -> String {
    format!("https://storage.googleapis.com/{}/{}", bucket, name)
}

/// Placeholder returned when uploads are mocked or the backend fails
pub fn mock_url(filename: &str) -> String {
    format!("http://localhost/mock/{}", filename)
}

pub struct StorageGateway {
    backend: Option<Arc<dyn BlobStore>>,
    metrics: Arc<Metrics>,
}

impl StorageGateway {
    /// Use GCS when the credentials file exists, mock mode otherwise
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Self {
        if config.credentials.is_file() {
            info!("☁️ Storage: GCS with credentials {}", config.credentials.display());
            Self::with_store(Arc::new(GcsBlobStore::new(&config.credentials)), metrics)
        } else {
            warn!(
                "⚠️ Credentials file {} not found, uploads will be mocked",
                config.credentials.display()
            );
            Self::mock(metrics)
        }
    }

    pub fn mock(metrics: Arc<Metrics>) -> Self {
        Self {
            backend: None,
            metrics,
        }
    }

    pub fn with_store(store: Arc<dyn BlobStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            backend: Some(store),
            metrics,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.backend.is_none()
    }

    /// Upload `local` as `<folder>/<uuid>_<file name>` into `bucket`.
    ///
    /// Returns `None` only when the local file has no name or cannot be read.
    pub async fn upload(&self, local: &Path, bucket: &str, folder: &str) -> Option<String> {
        let Some(filename) = local.file_name().and_then(|n| n.to_str()) else {
            warn!("Cannot upload {}: no file name", local.display());
            return None;
        };

        let Some(store) = &self.backend else {
            debug!("Mock upload of {} to {}", filename, bucket);
            return Some(mock_url(filename));
        };

        let bytes = match tokio::fs::read(local).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {} for upload: {}", local.display(), e);
                return None;
            }
        };

        let name = format!("{}/{}_{}", folder, Uuid::new_v4(), filename);
        match store.put(bucket, &name, bytes).await {
            Ok(url) => {
                debug!("Uploaded {} to {}", filename, url);
                Some(url)
            }
            Err(e) => {
                warn!("⚠️ Upload of {} to {} failed, returning placeholder: {}", filename, bucket, e);
                self.metrics.record_storage_fallback();
                Some(mock_url(filename))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Unreachable;

    #[async_trait]
    impl BlobStore for Unreachable {
        async fn put(&self, _bucket: &str, _name: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
            Err(StorageError::Rejected("connection refused".into()))
        }
    }

    /// Records every object name it receives
    #[derive(Default)]
    struct Recording {
        names: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl BlobStore for Recording {
        async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
            self.names
                .lock()
                .unwrap()
                .push((bucket.to_string(), name.to_string(), bytes.len()));
            Ok(public_url(bucket, name))
        }
    }

    fn temp_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"payload").unwrap();
        path
    }

    #[tokio::test]
    async fn test_mock_mode_returns_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir, "cat.jpg");
        let gateway = StorageGateway::mock(Metrics::new());
        assert!(gateway.is_mock());
        let url = gateway.upload(&path, "bucket", ORIGINALS_FOLDER).await;
        assert_eq!(url.as_deref(), Some("http://localhost/mock/cat.jpg"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir, "final_cat.png");
        let metrics = Metrics::new();
        let gateway = StorageGateway::with_store(Arc::new(Unreachable), metrics.clone());
        let url = gateway.upload(&path, "bucket", ENHANCED_FOLDER).await.unwrap();
        assert!(url.contains("final_cat.png"));
        assert_eq!(metrics.storage_fallbacks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_remote_name_and_url() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir, "dog.webp");
        let store = Arc::new(Recording::default());
        let gateway = StorageGateway::with_store(store.clone(), Metrics::new());

        let url = gateway.upload(&path, "photos", ORIGINALS_FOLDER).await.unwrap();
        let names = store.names.lock().unwrap();
        let (bucket, name, len) = &names[0];
        assert_eq!(bucket, "photos");
        assert_eq!(*len, 7);
        assert!(name.starts_with("originals/"));
        assert!(name.ends_with("_dog.webp"));
        // originals/ + 36-char uuid + _dog.webp
        assert_eq!(name.len(), "originals/".len() + 36 + "_dog.webp".len());
        assert_eq!(url, format!("https://storage.googleapis.com/photos/{}", name));
    }

    #[tokio::test]
    async fn test_unreadable_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let gateway = StorageGateway::with_store(Arc::new(Recording::default()), Metrics::new());
        assert!(gateway
            .upload(&dir.path().join("missing.jpg"), "b", ORIGINALS_FOLDER)
            .await
            .is_none());
        assert!(gateway.upload(Path::new("/"), "b", ORIGINALS_FOLDER).await.is_none());
    }
}
