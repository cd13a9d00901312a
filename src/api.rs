//! HTTP surface
//!
//! `POST /api/v1/enhance` runs one upload through the whole pipeline:
//!
//! 1. Validate and decode the upload (client errors stop here, before any
//!    scratch directory or model is touched)
//! 2. Archive the original in storage
//! 3. Face restoration and 2× upscaling
//! 4. Magazine color grade
//! 5. Encode in the upload's format and archive the result
//!
//! Every file a request writes lives in one `TempDir` under the configured
//! temp root and disappears with it.

use crate::codec::{self, EncodeSettings};
use crate::config::Config;
use crate::coordinator::Enhancer;
use crate::error::{EnhanceError, ModelError};
use crate::grade;
use crate::metrics::{FailureKind, Metrics, MetricsSnapshot, Timer};
use crate::storage::{StorageGateway, ENHANCED_FOLDER, ORIGINALS_FOLDER};
use crate::validation::{sanitize_filename, validate_upload, UploadPolicy};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const ENHANCE_MESSAGE: &str = "Image processed with Magazine-Grade pipeline";

/// Room for multipart boundaries and the text fields on top of the file limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Request-independent settings derived from [`Config`]
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub bucket_original: String,
    pub bucket_enhanced: String,
    /// Buckets a request may name; must include both defaults
    pub allowed_buckets: Vec<String>,
    pub upload: UploadPolicy,
    pub temp_root: PathBuf,
    pub encode: EncodeSettings,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket_original: config.bucket_original.clone(),
            bucket_enhanced: config.bucket_enhanced.clone(),
            allowed_buckets: config.bucket_allow_list(),
            upload: UploadPolicy {
                allowed_extensions: config.allowed_extensions.clone(),
                max_bytes: config.max_upload_bytes(),
            },
            temp_root: config.temp_root(),
            encode: EncodeSettings {
                jpeg_quality: config.jpeg_quality,
                webp_quality: config.webp_quality,
            },
        }
    }

    /// Bucket named by a request field, or `default` when the field was absent
    pub fn resolve_bucket<'a>(
        &'a self,
        requested: Option<&'a str>,
        default: &'a str,
    ) -> crate::Result<&'a str> {
        match requested {
            None => Ok(default),
            Some(name) if self.allowed_buckets.iter().any(|b| b == name) => Ok(name),
            Some(name) => Err(EnhanceError::BucketNotAllowed(name.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub enhancer: Arc<Enhancer>,
    pub storage: Arc<StorageGateway>,
    pub metrics: Arc<Metrics>,
    pub settings: Arc<ServiceSettings>,
    pub started: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceResult {
    pub status: String,
    pub original_url: Option<String>,
    pub enhanced_url: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub gpu_enabled: bool,
    pub message: String,
    pub version: String,
    pub uptime_ms: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: &'static str,
    code: &'static str,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.upload.max_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/enhance", post(enhance))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "online".to_string(),
        gpu_enabled: state.enhancer.device().is_accelerated(),
        message: "System Ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_ms: state.started.elapsed().as_millis() as u64,
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn enhance(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<EnhanceResult>, ApiError> {
    let timer = Timer::new();
    let result = match multipart {
        Ok(multipart) => run_enhance(&state, multipart).await,
        Err(rejection) => Err(ApiError::from(rejection)),
    };

    match result {
        Ok(body) => {
            state.metrics.record_success(timer.elapsed_ms());
            Ok(Json(body))
        }
        Err(e) => {
            state.metrics.record_failure(e.kind, timer.elapsed_ms());
            if e.kind == FailureKind::Client {
                warn!("Rejected upload ({}): {}", e.code, e.cause);
            } else {
                error!("Enhancement failed ({}): {}", e.code, e.cause);
            }
            Err(e)
        }
    }
}

/// Multipart fields of one enhancement request
struct Upload {
    filename: String,
    data: axum::body::Bytes,
    bucket_original: Option<String>,
    bucket_enhanced: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut bucket_original = None;
    let mut bucket_enhanced = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                file = Some((filename, field.bytes().await?));
            }
            Some("bucket_original") => bucket_original = non_empty(field.text().await?),
            Some("bucket_enhanced") => bucket_enhanced = non_empty(field.text().await?),
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (filename, data) = file
        .ok_or_else(|| EnhanceError::InvalidInput("Missing multipart field 'file'".to_string()))?;
    Ok(Upload {
        filename,
        data,
        bucket_original,
        bucket_enhanced,
    })
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

async fn run_enhance(state: &AppState, multipart: Multipart) -> Result<EnhanceResult, ApiError> {
    let settings = &state.settings;
    let upload = read_upload(multipart).await?;
    debug!("Received {} ({} bytes)", upload.filename, upload.data.len());

    let bucket_original =
        settings.resolve_bucket(upload.bucket_original.as_deref(), &settings.bucket_original)?;
    let bucket_enhanced =
        settings.resolve_bucket(upload.bucket_enhanced.as_deref(), &settings.bucket_enhanced)?;

    let policy = settings.upload.clone();
    let filename = upload.filename.clone();
    let data = upload.data.clone();
    let (kind, image) = tokio::task::spawn_blocking(move || -> crate::Result<_> {
        let kind = validate_upload(&filename, &data, &policy)?;
        let image = codec::decode(&data)?;
        Ok((kind, image))
    })
    .await??;

    let scratch = tempfile::Builder::new()
        .prefix("enhance-")
        .tempdir_in(&settings.temp_root)?;
    let id = Uuid::new_v4();
    let safe_name = sanitize_filename(&upload.filename);

    let original_path = scratch.path().join(format!("{}_{}", id, safe_name));
    tokio::fs::write(&original_path, &upload.data).await?;
    let original_url = state
        .storage
        .upload(&original_path, bucket_original, ORIGINALS_FOLDER)
        .await;

    let enhanced = state.enhancer.enhance(image).await?;
    debug!(
        "Enhanced to {}x{} (face restored: {})",
        enhanced.image.width(),
        enhanced.image.height(),
        enhanced.face_restored
    );

    let encode = settings.encode;
    let encoded = tokio::task::spawn_blocking(move || {
        let graded = grade::apply_look_rgb(&enhanced.image);
        codec::encode(&graded, kind, &encode)
    })
    .await??;

    let final_path = scratch.path().join(format!("final_{}_{}", id, safe_name));
    tokio::fs::write(&final_path, &encoded).await?;
    let enhanced_url = state
        .storage
        .upload(&final_path, bucket_enhanced, ENHANCED_FOLDER)
        .await;

    info!("✨ Enhanced {} ({} bytes out)", safe_name, encoded.len());
    Ok(EnhanceResult {
        status: "success".to_string(),
        original_url,
        enhanced_url,
        message: ENHANCE_MESSAGE.to_string(),
    })
}

/// Error response with a stable detail text; the cause is only logged
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: &'static str,
    pub kind: FailureKind,
    cause: String,
}

impl From<EnhanceError> for ApiError {
    fn from(e: EnhanceError) -> Self {
        let (status, code, detail) = match &e {
            EnhanceError::InvalidInput(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_input",
                "Request must include an image in the 'file' field",
            ),
            EnhanceError::BucketNotAllowed(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_input",
                "Requested storage bucket is not allowed",
            ),
            EnhanceError::InvalidImage(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_image",
                "Uploaded file is not a readable image",
            ),
            EnhanceError::UnsupportedFormat(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_format",
                "Unsupported file type, upload a JPEG, PNG or WebP image",
            ),
            EnhanceError::PayloadTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Uploaded file exceeds the size limit",
            ),
            EnhanceError::Model(ModelError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "model_unavailable",
                "Enhancement model is unavailable",
            ),
            EnhanceError::Model(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "inference_failed",
                "Image enhancement failed",
            ),
            EnhanceError::Processing(_) | EnhanceError::Task(_) | EnhanceError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            ),
        };
        Self {
            status,
            code,
            detail,
            kind: FailureKind::from(&e),
            cause: e.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        multipart_failure(e.status(), e.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        multipart_failure(e.status(), e.body_text())
    }
}

fn multipart_failure(status: StatusCode, cause: String) -> ApiError {
    let (status, code, detail) = if status == StatusCode::PAYLOAD_TOO_LARGE {
        (status, "payload_too_large", "Uploaded file exceeds the size limit")
    } else {
        (StatusCode::BAD_REQUEST, "invalid_input", "Malformed multipart request")
    };
    ApiError {
        status,
        code,
        detail,
        kind: FailureKind::Client,
        cause,
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        EnhanceError::from(e).into()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        EnhanceError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}
