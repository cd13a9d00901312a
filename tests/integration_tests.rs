//! Integration tests for the enhancement HTTP service

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use image::{Rgb, RgbImage};
use magazine_enhancer::codec::{self, EncodeSettings, ImageKind};
use magazine_enhancer::validation::UploadPolicy;
use magazine_enhancer::{
    router, AppState, BlobStore, Device, Enhancer, FaceRestorer, LanczosUpscaler, Metrics,
    ModelError, ModelHandles, ServiceSettings, StorageError, StorageGateway, TileConfig,
};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "enhancer-test-boundary";

/// Face restorer that counts calls and returns its input
#[derive(Default)]
struct CountingFace {
    calls: AtomicUsize,
}

#[async_trait]
impl FaceRestorer for CountingFace {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn restore(&self, image: &RgbImage) -> Result<RgbImage, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }
}

struct MissingWeightsFace;

#[async_trait]
impl FaceRestorer for MissingWeightsFace {
    fn name(&self) -> &'static str {
        "missing-weights"
    }

    async fn restore(&self, _image: &RgbImage) -> Result<RgbImage, ModelError> {
        Err(ModelError::Unavailable("GFPGANv1.4.pth not found".into()))
    }
}

/// Blob store that keeps every upload in memory
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<Vec<(String, String, Vec<u8>)>>,
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .push((bucket.to_string(), name.to_string(), bytes));
        Ok(format!("https://storage.googleapis.com/{}/{}", bucket, name))
    }
}

struct Harness {
    temp_root: TempDir,
    metrics: Arc<Metrics>,
    state: AppState,
}

fn harness(face: Option<Arc<dyn FaceRestorer>>, store: Option<Arc<dyn BlobStore>>) -> Harness {
    harness_with_limit(face, store, 10 * 1024 * 1024)
}

fn harness_with_limit(
    face: Option<Arc<dyn FaceRestorer>>,
    store: Option<Arc<dyn BlobStore>>,
    max_bytes: usize,
) -> Harness {
    let temp_root = TempDir::new().unwrap();
    let metrics = Metrics::new();
    let handles = ModelHandles {
        device: Device::Cpu,
        face,
        upscaler: Arc::new(LanczosUpscaler::new(TileConfig::default())),
    };
    let storage = match store {
        Some(store) => StorageGateway::with_store(store, metrics.clone()),
        None => StorageGateway::mock(metrics.clone()),
    };
    let state = AppState {
        enhancer: Arc::new(Enhancer::new(handles, 1200, metrics.clone())),
        storage: Arc::new(storage),
        metrics: metrics.clone(),
        settings: Arc::new(ServiceSettings {
            bucket_original: "originals-bucket".to_string(),
            bucket_enhanced: "enhanced-bucket".to_string(),
            allowed_buckets: ["originals-bucket", "enhanced-bucket", "archive-in", "archive-out"]
                .iter()
                .map(|b| b.to_string())
                .collect(),
            upload: UploadPolicy {
                max_bytes,
                ..UploadPolicy::default()
            },
            temp_root: temp_root.path().to_path_buf(),
            encode: EncodeSettings::default(),
        }),
        started: Instant::now(),
    };
    Harness {
        temp_root,
        metrics,
        state,
    }
}

fn photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 199) as u8])
    })
}

fn encoded(width: u32, height: u32, kind: ImageKind) -> Vec<u8> {
    codec::encode(&photo(width, height), kind, &EncodeSettings::default()).unwrap()
}

fn multipart_request(filename: &str, data: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/enhance")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn test_full_size_jpeg_end_to_end() {
    let face = Arc::new(CountingFace::default());
    let store = Arc::new(MemoryStore::default());
    let h = harness(Some(face.clone()), Some(store.clone()));

    let request = multipart_request("portrait.jpg", &encoded(2000, 1500, ImageKind::Jpeg), &[]);
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Image processed with Magazine-Grade pipeline");
    assert_eq!(face.calls.load(Ordering::SeqCst), 1);

    let objects = store.objects.lock().unwrap();
    assert_eq!(objects.len(), 2);
    let (bucket, name, _) = &objects[0];
    assert_eq!(bucket, "originals-bucket");
    assert!(name.starts_with("originals/") && name.ends_with("_portrait.jpg"));

    let (bucket, name, bytes) = &objects[1];
    assert_eq!(bucket, "enhanced-bucket");
    assert!(name.starts_with("enhanced/") && name.contains("final_"));
    let result = image::load_from_memory(bytes).unwrap();
    assert_eq!((result.width(), result.height()), (2400, 1800));
    assert_eq!(image::guess_format(bytes).unwrap(), image::ImageFormat::Jpeg);

    assert_eq!(
        body["enhanced_url"].as_str().unwrap(),
        format!("https://storage.googleapis.com/enhanced-bucket/{}", name)
    );
    assert!(is_empty_dir(h.temp_root.path()));
}

#[tokio::test]
async fn test_mock_storage_returns_placeholder_urls() {
    let h = harness(Some(Arc::new(CountingFace::default())), None);
    let request = multipart_request(
        "beach.png",
        &encoded(64, 48, ImageKind::Png),
        &[("bucket_original", "archive-in"), ("bucket_enhanced", "archive-out")],
    );
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    let original = body["original_url"].as_str().unwrap();
    let enhanced = body["enhanced_url"].as_str().unwrap();
    assert!(original.starts_with("http://localhost/mock/") && original.ends_with("_beach.png"));
    assert!(enhanced.starts_with("http://localhost/mock/final_") && enhanced.ends_with("_beach.png"));
    assert!(is_empty_dir(h.temp_root.path()));
}

#[tokio::test]
async fn test_allowed_bucket_fields_route_uploads() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(None, Some(store.clone()));
    let request = multipart_request(
        "dune.png",
        &encoded(32, 24, ImageKind::Png),
        &[("bucket_original", "archive-in"), ("bucket_enhanced", "archive-out")],
    );
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let objects = store.objects.lock().unwrap();
    let buckets: Vec<&str> = objects.iter().map(|(bucket, _, _)| bucket.as_str()).collect();
    assert_eq!(buckets, vec!["archive-in", "archive-out"]);
}

#[tokio::test]
async fn test_unknown_bucket_rejected_before_any_work() {
    let face = Arc::new(CountingFace::default());
    let store = Arc::new(MemoryStore::default());
    let h = harness(Some(face.clone()), Some(store.clone()));

    for fields in [
        [("bucket_original", "someone-elses-bucket"), ("bucket_enhanced", "enhanced-bucket")],
        [("bucket_original", "originals-bucket"), ("bucket_enhanced", "someone-elses-bucket")],
    ] {
        let request = multipart_request("photo.png", &encoded(16, 16, ImageKind::Png), &fields);
        let (status, body) = send(&h.state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
        assert_eq!(body["detail"], "Requested storage bucket is not allowed");
    }

    assert!(store.objects.lock().unwrap().is_empty());
    assert_eq!(face.calls.load(Ordering::SeqCst), 0);
    assert!(is_empty_dir(h.temp_root.path()));
    assert_eq!(h.metrics.snapshot().failures.client_errors, 2);
}

#[tokio::test]
async fn test_failing_face_restorer_still_succeeds() {
    let store = Arc::new(MemoryStore::default());
    let h = harness(Some(Arc::new(MissingWeightsFace)), Some(store.clone()));

    let request = multipart_request("group.webp", &encoded(120, 80, ImageKind::Webp), &[]);
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(h.metrics.snapshot().fallbacks.face_restoration, 1);

    let objects = store.objects.lock().unwrap();
    let result = image::load_from_memory(&objects[1].2).unwrap();
    assert_eq!((result.width(), result.height()), (240, 160));
}

#[tokio::test]
async fn test_corrupt_upload_rejected_before_models() {
    let face = Arc::new(CountingFace::default());
    let h = harness(Some(face.clone()), None);

    let request = multipart_request("photo.jpg", b"definitely not a photograph", &[]);
    let (status, body) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_image");

    // Right magic bytes, broken stream
    let mut truncated = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    truncated.extend_from_slice(&[0u8; 64]);
    let request = multipart_request("photo.png", &truncated, &[]);
    let (status, body) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_image");

    assert_eq!(face.calls.load(Ordering::SeqCst), 0);
    assert!(is_empty_dir(h.temp_root.path()));
    assert_eq!(h.metrics.snapshot().failures.client_errors, 2);
}

#[tokio::test]
async fn test_unsupported_extension_is_415() {
    let h = harness(None, None);
    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
    let (status, body) = send(&h.state, multipart_request("anim.gif", gif, &[])).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "unsupported_format");
}

#[tokio::test]
async fn test_oversize_upload_is_413() {
    let h = harness_with_limit(None, None, 1024);
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.resize(4096, 0);
    let (status, body) = send(&h.state, multipart_request("big.png", &data, &[])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");
}

#[tokio::test]
async fn test_missing_file_field() {
    let h = harness(None, None);
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"bucket_original\"\r\n\r\nx\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/enhance")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_non_multipart_request() {
    let h = harness(None, None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/enhance")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = harness(None, None);
    for uri in ["/", "/health"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(&h.state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["gpu_enabled"], false);
        assert_eq!(body["message"], "System Ready");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}

#[tokio::test]
async fn test_metrics_endpoint_counts_requests() {
    let h = harness(None, None);
    send(&h.state, multipart_request("ok.png", &encoded(16, 16, ImageKind::Png), &[])).await;
    send(&h.state, multipart_request("bad.png", b"nope", &[])).await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, body) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 2);
    assert_eq!(body["successful_requests"], 1);
    assert_eq!(body["failed_requests"], 1);
    assert_eq!(body["failures"]["client_errors"], 1);
    // No face backend loaded counts as a pass-through
    assert_eq!(body["fallbacks"]["face_restoration"], 1);
}
