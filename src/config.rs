//! Service configuration
//!
//! Every option is a CLI flag with an environment fallback, so the daemon can
//! be configured the same way in a container (`GCS_BUCKET_ORIGINAL=...`) and
//! on a developer machine (`--bucket-original ...`).

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Largest `--max-side`; the 2× upscale must stay inside WebP's frame limit
pub const MAX_SIDE_LIMIT: u32 = crate::codec::WEBP_MAX_DIMENSION / 2;

/// Compute device preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DevicePreference {
    /// Probe for a CUDA device, fall back to CPU
    Auto,
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FaceBackend {
    Gfpgan,
    Codeformer,
    /// Skip face restoration entirely
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UpscaleBackend {
    /// Real-ESRGAN x2plus via its inference script
    Realesrgan,
    /// Built-in Lanczos3 resampler (no weights required)
    Lanczos,
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Address for the HTTP listener
    #[arg(long, env = "ENHANCER_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// Default bucket for archived originals
    #[arg(long, env = "GCS_BUCKET_ORIGINAL", default_value = "photo_enhance")]
    pub bucket_original: String,

    /// Default bucket for enhanced results
    #[arg(long, env = "GCS_BUCKET_ENHANCED", default_value = "photo_enhance")]
    pub bucket_enhanced: String,

    /// Extra buckets a request may name in its bucket fields, on top of the two defaults
    #[arg(long, env = "ENHANCER_ALLOWED_BUCKETS", value_delimiter = ',')]
    pub allowed_buckets: Vec<String>,

    /// Service account JSON; uploads are mocked when the file is missing
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS", default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Accepted upload extensions
    #[arg(
        long,
        env = "ENHANCER_ALLOWED_EXTENSIONS",
        value_delimiter = ',',
        default_value = "jpg,jpeg,png,webp"
    )]
    pub allowed_extensions: Vec<String>,

    /// Maximum accepted upload size in megabytes
    #[arg(long, env = "ENHANCER_MAX_UPLOAD_MB", default_value_t = 10)]
    pub max_upload_mb: usize,

    /// Root for per-request scratch directories (defaults to the system temp dir)
    #[arg(long, env = "ENHANCER_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Directory holding model weights
    #[arg(long, env = "ENHANCER_WEIGHTS_DIR", default_value = "weights")]
    pub weights_dir: PathBuf,

    #[arg(long, env = "ENHANCER_DEVICE", value_enum, default_value_t = DevicePreference::Auto)]
    pub device: DevicePreference,

    /// Python interpreter used for model scripts
    #[arg(long, env = "ENHANCER_PYTHON", default_value = "python3")]
    pub python: String,

    #[arg(long, env = "ENHANCER_FACE_BACKEND", value_enum, default_value_t = FaceBackend::Gfpgan)]
    pub face_backend: FaceBackend,

    /// Face restoration script (defaults depend on the backend)
    #[arg(long, env = "ENHANCER_FACE_SCRIPT")]
    pub face_script: Option<PathBuf>,

    /// CodeFormer fidelity weight: 0 favours sharpness, 1 favours the input face
    #[arg(long, env = "ENHANCER_FIDELITY", default_value_t = 0.5)]
    pub fidelity: f32,

    #[arg(long, env = "ENHANCER_UPSCALE_BACKEND", value_enum, default_value_t = UpscaleBackend::Realesrgan)]
    pub upscale_backend: UpscaleBackend,

    #[arg(
        long,
        env = "ENHANCER_UPSCALE_SCRIPT",
        default_value = "Real-ESRGAN/inference_realesrgan.py"
    )]
    pub upscale_script: PathBuf,

    /// Upscaler tile size in pixels (0 = auto)
    #[arg(long, env = "ENHANCER_TILE", default_value_t = 0)]
    pub tile: u32,

    /// Overlap added around each tile
    #[arg(long, env = "ENHANCER_TILE_PAD", default_value_t = 10)]
    pub tile_pad: u32,

    /// Longer side limit applied before inference
    #[arg(
        long,
        env = "ENHANCER_MAX_SIDE",
        default_value_t = 1200,
        value_parser = clap::value_parser!(u32).range(1..=MAX_SIDE_LIMIT as i64)
    )]
    pub max_side: u32,

    #[arg(long, env = "ENHANCER_MODEL_TIMEOUT_SECS", default_value_t = 300)]
    pub model_timeout_secs: u64,

    #[arg(long, env = "ENHANCER_JPEG_QUALITY", default_value_t = 95)]
    pub jpeg_quality: u8,

    #[arg(long, env = "ENHANCER_WEBP_QUALITY", default_value_t = 92)]
    pub webp_quality: u8,
}

impl Config {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Buckets requests may target: both defaults plus `--allowed-buckets`
    pub fn bucket_allow_list(&self) -> Vec<String> {
        let mut buckets = vec![self.bucket_original.clone(), self.bucket_enhanced.clone()];
        for bucket in &self.allowed_buckets {
            let bucket = bucket.trim();
            if !bucket.is_empty() && !buckets.iter().any(|b| b == bucket) {
                buckets.push(bucket.to_string());
            }
        }
        buckets.dedup();
        buckets
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Face script path, falling back to the conventional checkout location
    pub fn face_script_path(&self) -> Option<PathBuf> {
        match (self.face_backend, &self.face_script) {
            (FaceBackend::None, _) => None,
            (_, Some(path)) => Some(path.clone()),
            (FaceBackend::Gfpgan, None) => Some(PathBuf::from("GFPGAN/inference_gfpgan.py")),
            (FaceBackend::Codeformer, None) => {
                Some(PathBuf::from("CodeFormer/inference_codeformer.py"))
            }
        }
    }
}
