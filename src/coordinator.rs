//! Enhancement coordinator
//!
//! Sequences safety downscale → face restoration → 2× upscaling. Face
//! restoration is best effort; upscaling failures fail the request.

use crate::config::Config;
use crate::device::Device;
use crate::error::{ModelError, Result};
use crate::face::{self, FaceRestorer};
use crate::filters::{self, ResampleFilter};
use crate::metrics::Metrics;
use crate::process::ScriptRuntime;
use crate::upscale::{self, Upscaler};
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Models loaded once at startup and never reassigned
pub struct ModelHandles {
    pub device: Device,
    pub face: Option<Arc<dyn FaceRestorer>>,
    pub upscaler: Arc<dyn Upscaler>,
}

impl ModelHandles {
    /// Load every backend named by `config`.
    ///
    /// A face backend that fails to load is dropped with a warning; an
    /// upscaler that fails to load is returned as an error.
    pub fn load(config: &Config) -> std::result::Result<Self, ModelError> {
        info!("🔧 Loading enhancement models...");
        let device = Device::detect(config.device);
        let runtime = ScriptRuntime {
            interpreter: config.python.clone(),
            timeout: config.model_timeout(),
            scratch_root: config.temp_root(),
            device,
        };

        let face = face::from_config(config, &runtime).unwrap_or_else(|e| {
            warn!("⚠️ Face restoration unavailable, continuing without it: {}", e);
            None
        });
        let upscaler = upscale::from_config(config, &runtime)?;

        info!("✅ Models ready on {}", device.describe());
        Ok(Self {
            device,
            face,
            upscaler,
        })
    }
}

/// Output of [`Enhancer::enhance`]
#[derive(Debug)]
pub struct Enhanced {
    pub image: RgbImage,
    /// Scale applied by the safety downscale (1.0 when untouched)
    pub downscale_factor: f32,
    pub face_restored: bool,
}

pub struct Enhancer {
    handles: ModelHandles,
    max_side: u32,
    metrics: Arc<Metrics>,
}

impl Enhancer {
    pub fn new(handles: ModelHandles, max_side: u32, metrics: Arc<Metrics>) -> Self {
        Self {
            handles,
            max_side,
            metrics,
        }
    }

    pub fn device(&self) -> Device {
        self.handles.device
    }

    pub fn face_enabled(&self) -> bool {
        self.handles.face.is_some()
    }

    pub async fn enhance(&self, image: RgbImage) -> Result<Enhanced> {
        let max_side = self.max_side;
        let (image, downscale_factor) =
            tokio::task::spawn_blocking(move || safety_downscale(image, max_side)).await??;
        debug!(
            "Safety downscale: {}x{} (factor {:.3})",
            image.width(),
            image.height(),
            downscale_factor
        );

        let (image, face_restored) = self.restore_faces(image).await;
        let image = self.upscale(image).await?;

        Ok(Enhanced {
            image,
            downscale_factor,
            face_restored,
        })
    }

    async fn restore_faces(&self, image: RgbImage) -> (RgbImage, bool) {
        let Some(face) = &self.handles.face else {
            debug!("No face restorer loaded, skipping");
            self.metrics.record_face_fallback();
            return (image, false);
        };

        let restored = match face.restore(&image).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!("⚠️ Face restoration ({}) failed, continuing without it: {}", face.name(), e);
                self.metrics.record_face_fallback();
                return (image, false);
            }
        };

        if restored.dimensions() == image.dimensions() {
            debug!("Face restoration ({}) done", face.name());
            return (restored, true);
        }

        let (w, h) = image.dimensions();
        debug!(
            "Face restorer returned {}x{}, resizing back to {}x{}",
            restored.width(),
            restored.height(),
            w,
            h
        );
        match tokio::task::spawn_blocking(move || filters::resize(&restored, w, h, ResampleFilter::Lanczos3)).await {
            Ok(Ok(resized)) => (resized, true),
            Ok(Err(e)) => {
                warn!("⚠️ Could not resize face restoration output: {}", e);
                self.metrics.record_face_fallback();
                (image, false)
            }
            Err(e) => {
                warn!("⚠️ Face resize task failed: {}", e);
                self.metrics.record_face_fallback();
                (image, false)
            }
        }
    }

    async fn upscale(&self, image: RgbImage) -> Result<RgbImage> {
        let upscaler = &self.handles.upscaler;
        let scale = upscaler.scale();
        let expected = (image.width() * scale, image.height() * scale);

        let upscaled = upscaler.upscale(&image).await?;
        debug!(
            "Upscaling ({}) done: {}x{}",
            upscaler.name(),
            upscaled.width(),
            upscaled.height()
        );
        if upscaled.dimensions() == expected {
            return Ok(upscaled);
        }

        warn!(
            "Upscaler {} returned {}x{}, expected {}x{}; resampling",
            upscaler.name(),
            upscaled.width(),
            upscaled.height(),
            expected.0,
            expected.1
        );
        let (w, h) = expected;
        tokio::task::spawn_blocking(move || filters::resize(&upscaled, w, h, ResampleFilter::Lanczos3)).await?
    }
}

/// Shrink so the longer side equals `max_side`, preserving aspect ratio.
///
/// Images at or below the limit are returned untouched with factor 1.0.
pub fn safety_downscale(image: RgbImage, max_side: u32) -> Result<(RgbImage, f32)> {
    let (w, h) = image.dimensions();
    let long = w.max(h);
    if long <= max_side || max_side == 0 {
        return Ok((image, 1.0));
    }

    let short_scaled = |short: u32| {
        ((short as f64 * max_side as f64 / long as f64).round() as u32).max(1)
    };
    let (tw, th) = if w >= h {
        (max_side, short_scaled(h))
    } else {
        (short_scaled(w), max_side)
    };

    let resized = filters::resize(&image, tw, th, ResampleFilter::Area)?;
    Ok((resized, max_side as f32 / long as f32))
}
