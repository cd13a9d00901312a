//! Image decode/encode at the service boundary
//!
//! Everything inside the pipeline is `RgbImage`; conversion from grayscale,
//! alpha or 16-bit sources happens here exactly once.

use crate::error::{EnhanceError, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// libwebp's per-side frame limit
pub const WEBP_MAX_DIMENSION: u32 = 16383;

/// Upload formats the service accepts and writes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }
}

/// Quality knobs for lossy outputs (1-100)
#[derive(Debug, Clone, Copy)]
pub struct EncodeSettings {
    pub jpeg_quality: u8,
    pub webp_quality: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 95,
            webp_quality: 92,
        }
    }
}

/// Decode any supported image and convert it to 8-bit RGB
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| EnhanceError::InvalidImage(format!("Failed to decode image: {}", e)))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(EnhanceError::InvalidImage("Image has no pixels".to_string()));
    }
    Ok(img.to_rgb8())
}

pub fn encode(img: &RgbImage, kind: ImageKind, settings: &EncodeSettings) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match kind {
        ImageKind::Jpeg => {
            let quality = settings.jpeg_quality.clamp(1, 100);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            img.write_with_encoder(encoder)
                .map_err(|e| EnhanceError::Processing(format!("Failed to encode JPEG: {}", e)))?;
        }
        ImageKind::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(|e| EnhanceError::Processing(format!("Failed to encode PNG: {}", e)))?;
        }
        ImageKind::Webp => {
            if img.width() > WEBP_MAX_DIMENSION || img.height() > WEBP_MAX_DIMENSION {
                return Err(EnhanceError::Processing(format!(
                    "Failed to encode WebP: {}x{} exceeds the {} px limit",
                    img.width(),
                    img.height(),
                    WEBP_MAX_DIMENSION
                )));
            }
            // Direct libwebp FFI encoding (the image crate only writes lossless WebP)
            let encoder = webp::Encoder::from_rgb(img.as_raw(), img.width(), img.height());
            let webp_data = encoder.encode(settings.webp_quality.clamp(1, 100) as f32);
            buf.extend_from_slice(&webp_data);
        }
    }
    Ok(buf)
}

/// Lossless PNG round trip used to hand frames to model scripts
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    encode(img, ImageKind::Png, &EncodeSettings::default())
}
