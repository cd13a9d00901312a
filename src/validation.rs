//! Upload validation
//!
//! Runs before any model work: size, extension, then magic bytes. Decoding is
//! the last gate and lives in `codec::decode`.

use crate::codec::ImageKind;
use crate::error::{EnhanceError, Result};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: ["jpg", "jpeg", "png", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Validate an upload and return the format it will be written back in
pub fn validate_upload(filename: &str, bytes: &[u8], policy: &UploadPolicy) -> Result<ImageKind> {
    if bytes.is_empty() {
        return Err(EnhanceError::InvalidInput("Uploaded file is empty".to_string()));
    }

    if bytes.len() > policy.max_bytes {
        return Err(EnhanceError::PayloadTooLarge {
            size: bytes.len(),
            limit: policy.max_bytes,
        });
    }

    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| EnhanceError::UnsupportedFormat(format!("No file extension: {}", filename)))?;

    if !policy.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
        return Err(EnhanceError::UnsupportedFormat(format!(
            "Extension .{} not allowed",
            ext
        )));
    }

    let kind = ImageKind::from_extension(&ext)
        .ok_or_else(|| EnhanceError::UnsupportedFormat(format!("No encoder for .{}", ext)))?;

    // Sniff content so a renamed text file never reaches the decoder
    match infer::get(bytes).and_then(|t| ImageKind::from_mime(t.mime_type())) {
        Some(_) => Ok(kind),
        None => Err(EnhanceError::InvalidImage(
            "File content is not a JPEG, PNG or WebP image".to_string(),
        )),
    }
}

/// Strip any client-supplied directories from an upload name
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
