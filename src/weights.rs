//! Model weight provisioning for `magazine_enhancer fetch-weights`

use crate::error::ModelError;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct WeightFile {
    pub name: &'static str,
    pub url: &'static str,
}

pub const GFPGAN_WEIGHTS: &str = "GFPGANv1.4.pth";
pub const REALESRGAN_WEIGHTS: &str = "RealESRGAN_x2plus.pth";
pub const CODEFORMER_WEIGHTS: &str = "codeformer.pth";
/// Face parsing network CodeFormer uses for blending
pub const PARSENET_WEIGHTS: &str = "parsing_parsenet.pth";

/// Every checkpoint a backend may ask for
pub const WEIGHTS: &[WeightFile] = &[
    WeightFile {
        name: GFPGAN_WEIGHTS,
        url: "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.0/GFPGANv1.4.pth",
    },
    WeightFile {
        name: REALESRGAN_WEIGHTS,
        url: "https://github.com/xinntao/Real-ESRGAN/releases/download/v0.2.1/RealESRGAN_x2plus.pth",
    },
    WeightFile {
        name: CODEFORMER_WEIGHTS,
        url: "https://github.com/sczhou/CodeFormer/releases/download/v0.1.0/codeformer.pth",
    },
    WeightFile {
        name: PARSENET_WEIGHTS,
        url: "https://github.com/sczhou/CodeFormer/releases/download/v0.1.0/parsing_parsenet.pth",
    },
];

#[derive(Debug, Default)]
pub struct FetchSummary {
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    /// File name and reason
    pub failed: Vec<(String, String)>,
}

impl FetchSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Path of a weight file a backend cannot load without
pub fn require(dir: &Path, name: &str) -> std::result::Result<PathBuf, ModelError> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ModelError::Unavailable(format!(
            "weights not found: {} (run `magazine_enhancer fetch-weights`)",
            path.display()
        )))
    }
}

/// Download every known weight file missing from `dir`
pub async fn fetch_weights(dir: &Path) -> Result<FetchSummary> {
    fetch_into(dir, WEIGHTS).await
}

pub async fn fetch_into(dir: &Path, files: &[WeightFile]) -> Result<FetchSummary> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(concat!("magazine_enhancer/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let mut summary = FetchSummary::default();
    for file in files {
        let dest = dir.join(file.name);
        if dest.is_file() {
            info!("✅ {} already exists", file.name);
            summary.skipped.push(dest);
            continue;
        }

        info!("⬇️ Downloading {}...", file.name);
        match download(&client, file.url, &dest).await {
            Ok(bytes) => {
                info!("   ✓ {} ({:.1} MB)", file.name, bytes as f64 / 1_048_576.0);
                summary.downloaded.push(dest);
            }
            Err(e) => {
                warn!("❌ {} failed: {:#}", file.name, e);
                summary.failed.push((file.name.to_string(), format!("{:#}", e)));
            }
        }
    }
    Ok(summary)
}

/// Stream `url` into `<dest>.part`, renaming on completion
async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    let part = dest.with_extension("part");
    let result = stream_to(client, url, &part).await;
    match result {
        Ok(bytes) => {
            tokio::fs::rename(&part, dest)
                .await
                .with_context(|| format!("Failed to move {} into place", part.display()))?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn stream_to(client: &reqwest::Client, url: &str, part: &Path) -> Result<u64> {
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;
    if !response.status().is_success() {
        bail!("HTTP status {} from {}", response.status(), url);
    }

    let mut file = tokio::fs::File::create(part)
        .await
        .with_context(|| format!("Failed to create {}", part.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.context("Download interrupted")? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if written == 0 {
        bail!("Empty response from {}", url);
    }
    Ok(written)
}
