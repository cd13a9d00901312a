//! Super-resolution backends
//!
//! Every backend magnifies by [`UPSCALE_FACTOR`] and honours the same tiling
//! contract: a configured tile size of 0 means "pick one from the frame size".

use crate::config::{Config, UpscaleBackend};
use crate::error::ModelError;
use crate::filters::{self, ResampleFilter};
use crate::process::ScriptRuntime;
use crate::weights::{self, REALESRGAN_WEIGHTS};
use async_trait::async_trait;
use image::{imageops, RgbImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const UPSCALE_FACTOR: u32 = 2;

/// Tile edge used when auto-selection decides to split the frame
pub const AUTO_TILE: u32 = 400;

/// Frames above this many input pixels are tiled in auto mode
pub const AUTO_TILE_THRESHOLD: u64 = 1024 * 1024;

pub const REALESRGAN_MODEL: &str = "RealESRGAN_x2plus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    /// Tile edge in input pixels, 0 = auto
    pub tile: u32,
    /// Context added on each side of a tile
    pub pad: u32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self { tile: 0, pad: 10 }
    }
}

impl TileConfig {
    /// Effective tile edge for a frame; 0 means whole-frame processing
    pub fn resolve(&self, width: u32, height: u32) -> u32 {
        if self.tile > 0 {
            return self.tile;
        }
        if width as u64 * height as u64 > AUTO_TILE_THRESHOLD {
            AUTO_TILE
        } else {
            0
        }
    }
}

/// Input-space rectangle processed as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Row-major grid covering the frame exactly once
pub fn plan_tiles(width: u32, height: u32, tile: u32) -> Vec<Tile> {
    if tile == 0 || (width <= tile && height <= tile) {
        return vec![Tile { x: 0, y: 0, width, height }];
    }
    let mut tiles = Vec::new();
    for y in (0..height).step_by(tile as usize) {
        for x in (0..width).step_by(tile as usize) {
            tiles.push(Tile {
                x,
                y,
                width: tile.min(width - x),
                height: tile.min(height - y),
            });
        }
    }
    tiles
}

#[async_trait]
pub trait Upscaler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Integer magnification applied by [`Upscaler::upscale`]
    fn scale(&self) -> u32 {
        UPSCALE_FACTOR
    }

    async fn upscale(&self, image: &RgbImage) -> Result<RgbImage, ModelError>;
}

/// Real-ESRGAN x2plus via `inference_realesrgan.py`
pub struct RealEsrganScript {
    runtime: ScriptRuntime,
    script: PathBuf,
    weights: PathBuf,
    tiles: TileConfig,
}

impl RealEsrganScript {
    pub fn load(
        runtime: ScriptRuntime,
        script: PathBuf,
        weights_dir: &Path,
        tiles: TileConfig,
    ) -> Result<Self, ModelError> {
        runtime.check(&script)?;
        let weights = weights::require(weights_dir, REALESRGAN_WEIGHTS)?;
        Ok(Self {
            runtime,
            script,
            weights,
            tiles,
        })
    }
}

#[async_trait]
impl Upscaler for RealEsrganScript {
    fn name(&self) -> &'static str {
        "realesrgan"
    }

    async fn upscale(&self, image: &RgbImage) -> Result<RgbImage, ModelError> {
        let tile = self.tiles.resolve(image.width(), image.height()).to_string();
        let pad = self.tiles.pad.to_string();
        let scale = UPSCALE_FACTOR.to_string();
        let half = self.runtime.device.half_precision();

        self.runtime
            .run_image(image, |input, out_dir| {
                let cmd = self
                    .runtime
                    .command(&self.script)
                    .args(&["-n", REALESRGAN_MODEL, "-i"])
                    .path_arg(input)
                    .arg("-o")
                    .path_arg(out_dir)
                    .args(&["-s", scale.as_str(), "-t", tile.as_str(), "--tile_pad", pad.as_str()])
                    .arg("--model_path")
                    .path_arg(&self.weights)
                    .args(&["--ext", "png"])
                    .expect_output(out_dir.join("input_out.png"));
                if half {
                    cmd
                } else {
                    cmd.arg("--fp32")
                }
            })
            .await
    }
}

/// Built-in Lanczos3 resampler for deployments without model weights
pub struct LanczosUpscaler {
    tiles: TileConfig,
}

impl LanczosUpscaler {
    pub fn new(tiles: TileConfig) -> Self {
        Self { tiles }
    }
}

#[async_trait]
impl Upscaler for LanczosUpscaler {
    fn name(&self) -> &'static str {
        "lanczos"
    }

    async fn upscale(&self, image: &RgbImage) -> Result<RgbImage, ModelError> {
        let tile = self.tiles.resolve(image.width(), image.height());
        let pad = self.tiles.pad;
        let frame = image.clone();
        tokio::task::spawn_blocking(move || upscale_tiled(&frame, UPSCALE_FACTOR, tile, pad))
            .await
            .map_err(|e| ModelError::Image(format!("Upscale task failed: {}", e)))?
    }
}

/// Resize padded tiles independently and stitch their interiors
pub fn upscale_tiled(image: &RgbImage, scale: u32, tile: u32, pad: u32) -> Result<RgbImage, ModelError> {
    let (w, h) = image.dimensions();
    let resize = |img: &RgbImage, tw: u32, th: u32| {
        filters::resize(img, tw, th, ResampleFilter::Lanczos3)
            .map_err(|e| ModelError::Image(e.to_string()))
    };

    let tiles = plan_tiles(w, h, tile);
    if tiles.len() == 1 {
        return resize(image, w * scale, h * scale);
    }
    debug!("Upscaling {}x{} in {} tiles", w, h, tiles.len());

    let pieces = tiles
        .par_iter()
        .map(|t| -> Result<(Tile, RgbImage), ModelError> {
            let x0 = t.x.saturating_sub(pad);
            let y0 = t.y.saturating_sub(pad);
            let x1 = (t.x + t.width + pad).min(w);
            let y1 = (t.y + t.height + pad).min(h);
            let region = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
            let scaled = resize(&region, (x1 - x0) * scale, (y1 - y0) * scale)?;
            let inner = imageops::crop_imm(
                &scaled,
                (t.x - x0) * scale,
                (t.y - y0) * scale,
                t.width * scale,
                t.height * scale,
            )
            .to_image();
            Ok((*t, inner))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = RgbImage::new(w * scale, h * scale);
    for (t, piece) in pieces {
        imageops::replace(&mut out, &piece, (t.x * scale) as i64, (t.y * scale) as i64);
    }
    Ok(out)
}

/// Build the configured upscaler; failure here is fatal at startup
pub fn from_config(config: &Config, runtime: &ScriptRuntime) -> Result<Arc<dyn Upscaler>, ModelError> {
    let tiles = TileConfig {
        tile: config.tile,
        pad: config.tile_pad,
    };
    let upscaler: Arc<dyn Upscaler> = match config.upscale_backend {
        UpscaleBackend::Realesrgan => Arc::new(RealEsrganScript::load(
            runtime.clone(),
            config.upscale_script.clone(),
            &config.weights_dir,
            tiles,
        )?),
        UpscaleBackend::Lanczos => Arc::new(LanczosUpscaler::new(tiles)),
    };
    info!("   ✓ Upscaler loaded: {} (x{})", upscaler.name(), upscaler.scale());
    Ok(upscaler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) / 2) as u8]))
    }

    #[test]
    fn test_resolve_auto_tile() {
        let auto = TileConfig::default();
        assert_eq!(auto.resolve(1200, 900), AUTO_TILE);
        assert_eq!(auto.resolve(800, 600), 0);
        let fixed = TileConfig { tile: 128, pad: 4 };
        assert_eq!(fixed.resolve(10, 10), 128);
    }

    #[test]
    fn test_plan_tiles_covers_frame_once() {
        let tiles = plan_tiles(1000, 450, 400);
        assert_eq!(tiles.len(), 6);
        let area: u64 = tiles.iter().map(|t| t.width as u64 * t.height as u64).sum();
        assert_eq!(area, 1000 * 450);
        assert_eq!(tiles.last().unwrap(), &Tile { x: 800, y: 400, width: 200, height: 50 });

        assert_eq!(plan_tiles(300, 200, 0).len(), 1);
        assert_eq!(plan_tiles(300, 200, 400).len(), 1);
    }

    #[test]
    fn test_tiled_matches_whole_frame() {
        let img = gradient(90, 70);
        let whole = upscale_tiled(&img, 2, 0, 10).unwrap();
        let tiled = upscale_tiled(&img, 2, 32, 10).unwrap();
        assert_eq!(whole.dimensions(), (180, 140));
        assert_eq!(tiled.dimensions(), (180, 140));
        let max_diff = whole
            .as_raw()
            .iter()
            .zip(tiled.as_raw())
            .map(|(a, b)| (*a as i16 - *b as i16).abs())
            .max()
            .unwrap();
        assert!(max_diff <= 2, "seam difference {}", max_diff);
    }

    #[tokio::test]
    async fn test_lanczos_doubles_dimensions() {
        let up = LanczosUpscaler::new(TileConfig::default());
        let out = up.upscale(&gradient(41, 17)).await.unwrap();
        assert_eq!(out.dimensions(), (82, 34));
        assert_eq!(up.scale(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_realesrgan_requires_weights() {
        use crate::device::Device;
        use std::time::Duration;

        let root = tempfile::TempDir::new().unwrap();
        let script = root.path().join("inference_realesrgan.py");
        std::fs::write(&script, "exit 0\n").unwrap();
        let runtime = ScriptRuntime {
            interpreter: "sh".to_string(),
            timeout: Duration::from_secs(5),
            scratch_root: root.path().to_path_buf(),
            device: Device::Cpu,
        };
        let result = RealEsrganScript::load(runtime, script, root.path(), TileConfig::default());
        assert!(matches!(result, Err(ModelError::Unavailable(msg)) if msg.contains("weights")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_realesrgan_passes_tile_and_precision() {
        use crate::device::Device;
        use std::time::Duration;

        let root = tempfile::TempDir::new().unwrap();
        std::fs::write(root.path().join(REALESRGAN_WEIGHTS), b"weights").unwrap();
        // Refuse to produce output unless the CPU flags arrive
        let script = root.path().join("inference_realesrgan.py");
        std::fs::write(
            &script,
            "case \"$*\" in *\"-t 16\"*--fp32*) cp \"$4\" \"$6/input_out.png\";; esac\n",
        )
        .unwrap();
        let runtime = ScriptRuntime {
            interpreter: "sh".to_string(),
            timeout: Duration::from_secs(5),
            scratch_root: root.path().to_path_buf(),
            device: Device::Cpu,
        };
        let up = RealEsrganScript::load(runtime, script, root.path(), TileConfig { tile: 16, pad: 2 }).unwrap();
        let img = gradient(8, 8);
        // The fake script copies its input, so the frame comes back unscaled
        assert_eq!(up.upscale(&img).await.unwrap(), img);
    }
}
