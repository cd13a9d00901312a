//! Face restoration backends
//!
//! Every integration sits behind [`FaceRestorer`]. Backends run at scale 1 so
//! the coordinator controls the only resolution change in the pipeline.

use crate::config::{Config, FaceBackend};
use crate::error::ModelError;
use crate::process::ScriptRuntime;
use crate::weights::{self, CODEFORMER_WEIGHTS, GFPGAN_WEIGHTS, PARSENET_WEIGHTS};
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// GFPGAN weights revision passed to `inference_gfpgan.py -v`
pub const GFPGAN_VERSION: &str = "1.4";

#[async_trait]
pub trait FaceRestorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Restore faces; fails with `ModelError::Unavailable` when the backing
    /// model cannot be loaded or invoked
    async fn restore(&self, image: &RgbImage) -> Result<RgbImage, ModelError>;
}

/// GFPGAN via `inference_gfpgan.py`
pub struct GfpganScript {
    runtime: ScriptRuntime,
    script: PathBuf,
}

impl GfpganScript {
    pub fn load(runtime: ScriptRuntime, script: PathBuf, weights_dir: &Path) -> Result<Self, ModelError> {
        runtime.check(&script)?;
        weights::require(weights_dir, GFPGAN_WEIGHTS)?;
        Ok(Self { runtime, script })
    }
}

#[async_trait]
impl FaceRestorer for GfpganScript {
    fn name(&self) -> &'static str {
        "gfpgan"
    }

    async fn restore(&self, image: &RgbImage) -> Result<RgbImage, ModelError> {
        self.runtime
            .run_image(image, |input, out_dir| {
                self.runtime
                    .command(&self.script)
                    .arg("-i")
                    .path_arg(input)
                    .arg("-o")
                    .path_arg(out_dir)
                    .args(&["-v", GFPGAN_VERSION, "-s", "1", "--bg_upsampler", "none", "--ext", "png"])
                    .expect_output(out_dir.join("restored_imgs").join("input.png"))
            })
            .await
    }
}

/// CodeFormer via `inference_codeformer.py`
pub struct CodeFormerScript {
    runtime: ScriptRuntime,
    script: PathBuf,
    fidelity: f32,
}

impl CodeFormerScript {
    pub fn load(
        runtime: ScriptRuntime,
        script: PathBuf,
        weights_dir: &Path,
        fidelity: f32,
    ) -> Result<Self, ModelError> {
        runtime.check(&script)?;
        weights::require(weights_dir, CODEFORMER_WEIGHTS)?;
        weights::require(weights_dir, PARSENET_WEIGHTS)?;
        Ok(Self {
            runtime,
            script,
            fidelity: fidelity.clamp(0.0, 1.0),
        })
    }

    pub fn fidelity(&self) -> f32 {
        self.fidelity
    }
}

#[async_trait]
impl FaceRestorer for CodeFormerScript {
    fn name(&self) -> &'static str {
        "codeformer"
    }

    async fn restore(&self, image: &RgbImage) -> Result<RgbImage, ModelError> {
        let fidelity = format!("{:.2}", self.fidelity);
        self.runtime
            .run_image(image, |input, out_dir| {
                self.runtime
                    .command(&self.script)
                    .args(&["-w", fidelity.as_str(), "--input_path"])
                    .path_arg(input)
                    .arg("--output_path")
                    .path_arg(out_dir)
                    .args(&["--upscale", "1", "--bg_upsampler", "none"])
                    .expect_output(out_dir.join("final_results").join("input.png"))
            })
            .await
    }
}

/// Build the configured face backend; `Ok(None)` when disabled
pub fn from_config(
    config: &Config,
    runtime: &ScriptRuntime,
) -> Result<Option<Arc<dyn FaceRestorer>>, ModelError> {
    let Some(script) = config.face_script_path() else {
        info!("   Face restoration disabled");
        return Ok(None);
    };

    let restorer: Arc<dyn FaceRestorer> = match config.face_backend {
        FaceBackend::Gfpgan => Arc::new(GfpganScript::load(runtime.clone(), script, &config.weights_dir)?),
        FaceBackend::Codeformer => Arc::new(CodeFormerScript::load(
            runtime.clone(),
            script,
            &config.weights_dir,
            config.fidelity,
        )?),
        FaceBackend::None => return Ok(None),
    };
    info!("   ✓ Face restorer loaded: {}", restorer.name());
    Ok(Some(restorer))
}
