//! Magazine-look color grade
//!
//! Fixed five-step tonal recipe applied after AI upscaling. The order matters:
//! each step reads the previous step's output.
//!
//! 1. Exposure lift (+8%)
//! 2. Saturation boost (+8%)
//! 3. Contrast boost (+8%) around the image's mean luma
//! 4. Warm bias: red ×1.05, blue ×0.98
//! 5. Unsharp mask: `1.15·img − 0.15·blur(σ=3)`
//!
//! All work happens on an RGB copy; the caller's buffer is never touched.

use crate::filters;
use image::{DynamicImage, RgbImage};

pub const EXPOSURE_FACTOR: f32 = 1.08;
pub const SATURATION_FACTOR: f32 = 1.08;
pub const CONTRAST_FACTOR: f32 = 1.08;
/// Per-channel gains in RGB order
pub const WARM_GAINS: [f32; 3] = [1.05, 1.0, 0.98];
pub const DETAIL_SIGMA: f32 = 3.0;
pub const DETAIL_AMOUNT: f32 = 0.15;

/// Apply the grade to any decoded image (gray and alpha inputs become RGB)
pub fn apply_look(image: &DynamicImage) -> RgbImage {
    grade(image.to_rgb8())
}

/// Apply the grade to an RGB buffer
pub fn apply_look_rgb(image: &RgbImage) -> RgbImage {
    grade(image.clone())
}

fn grade(mut img: RgbImage) -> RgbImage {
    filters::scale_brightness(&mut img, EXPOSURE_FACTOR);
    filters::scale_saturation(&mut img, SATURATION_FACTOR);
    filters::scale_contrast(&mut img, CONTRAST_FACTOR);
    filters::scale_channels(&mut img, WARM_GAINS);

    let blurred = filters::gaussian_blur(&img, DETAIL_SIGMA);
    filters::unsharp_combine(&mut img, &blurred, DETAIL_AMOUNT);
    img
}
