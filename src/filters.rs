//! CPU pixel primitives
//!
//! Row-parallel (rayon) building blocks shared by the color grade and the
//! coordinator: luma, constant/gray blends, a separable Gaussian blur and
//! SIMD resizing via `fast_image_resize`.

use crate::error::{EnhanceError, Result};
use image::RgbImage;
use rayon::prelude::*;

/// Resampling kernel for [`resize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleFilter {
    /// Box convolution, i.e. area averaging when shrinking
    Area,
    Lanczos3,
}

/// ITU-R 601-2 luma in 16.16 fixed point
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// `a + factor * (b - a)`, clamped then truncated to 8 bits
#[inline]
pub fn blend_channel(a: u8, b: u8, factor: f32) -> u8 {
    let v = a as f32 + factor * (b as f32 - a as f32);
    v.clamp(0.0, 255.0) as u8
}

/// Mean luma of the image, rounded to the nearest level
pub fn mean_luma(image: &RgbImage) -> u8 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0;
    }
    let sum: u64 = image
        .as_raw()
        .par_chunks(3)
        .map(|p| luma(p[0], p[1], p[2]) as u64)
        .sum();
    ((sum as f64 / count as f64) + 0.5) as u8
}

/// Blend every pixel away from black by `factor`
pub fn scale_brightness(image: &mut RgbImage, factor: f32) {
    image
        .par_chunks_mut(3)
        .for_each(|p| p.iter_mut().for_each(|c| *c = blend_channel(0, *c, factor)));
}

/// Blend every pixel away from its own luma by `factor`
pub fn scale_saturation(image: &mut RgbImage, factor: f32) {
    image.par_chunks_mut(3).for_each(|p| {
        let gray = luma(p[0], p[1], p[2]);
        for c in p.iter_mut() {
            *c = blend_channel(gray, *c, factor);
        }
    });
}

/// Blend every pixel away from the image's mean luma by `factor`
pub fn scale_contrast(image: &mut RgbImage, factor: f32) {
    let mid = mean_luma(image);
    image
        .par_chunks_mut(3)
        .for_each(|p| p.iter_mut().for_each(|c| *c = blend_channel(mid, *c, factor)));
}

/// Multiply each channel by its own gain, rounding and saturating
pub fn scale_channels(image: &mut RgbImage, gains: [f32; 3]) {
    image.par_chunks_mut(3).for_each(|p| {
        for (c, gain) in p.iter_mut().zip(gains) {
            *c = (*c as f32 * gain).round().clamp(0.0, 255.0) as u8;
        }
    });
}

/// Normalized Gaussian taps; size is `round(sigma * 6 + 1) | 1`
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let size = ((sigma * 3.0 * 2.0 + 1.0).round() as usize) | 1;
    let center = (size / 2) as f32;
    let denom = 2.0 * sigma * sigma;
    let mut taps: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / denom).exp()
        })
        .collect();
    let total: f32 = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= total);
    taps
}

/// Mirror an out-of-range index without repeating the edge sample (reflect-101)
#[inline]
fn reflect_101(mut i: isize, n: isize) -> usize {
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Separable Gaussian blur with reflect-101 borders
pub fn gaussian_blur(image: &RgbImage, sigma: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let w = width as usize;
    let h = height as usize;
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let src = image.as_raw();

    // Horizontal pass into a float scratch buffer
    let mut tmp = vec![0f32; w * h * 3];
    tmp.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
        let src_row = &src[y * w * 3..(y + 1) * w * 3];
        for x in 0..w {
            let mut acc = [0f32; 3];
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect_101(x as isize + k as isize - radius, w as isize);
                for c in 0..3 {
                    acc[c] += weight * src_row[sx * 3 + c] as f32;
                }
            }
            row[x * 3..x * 3 + 3].copy_from_slice(&acc);
        }
    });

    // Vertical pass back to 8 bits
    let mut out = vec![0u8; w * h * 3];
    out.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let mut acc = [0f32; 3];
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect_101(y as isize + k as isize - radius, h as isize);
                let idx = (sy * w + x) * 3;
                for c in 0..3 {
                    acc[c] += weight * tmp[idx + c];
                }
            }
            for c in 0..3 {
                row[x * 3 + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    });

    RgbImage::from_raw(width, height, out).unwrap_or_else(|| image.clone())
}

/// `original * (1 + amount) - blurred * amount`, rounded and saturated
pub fn unsharp_combine(original: &mut RgbImage, blurred: &RgbImage, amount: f32) {
    let dst: &mut [u8] = &mut **original;
    dst.par_iter_mut()
        .zip(blurred.as_raw().par_iter())
        .for_each(|(o, b)| {
            let v = *o as f32 * (1.0 + amount) - *b as f32 * amount;
            *o = v.round().clamp(0.0, 255.0) as u8;
        });
}

/// Resize using fast_image_resize (SIMD-optimized)
pub fn resize(image: &RgbImage, width: u32, height: u32, filter: ResampleFilter) -> Result<RgbImage> {
    use fast_image_resize as fr;
    use fr::images::Image as FrImage;

    if width == 0 || height == 0 {
        return Err(EnhanceError::Processing(format!(
            "Cannot resize to {}x{}",
            width, height
        )));
    }

    let src_image = FrImage::from_vec_u8(
        image.width(),
        image.height(),
        image.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| EnhanceError::Processing(format!("Failed to create source image: {:?}", e)))?;

    let mut dst_image = FrImage::new(width, height, src_image.pixel_type());

    let kernel = match filter {
        ResampleFilter::Area => fr::FilterType::Box,
        ResampleFilter::Lanczos3 => fr::FilterType::Lanczos3,
    };
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(kernel));

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| EnhanceError::Processing(format!("Resize failed: {:?}", e)))?;

    RgbImage::from_raw(width, height, dst_image.buffer().to_vec())
        .ok_or_else(|| EnhanceError::Processing("Resized buffer has wrong length".to_string()))
}
