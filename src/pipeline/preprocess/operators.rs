//! One function per pipeline stage.
//!
//! Each operator is a pure `&RgbImage -> RgbImage` transform. The orchestrator
//! calls them in sequence; custom pipelines and auto-correction reuse them
//! with their own parameters.

use image::RgbImage;
use tracing::debug;

use super::buffer::to_gray;
use super::clahe::equalize_lightness;
use super::color::{lab_to_rgb, rgb_to_lab, scale_saturation};
use super::denoise::non_local_means;
use super::edge_preserve::recursive_filter;
use super::filters::{
    blend, blend_planes, filter_rgb3x3, gaussian_blur_rgb, saturate_u8, sobel_magnitude, Plane,
};
use super::{ensure_not_empty, StageError};
use crate::pipeline_config::{
    ClaheConfig, DenoiseConfig, EdgeEnhanceConfig, EdgePreserveConfig, FinalOptimizeConfig,
    GammaConfig, SaturationConfig, SharpenConfig, TextureConfig, WhiteBalanceConfig,
};

/// High-pass kernel that lifts fabric weave and stitching.
pub const TEXTURE_KERNEL: [[f32; 3]; 3] = [[-0.5, -1.0, -0.5], [-1.0, 7.0, -1.0], [-0.5, -1.0, -0.5]];

// ═══════════════════════════════════════════════════════════
// Intensity
// ═══════════════════════════════════════════════════════════

/// Stretch each channel independently to the full 0-255 range.
/// A flat channel (max == min) is left unchanged.
pub fn normalize_colors(img: &RgbImage) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;

    let mut lo = [u8::MAX; 3];
    let mut hi = [u8::MIN; 3];
    for p in img.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(p.0[c]);
            hi[c] = hi[c].max(p.0[c]);
        }
    }

    let luts: Vec<[u8; 256]> = (0..3)
        .map(|c| {
            let mut lut = [0u8; 256];
            for (v, out) in lut.iter_mut().enumerate() {
                *out = if hi[c] > lo[c] {
                    let scaled = (v as f32 - lo[c] as f32) * 255.0 / (hi[c] - lo[c]) as f32;
                    saturate_u8(scaled)
                } else {
                    v as u8
                };
            }
            lut
        })
        .collect();

    let mut out = img.clone();
    for p in out.pixels_mut() {
        for c in 0..3 {
            p.0[c] = luts[c][p.0[c] as usize];
        }
    }
    debug!(min = ?lo, max = ?hi, "Normalized channel ranges");
    Ok(out)
}

/// Gamma for a given mean brightness: dark images get `dark_gamma`, bright
/// ones `bright_gamma`, everything in between is left alone (1.0).
pub fn select_gamma(brightness: f64, config: &GammaConfig) -> f32 {
    if brightness < config.dark_threshold {
        config.dark_gamma
    } else if brightness > config.bright_threshold {
        config.bright_gamma
    } else {
        1.0
    }
}

/// `lut[v] = round(255 * (v / 255) ^ gamma)`.
pub fn gamma_lut(gamma: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        *out = saturate_u8(255.0 * (v as f32 / 255.0).powf(gamma));
    }
    lut
}

pub fn apply_lut(img: &RgbImage, lut: &[u8; 256]) -> RgbImage {
    let mut out = img.clone();
    for v in out.iter_mut() {
        *v = lut[*v as usize];
    }
    out
}

/// Gamma chosen from the mean luma of the image.
pub fn adaptive_gamma(img: &RgbImage, config: &GammaConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let gray = to_gray(img);
    let brightness =
        gray.as_raw().iter().map(|&v| v as f64).sum::<f64>() / gray.as_raw().len() as f64;
    let gamma = select_gamma(brightness, config);
    debug!(brightness, gamma, "Selected adaptive gamma");

    if gamma == 1.0 {
        return Ok(img.clone());
    }
    Ok(apply_lut(img, &gamma_lut(gamma)))
}

/// Linear intensity transform `alpha * v + beta`, saturated.
pub fn linear_transform(img: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut out = img.clone();
    for v in out.iter_mut() {
        *v = saturate_u8(alpha * *v as f32 + beta);
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Contrast and smoothing
// ═══════════════════════════════════════════════════════════

pub fn local_contrast(img: &RgbImage, config: &ClaheConfig) -> Result<RgbImage, StageError> {
    equalize_lightness(img, config)
}

pub fn denoise(img: &RgbImage, config: &DenoiseConfig) -> Result<RgbImage, StageError> {
    non_local_means(img, config)
}

pub fn edge_preserve(img: &RgbImage, config: &EdgePreserveConfig) -> Result<RgbImage, StageError> {
    recursive_filter(img, config)
}

// ═══════════════════════════════════════════════════════════
// Detail
// ═══════════════════════════════════════════════════════════

/// Sobel magnitude of the luma (clipped to 8 bits) blended into every channel.
pub fn enhance_edges(img: &RgbImage, config: &EdgeEnhanceConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let gray = Plane::from_gray(&to_gray(img));
    let mut edges = sobel_magnitude(&gray);
    for v in edges.data.iter_mut() {
        *v = saturate_u8(*v) as f32;
    }
    let planes = [edges.clone(), edges.clone(), edges];
    Ok(blend_planes(img, config.image_weight, &planes, config.edge_weight))
}

/// Unsharp mask: `(1 + amount) * img - amount * gauss(img, sigma)`.
pub fn unsharp_mask(img: &RgbImage, config: &SharpenConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let blurred = gaussian_blur_rgb(img, config.sigma, None);
    Ok(blend_planes(img, 1.0 + config.amount, &blurred, -config.amount))
}

/// Fabric texture: the high-pass kernel response (saturated) blended back.
pub fn enhance_texture(img: &RgbImage, config: &TextureConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let texture = filter_rgb3x3(img, &TEXTURE_KERNEL);
    Ok(blend(img, config.image_weight, &texture, config.texture_weight, 0.0))
}

/// Light Gaussian smoothing blended with the image.
pub fn final_optimize(img: &RgbImage, config: &FinalOptimizeConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let smoothed = gaussian_blur_rgb(img, config.sigma, Some(config.kernel_size as usize));
    Ok(blend_planes(img, config.image_weight, &smoothed, config.smoothed_weight))
}

// ═══════════════════════════════════════════════════════════
// Color
// ═══════════════════════════════════════════════════════════

/// Stretch L*a*b* lightness to the full range; chroma untouched.
pub fn correct_colors(img: &RgbImage) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let mut lab = rgb_to_lab(img);
    let lightness = lab.lightness_u8();
    let lo = lightness.iter().copied().min().unwrap_or(0);
    let hi = lightness.iter().copied().max().unwrap_or(255);
    if hi == lo {
        return Ok(img.clone());
    }
    let scale = 255.0 / (hi - lo) as f32;
    let stretched: Vec<u8> = lightness
        .iter()
        .map(|&v| saturate_u8((v - lo) as f32 * scale))
        .collect();
    lab.set_lightness_u8(&stretched);
    debug!(l_min = lo, l_max = hi, "Stretched lightness range");
    Ok(lab_to_rgb(&lab))
}

pub fn enhance_saturation(img: &RgbImage, config: &SaturationConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    Ok(scale_saturation(img, config.gain))
}

/// Gray-world white balance: shift a and b toward neutral, more strongly in
/// brighter pixels.
pub fn white_balance(img: &RgbImage, config: &WhiteBalanceConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let mut lab = rgb_to_lab(img);
    let n = lab.a.len() as f64;
    let avg_a = (lab.a.iter().map(|&v| v as f64).sum::<f64>() / n) as f32;
    let avg_b = (lab.b.iter().map(|&v| v as f64).sum::<f64>() / n) as f32;

    for i in 0..lab.l.len() {
        let weight = lab.l[i] / 255.0 * config.strength;
        lab.a[i] = (lab.a[i] - (avg_a - 128.0) * weight).clamp(0.0, 255.0);
        lab.b[i] = (lab.b[i] - (avg_b - 128.0) * weight).clamp(0.0, 255.0);
    }
    debug!(avg_a, avg_b, "Applied white balance");
    Ok(lab_to_rgb(&lab))
}
