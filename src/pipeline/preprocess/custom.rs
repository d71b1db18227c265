//! Ad hoc pipelines assembled from a menu of operations.
//!
//! Unlike the core sequence, a custom pipeline is best-effort: an operation
//! that fails (bad parameters, degenerate image) is logged and skipped, and
//! the remaining operations still run on the last good image.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::buffer::to_gray;
use super::clahe::equalize_lightness;
use super::denoise::non_local_means;
use super::edge_preserve::recursive_filter;
use super::filters::{
    bilateral_filter, blend, filter_rgb3x3, gaussian_blur, laplacian, map_channels, median_filter,
    saturate_u8, sobel_magnitude, Plane,
};
use super::operators::{apply_lut, gamma_lut};
use super::{ensure_not_empty, StageError};
use crate::pipeline::analysis::statistics::StatisticsEngine;
use crate::pipeline::types::Snapshot;
use crate::pipeline_config::{BilateralConfig, ClaheConfig, DenoiseConfig, EdgePreserveConfig};

/// Fraction of pixels (by Laplacian magnitude) left untouched by wrinkle
/// smoothing.
const WRINKLE_PERCENTILE: f64 = 70.0;

/// Upper bounds on caller-supplied window sizes.
const MAX_KERNEL_SIZE: u32 = 31;
const MAX_TEMPLATE_WINDOW: u32 = 21;
const MAX_SEARCH_WINDOW: u32 = 51;
const MAX_GRID_SIZE: u32 = 64;
/// Retinex blur derives its kernel from sigma (`6 * sigma + 1`).
const MAX_RETINEX_SIGMA: f32 = 100.0;

/// One selectable operation with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CustomOperation {
    /// Even kernel sizes are bumped to the next odd size.
    GaussianBlur { kernel_size: u32, sigma: f32 },
    MedianFilter { kernel_size: u32 },
    EdgePreserving { sigma_spatial: f32, sigma_range: f32 },
    NonLocalMeans { strength: f32, template_window: u32, search_window: u32 },
    AdaptiveHistogram { clip_limit: f32, grid_size: u32 },
    GammaCorrection { gamma: f32 },
    /// `c * ln(1 + v)`, saturated.
    LogTransform { c: f32 },
    /// Sobel magnitude of the luma, replicated to all channels.
    SobelEdges,
    /// Lift values below 30 % by 1.4x, then pull values above 80 % down by 0.85x.
    ShadowHighlightRecovery,
    /// Strengthened sharpen kernel blended 70/30 with the image.
    FabricTexture { strength: f32 },
    /// Bilateral smoothing applied only where the Laplacian response is strong.
    WrinkleSmoothing { strength: f32 },
    /// Single-scale retinex, stretched to 0-255.
    LightingNormalization { sigma: f32 },
}

impl CustomOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GaussianBlur { .. } => "gaussian_blur",
            Self::MedianFilter { .. } => "median_filter",
            Self::EdgePreserving { .. } => "edge_preserving",
            Self::NonLocalMeans { .. } => "non_local_means",
            Self::AdaptiveHistogram { .. } => "adaptive_histogram",
            Self::GammaCorrection { .. } => "gamma_correction",
            Self::LogTransform { .. } => "log_transform",
            Self::SobelEdges => "sobel_edges",
            Self::ShadowHighlightRecovery => "shadow_highlight_recovery",
            Self::FabricTexture { .. } => "fabric_texture",
            Self::WrinkleSmoothing { .. } => "wrinkle_smoothing",
            Self::LightingNormalization { .. } => "lighting_normalization",
        }
    }

    /// Apply the operation to `img`, returning a new image.
    pub fn apply(&self, img: &RgbImage) -> Result<RgbImage, StageError> {
        ensure_not_empty(img)?;
        match *self {
            Self::GaussianBlur { kernel_size, sigma } => {
                if kernel_size == 0 || !(sigma.is_finite() && sigma >= 0.0) {
                    return Err(invalid("gaussian_blur", format!("kernel {kernel_size}, sigma {sigma}")));
                }
                ensure_at_most("gaussian_blur", "kernel_size", kernel_size, MAX_KERNEL_SIZE)?;
                let ksize = (kernel_size | 1) as usize;
                // sigma 0 derives the spread from the kernel size.
                let sigma = if sigma > 0.0 {
                    sigma
                } else {
                    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
                };
                Ok(map_channels(img, |p| gaussian_blur(p, sigma, Some(ksize))))
            }
            Self::MedianFilter { kernel_size } => {
                if kernel_size < 3 || kernel_size % 2 == 0 {
                    return Err(invalid(
                        "median_filter",
                        format!("kernel size must be odd and >= 3, got {kernel_size}"),
                    ));
                }
                ensure_at_most("median_filter", "kernel_size", kernel_size, MAX_KERNEL_SIZE)?;
                Ok(map_channels(img, |p| median_filter(p, kernel_size as usize)))
            }
            Self::EdgePreserving {
                sigma_spatial,
                sigma_range,
            } => recursive_filter(
                img,
                &EdgePreserveConfig {
                    sigma_spatial,
                    sigma_range,
                    ..EdgePreserveConfig::default()
                },
            ),
            Self::NonLocalMeans {
                strength,
                template_window,
                search_window,
            } => {
                ensure_at_most("non_local_means", "template_window", template_window, MAX_TEMPLATE_WINDOW)?;
                ensure_at_most("non_local_means", "search_window", search_window, MAX_SEARCH_WINDOW)?;
                non_local_means(
                    img,
                    &DenoiseConfig {
                        strength,
                        template_window,
                        search_window,
                        bilateral_pass: None,
                    },
                )
            }
            Self::AdaptiveHistogram {
                clip_limit,
                grid_size,
            } => {
                if !(clip_limit.is_finite() && clip_limit >= 0.0) {
                    return Err(invalid("adaptive_histogram", format!("clip limit {clip_limit}")));
                }
                if grid_size == 0 {
                    return Err(invalid("adaptive_histogram", "grid size must be positive".into()));
                }
                ensure_at_most("adaptive_histogram", "grid_size", grid_size, MAX_GRID_SIZE)?;
                equalize_lightness(
                    img,
                    &ClaheConfig {
                        clip_limit,
                        tiles_x: grid_size,
                        tiles_y: grid_size,
                    },
                )
            }
            Self::GammaCorrection { gamma } => {
                if !(gamma.is_finite() && gamma > 0.0) {
                    return Err(invalid("gamma_correction", format!("gamma must be positive, got {gamma}")));
                }
                Ok(apply_lut(img, &gamma_lut(gamma)))
            }
            Self::LogTransform { c } => {
                if !c.is_finite() {
                    return Err(invalid("log_transform", format!("c must be finite, got {c}")));
                }
                let mut lut = [0u8; 256];
                for (v, out) in lut.iter_mut().enumerate() {
                    *out = saturate_u8(c * (1.0 + v as f32).ln());
                }
                Ok(apply_lut(img, &lut))
            }
            Self::SobelEdges => {
                let gray = Plane::from_gray(&to_gray(img));
                let edges = sobel_magnitude(&gray);
                let mut out = RgbImage::new(img.width(), img.height());
                for (px, &m) in out.pixels_mut().zip(&edges.data) {
                    let v = saturate_u8(m);
                    *px = Rgb([v, v, v]);
                }
                Ok(out)
            }
            Self::ShadowHighlightRecovery => {
                let mut lut = [0u8; 256];
                for (v, out) in lut.iter_mut().enumerate() {
                    let mut x = v as f32 / 255.0;
                    if x < 0.3 {
                        x *= 1.4;
                    }
                    if x > 0.8 {
                        x *= 0.85;
                    }
                    *out = saturate_u8(x.clamp(0.0, 1.0) * 255.0);
                }
                Ok(apply_lut(img, &lut))
            }
            Self::FabricTexture { strength } => {
                if !strength.is_finite() {
                    return Err(invalid("fabric_texture", format!("strength {strength}")));
                }
                let kernel = [
                    [-strength, -strength, -strength],
                    [-strength, 9.0 * strength, -strength],
                    [-strength, -strength, -strength],
                ];
                let enhanced = filter_rgb3x3(img, &kernel);
                Ok(blend(img, 0.7, &enhanced, 0.3, 0.0))
            }
            Self::WrinkleSmoothing { strength } => {
                if !(0.0..=1.0).contains(&strength) {
                    return Err(invalid("wrinkle_smoothing", format!("strength must be in [0, 1], got {strength}")));
                }
                Ok(smooth_wrinkles(img, strength))
            }
            Self::LightingNormalization { sigma } => {
                if !(sigma.is_finite() && sigma > 0.0 && sigma <= MAX_RETINEX_SIGMA) {
                    return Err(invalid(
                        "lighting_normalization",
                        format!("sigma must be in (0, {MAX_RETINEX_SIGMA}], got {sigma}"),
                    ));
                }
                Ok(single_scale_retinex(img, sigma))
            }
        }
    }
}

fn invalid(name: &'static str, reason: String) -> StageError {
    StageError::InvalidParameter { name, reason }
}

fn ensure_at_most(name: &'static str, field: &str, value: u32, max: u32) -> Result<(), StageError> {
    if value > max {
        return Err(invalid(name, format!("{field} must be at most {max}, got {value}")));
    }
    Ok(())
}

fn smooth_wrinkles(img: &RgbImage, strength: f32) -> RgbImage {
    let response = laplacian(&Plane::from_gray(&to_gray(img)));
    let magnitudes: Vec<f32> = response.data.iter().map(|v| v.abs()).collect();
    let threshold = percentile(&magnitudes, WRINKLE_PERCENTILE);

    let smoothed = bilateral_filter(
        img,
        &BilateralConfig {
            diameter: 9,
            sigma_color: 80.0,
            sigma_space: 80.0,
        },
    );

    let mut out = img.clone();
    for ((px, soft), &m) in out.pixels_mut().zip(smoothed.pixels()).zip(&magnitudes) {
        if m > threshold {
            for c in 0..3 {
                px.0[c] = saturate_u8(px.0[c] as f32 * (1.0 - strength) + soft.0[c] as f32 * strength);
            }
        }
    }
    out
}

/// Linear-interpolated percentile (`p` in 0-100).
fn percentile(values: &[f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn single_scale_retinex(img: &RgbImage, sigma: f32) -> RgbImage {
    let mut planes: Vec<Plane> = (0..3)
        .map(|c| {
            let mut p = Plane::from_channel(img, c);
            for v in p.data.iter_mut() {
                *v += 1.0;
            }
            let blurred = gaussian_blur(&p, sigma, None);
            for (v, b) in p.data.iter_mut().zip(&blurred.data) {
                *v = v.ln() - b.ln();
            }
            p
        })
        .collect();

    let lo = planes
        .iter()
        .flat_map(|p| p.data.iter().copied())
        .fold(f32::INFINITY, f32::min);
    let hi = planes
        .iter()
        .flat_map(|p| p.data.iter().copied())
        .fold(f32::NEG_INFINITY, f32::max);
    let range = hi - lo;

    for p in planes.iter_mut() {
        for v in p.data.iter_mut() {
            *v = if range > 0.0 { (*v - lo) / range * 255.0 } else { 0.0 };
        }
    }

    let mut out = RgbImage::new(img.width(), img.height());
    for (i, px) in out.pixels_mut().enumerate() {
        px.0 = [
            saturate_u8(planes[0].data[i]),
            saturate_u8(planes[1].data[i]),
            saturate_u8(planes[2].data[i]),
        ];
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedOperation {
    pub operation: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CustomPipelineOutcome {
    pub image: RgbImage,
    /// Names of the operations that ran, in order.
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedOperation>,
}

/// Apply `operations` in order. When `statistics` is given, each successful
/// operation is captured as `custom_NN_<name>` (NN is its 1-based position).
pub fn run_custom_pipeline(
    image: &RgbImage,
    operations: &[CustomOperation],
    mut statistics: Option<&mut StatisticsEngine>,
) -> CustomPipelineOutcome {
    let mut current = image.clone();
    let mut applied = Vec::new();
    let mut skipped = Vec::new();

    for (index, operation) in operations.iter().enumerate() {
        let name = operation.name();
        match operation.apply(&current) {
            Ok(next) => {
                debug!(operation = name, position = index + 1, "Applied custom operation");
                if let Some(engine) = statistics.as_deref_mut() {
                    let label = format!("custom_{:02}_{name}", index + 1);
                    engine.capture(&Snapshot::rgb(label.as_str(), next.clone()), &label);
                }
                current = next;
                applied.push(name.to_string());
            }
            Err(e) => {
                warn!(operation = name, error = %e, "Custom operation failed, skipping");
                skipped.push(SkippedOperation {
                    operation: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    CustomPipelineOutcome {
        image: current,
        applied,
        skipped,
    }
}
