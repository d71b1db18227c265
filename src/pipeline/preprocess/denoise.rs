//! Non-local means denoising.
//!
//! For every pixel, candidates inside a `search x search` window are averaged
//! with weights `exp(-d / h^2)`, where `d` is the mean squared difference of the
//! `template x template` patches around the two pixels. Patch distances are
//! computed per search offset with an integral image, so the cost is
//! independent of the template size.

use image::RgbImage;
use tracing::debug;

use super::filters::{bilateral_filter, reflect101};
use super::{ensure_not_empty, StageError};
use crate::pipeline_config::DenoiseConfig;

/// Weights below this are treated as zero; bounds the lookup table.
const MIN_WEIGHT: f64 = 1e-4;

/// Denoise each RGB channel independently, then apply the optional bilateral
/// pass.
pub fn non_local_means(img: &RgbImage, config: &DenoiseConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    validate(config)?;

    let (w, h) = (img.width() as usize, img.height() as usize);
    let raw = img.as_raw();
    let mut out = RgbImage::new(img.width(), img.height());

    for c in 0..3 {
        let plane: Vec<u8> = raw.iter().skip(c).step_by(3).copied().collect();
        let filtered = denoise_plane(&plane, w, h, config);
        for (dst, v) in out.iter_mut().skip(c).step_by(3).zip(filtered) {
            *dst = v;
        }
    }

    debug!(
        strength = config.strength,
        template = config.template_window,
        search = config.search_window,
        bilateral = config.bilateral_pass.is_some(),
        "Applied non-local means"
    );

    Ok(match &config.bilateral_pass {
        Some(bilateral) => bilateral_filter(&out, bilateral),
        None => out,
    })
}

fn validate(config: &DenoiseConfig) -> Result<(), StageError> {
    if !(config.strength.is_finite() && config.strength > 0.0) {
        return Err(StageError::InvalidParameter {
            name: "strength",
            reason: format!("must be positive, got {}", config.strength),
        });
    }
    for (name, size) in [
        ("template_window", config.template_window),
        ("search_window", config.search_window),
    ] {
        if size == 0 || size % 2 == 0 {
            return Err(StageError::InvalidParameter {
                name,
                reason: format!("must be a positive odd size, got {size}"),
            });
        }
    }
    Ok(())
}

/// Non-local means on one 8-bit plane.
pub fn denoise_plane(plane: &[u8], width: usize, height: usize, config: &DenoiseConfig) -> Vec<u8> {
    let t = (config.template_window / 2) as usize;
    let s = (config.search_window / 2) as usize;
    let pad = s + t;
    let template_area = ((2 * t + 1) * (2 * t + 1)) as f64;
    let h2 = (config.strength as f64).powi(2);

    // Padded source; every template of every candidate lies inside it.
    let pw = width + 2 * pad;
    let ph = height + 2 * pad;
    let mut padded = vec![0i32; pw * ph];
    for py in 0..ph {
        let sy = reflect101(py as isize - pad as isize, height);
        for px in 0..pw {
            let sx = reflect101(px as isize - pad as isize, width);
            padded[py * pw + px] = plane[sy * width + sx] as i32;
        }
    }

    // weight(sum of squared patch differences); zero beyond the table.
    let cutoff = (template_area * h2 * (1.0 / MIN_WEIGHT).ln()).ceil() as usize + 1;
    let weights: Vec<f32> = (0..cutoff)
        .map(|ssd| (-(ssd as f64 / template_area) / h2).exp() as f32)
        .collect();

    // Distances are needed for templates centred on every pixel: a region of
    // (width + 2t) x (height + 2t) samples, offset by `s` inside `padded`.
    let rw = width + 2 * t;
    let rh = height + 2 * t;
    let iw = rw + 1;
    let mut integral = vec![0u64; iw * (rh + 1)];

    let mut numerator = vec![0f32; width * height];
    let mut denominator = vec![0f32; width * height];
    let side = 2 * t + 1;

    for dy in -(s as isize)..=(s as isize) {
        for dx in -(s as isize)..=(s as isize) {
            for v in 0..rh {
                let mut row_sum = 0u64;
                let a_row = (v + s) * pw + s;
                let b_row = ((v + s) as isize + dy) as usize * pw;
                for u in 0..rw {
                    let a = padded[a_row + u];
                    let b = padded[b_row + ((u + s) as isize + dx) as usize];
                    let d = a - b;
                    row_sum += (d * d) as u64;
                    integral[(v + 1) * iw + u + 1] = integral[v * iw + u + 1] + row_sum;
                }
            }

            for y in 0..height {
                let neighbour_row = ((y + pad) as isize + dy) as usize * pw;
                for x in 0..width {
                    let ssd = integral[(y + side) * iw + x + side] + integral[y * iw + x]
                        - integral[y * iw + x + side]
                        - integral[(y + side) * iw + x];
                    let weight = match weights.get(ssd as usize) {
                        Some(&w) => w,
                        None => continue,
                    };
                    let value = padded[neighbour_row + ((x + pad) as isize + dx) as usize];
                    numerator[y * width + x] += weight * value as f32;
                    denominator[y * width + x] += weight;
                }
            }
        }
    }

    numerator
        .iter()
        .zip(&denominator)
        .zip(plane)
        .map(|((&num, &den), &orig)| {
            if den > 0.0 {
                (num / den).round().clamp(0.0, 255.0) as u8
            } else {
                orig
            }
        })
        .collect()
}
