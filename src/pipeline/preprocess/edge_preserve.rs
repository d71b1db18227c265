//! Edge-preserving smoothing with the domain-transform recursive filter
//! (Gastal & Oliveira, 2011).
//!
//! The image is flattened along each axis into a 1-D "domain" where distance
//! grows with color change, then filtered there with a first-order recursive
//! filter. Alternating horizontal and vertical passes with shrinking sigmas
//! converge to a 2-D result.

use image::RgbImage;
use tracing::debug;

use super::filters::{merge_channels, split_channels, Plane};
use super::{ensure_not_empty, StageError};
use crate::pipeline_config::EdgePreserveConfig;

pub fn recursive_filter(
    img: &RgbImage,
    config: &EdgePreserveConfig,
) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    if !(config.sigma_spatial > 0.0 && config.sigma_range > 0.0) || config.iterations == 0 {
        return Err(StageError::InvalidParameter {
            name: "edge_preserve",
            reason: format!(
                "sigmas must be positive and iterations >= 1, got s={} r={} n={}",
                config.sigma_spatial, config.sigma_range, config.iterations
            ),
        });
    }

    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut planes = split_channels(img);
    for plane in planes.iter_mut() {
        for v in plane.data.iter_mut() {
            *v /= 255.0;
        }
    }

    let ratio = config.sigma_spatial / config.sigma_range;
    let (dhdx, dvdy) = domain_derivatives(&planes, w, h, ratio);

    let n = config.iterations as i32;
    let sigma_s = config.sigma_spatial as f64;
    let denom = (4f64.powi(n) - 1.0).sqrt();
    for i in 0..n {
        let sigma_h = sigma_s * 3f64.sqrt() * 2f64.powi(n - (i + 1)) / denom;
        let a = (-(2f64.sqrt()) / sigma_h).exp() as f32;
        for plane in planes.iter_mut() {
            filter_rows(plane, &dhdx, a);
            filter_cols(plane, &dvdy, a);
        }
    }

    for plane in planes.iter_mut() {
        for v in plane.data.iter_mut() {
            *v *= 255.0;
        }
    }

    debug!(
        sigma_spatial = config.sigma_spatial,
        sigma_range = config.sigma_range,
        iterations = config.iterations,
        "Applied domain-transform recursive filter"
    );
    Ok(merge_channels(&planes))
}

/// Domain-transform derivatives `1 + (sigma_s / sigma_r) * sum_c |dI_c|`.
/// `dhdx[y][x]` is the step from x-1 to x; `dvdy[y][x]` from y-1 to y.
fn domain_derivatives(planes: &[Plane; 3], w: usize, h: usize, ratio: f32) -> (Vec<f32>, Vec<f32>) {
    let mut dhdx = vec![1.0f32; w * h];
    let mut dvdy = vec![1.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if x > 0 {
                let sum: f32 = planes.iter().map(|p| (p.data[i] - p.data[i - 1]).abs()).sum();
                dhdx[i] = 1.0 + ratio * sum;
            }
            if y > 0 {
                let sum: f32 = planes.iter().map(|p| (p.data[i] - p.data[i - w]).abs()).sum();
                dvdy[i] = 1.0 + ratio * sum;
            }
        }
    }
    (dhdx, dvdy)
}

fn filter_rows(plane: &mut Plane, dhdx: &[f32], a: f32) {
    let w = plane.width;
    for y in 0..plane.height {
        let row = &mut plane.data[y * w..(y + 1) * w];
        let d = &dhdx[y * w..(y + 1) * w];
        for x in 1..w {
            let v = a.powf(d[x]);
            row[x] += v * (row[x - 1] - row[x]);
        }
        for x in (0..w.saturating_sub(1)).rev() {
            let v = a.powf(d[x + 1]);
            row[x] += v * (row[x + 1] - row[x]);
        }
    }
}

fn filter_cols(plane: &mut Plane, dvdy: &[f32], a: f32) {
    let (w, h) = (plane.width, plane.height);
    for x in 0..w {
        for y in 1..h {
            let i = y * w + x;
            let v = a.powf(dvdy[i]);
            plane.data[i] += v * (plane.data[i - w] - plane.data[i]);
        }
        for y in (0..h.saturating_sub(1)).rev() {
            let i = y * w + x;
            let v = a.powf(dvdy[i + w]);
            plane.data[i] += v * (plane.data[i + w] - plane.data[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::test_support::*;
    use image::Rgb;

    #[test]
    fn flat_image_is_unchanged() {
        let img = solid(20, 15, [30, 160, 220]);
        let out = recursive_filter(&img, &EdgePreserveConfig::default()).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn smooths_small_variations() {
        let img = noisy(32, 32, [128, 128, 128], 6, 5);
        let out = recursive_filter(&img, &EdgePreserveConfig::default()).unwrap();
        assert!(all_std(&out) < all_std(&img));
    }

    #[test]
    fn keeps_strong_step_edges() {
        let img = RgbImage::from_fn(40, 10, |x, _| {
            if x < 20 {
                Rgb([10, 10, 10])
            } else {
                Rgb([240, 240, 240])
            }
        });
        let out = recursive_filter(&img, &EdgePreserveConfig::default()).unwrap();
        assert!(out.get_pixel(18, 5).0[0] < 30, "{:?}", out.get_pixel(18, 5));
        assert!(out.get_pixel(21, 5).0[0] > 220, "{:?}", out.get_pixel(21, 5));
    }

    #[test]
    fn single_row_image_is_supported() {
        let img = gradient(16, 1);
        let out = recursive_filter(&img, &EdgePreserveConfig::default()).unwrap();
        assert_eq!(out.dimensions(), (16, 1));
    }

    #[test]
    fn zero_iterations_rejected() {
        let cfg = EdgePreserveConfig {
            iterations: 0,
            ..EdgePreserveConfig::default()
        };
        assert!(recursive_filter(&solid(2, 2, [0; 3]), &cfg).is_err());
    }
}
