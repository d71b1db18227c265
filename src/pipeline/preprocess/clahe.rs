//! Contrast-limited adaptive histogram equalization.
//!
//! The image is split into a grid of tiles; each tile gets a clipped,
//! redistributed histogram and its own lookup table. Pixels are mapped through
//! a bilinear blend of the four nearest tile tables, which removes tile seams.

use image::RgbImage;
use tracing::debug;

use super::color::{lab_to_rgb, rgb_to_lab};
use super::{ensure_not_empty, StageError};
use crate::pipeline_config::ClaheConfig;

const BINS: usize = 256;

/// Equalize an 8-bit plane of `width x height` samples.
///
/// `clip_limit` is relative to the uniform bin height (`area / 256`); 0
/// disables clipping. The grid is shrunk for images smaller than it.
pub fn equalize(
    plane: &[u8],
    width: usize,
    height: usize,
    config: &ClaheConfig,
) -> Result<Vec<u8>, StageError> {
    if width == 0 || height == 0 || plane.len() != width * height {
        return Err(StageError::EmptyImage {
            width: width as u32,
            height: height as u32,
        });
    }
    if config.tiles_x == 0 || config.tiles_y == 0 {
        return Err(StageError::InvalidParameter {
            name: "tiles",
            reason: format!("tile grid must be positive, got {}x{}", config.tiles_x, config.tiles_y),
        });
    }

    let cols = tile_bounds(width, config.tiles_x as usize);
    let rows = tile_bounds(height, config.tiles_y as usize);
    let (grid_x, grid_y) = (cols.len(), rows.len());
    let tile_w = width as f32 / grid_x as f32;
    let tile_h = height as f32 / grid_y as f32;

    let mut luts = vec![[0u8; BINS]; grid_x * grid_y];
    for (ty, &(y0, y1)) in rows.iter().enumerate() {
        for (tx, &(x0, x1)) in cols.iter().enumerate() {
            luts[ty * grid_x + tx] = tile_lut(plane, width, x0, y0, x1, y1, config.clip_limit);
        }
    }

    let mut out = vec![0u8; plane.len()];
    for y in 0..height {
        let fy = (y as f32 + 0.5) / tile_h - 0.5;
        let (ty1, ty2, wy) = neighbours(fy, grid_y);
        for x in 0..width {
            let fx = (x as f32 + 0.5) / tile_w - 0.5;
            let (tx1, tx2, wx) = neighbours(fx, grid_x);
            let v = plane[y * width + x] as usize;

            let top = (1.0 - wx) * luts[ty1 * grid_x + tx1][v] as f32
                + wx * luts[ty1 * grid_x + tx2][v] as f32;
            let bottom = (1.0 - wx) * luts[ty2 * grid_x + tx1][v] as f32
                + wx * luts[ty2 * grid_x + tx2][v] as f32;
            out[y * width + x] = ((1.0 - wy) * top + wy * bottom).round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(out)
}

/// Split `len` samples into `tiles` contiguous, non-empty ranges whose sizes
/// differ by at most one. The tile count is capped at `len`.
fn tile_bounds(len: usize, tiles: usize) -> Vec<(usize, usize)> {
    let tiles = tiles.min(len);
    (0..tiles)
        .map(|i| (i * len / tiles, (i + 1) * len / tiles))
        .collect()
}

/// Tile indices around a fractional tile coordinate plus the weight of the
/// second one. Coordinates outside the grid clamp to the border tiles.
fn neighbours(f: f32, grid: usize) -> (usize, usize, f32) {
    let first = f.floor();
    let weight = f - first;
    let last = grid as isize - 1;
    let t1 = (first as isize).clamp(0, last) as usize;
    let t2 = (first as isize + 1).clamp(0, last) as usize;
    (t1, t2, weight)
}

fn tile_lut(
    plane: &[u8],
    stride: usize,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
    clip_limit: f32,
) -> [u8; BINS] {
    let mut hist = [0u32; BINS];
    for y in y0..y1 {
        for &v in &plane[y * stride + x0..y * stride + x1] {
            hist[v as usize] += 1;
        }
    }
    let area = ((x1 - x0) * (y1 - y0)) as u32;

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);
        let mut excess = 0u32;
        for h in hist.iter_mut() {
            if *h > limit {
                excess += *h - limit;
                *h = limit;
            }
        }

        let per_bin = excess / BINS as u32;
        let mut residual = excess - per_bin * BINS as u32;
        for h in hist.iter_mut() {
            *h += per_bin;
        }
        if residual > 0 {
            let step = (BINS as u32 / residual).max(1) as usize;
            let mut i = 0;
            while residual > 0 && i < BINS {
                hist[i] += 1;
                residual -= 1;
                i += step;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; BINS];
    let mut cumulative = 0u32;
    for (i, &h) in hist.iter().enumerate() {
        cumulative += h;
        lut[i] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// CLAHE on the lightness channel of L*a*b*; chroma is left untouched.
pub fn equalize_lightness(img: &RgbImage, config: &ClaheConfig) -> Result<RgbImage, StageError> {
    ensure_not_empty(img)?;
    let mut lab = rgb_to_lab(img);
    let lightness = lab.lightness_u8();
    let equalized = equalize(
        &lightness,
        img.width() as usize,
        img.height() as usize,
        config,
    )?;
    lab.set_lightness_u8(&equalized);

    debug!(
        clip_limit = config.clip_limit,
        tiles = format!("{}x{}", config.tiles_x, config.tiles_y),
        "Applied CLAHE to lightness"
    );
    Ok(lab_to_rgb(&lab))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::test_support::*;

    fn spread(values: &[u8]) -> u8 {
        values.iter().max().unwrap() - values.iter().min().unwrap()
    }

    #[test]
    fn low_contrast_ramp_is_stretched() {
        let (w, h) = (64, 64);
        let plane: Vec<u8> = (0..w * h).map(|i| 100 + ((i % w) * 20 / w) as u8).collect();
        let out = equalize(&plane, w, h, &ClaheConfig::default()).unwrap();
        assert!(spread(&out) > spread(&plane), "{} vs {}", spread(&out), spread(&plane));
    }

    #[test]
    fn mapping_is_monotonic_within_a_tile() {
        let (w, h) = (16, 16);
        let plane: Vec<u8> = (0..w * h).map(|i| (i % 256) as u8).collect();
        let cfg = ClaheConfig {
            clip_limit: 0.0,
            tiles_x: 1,
            tiles_y: 1,
        };
        let out = equalize(&plane, w, h, &cfg).unwrap();
        for i in 1..out.len() {
            if plane[i] > plane[i - 1] {
                assert!(out[i] >= out[i - 1]);
            }
        }
        // Unclipped single tile on a uniform histogram is close to identity.
        assert!(out.iter().zip(&plane).all(|(&a, &b)| (a as i16 - b as i16).abs() <= 1));
    }

    #[test]
    fn requested_grid_is_kept_when_sizes_do_not_divide() {
        let bounds = tile_bounds(9, 8);
        assert_eq!(bounds.len(), 8);
        assert!(bounds.iter().all(|&(a, b)| b > a));
        assert_eq!(bounds.first().map(|b| b.0), Some(0));
        assert_eq!(bounds.last().map(|b| b.1), Some(9));
        assert!(bounds.windows(2).all(|w| w[0].1 == w[1].0));

        let bounds = tile_bounds(100, 8);
        assert_eq!(bounds.len(), 8);
        assert!(bounds.iter().all(|&(a, b)| (12..=13).contains(&(b - a))));
    }

    #[test]
    fn grid_is_capped_by_image_size() {
        assert_eq!(tile_bounds(3, 8).len(), 3);
        assert_eq!(tile_bounds(1, 8), vec![(0, 1)]);
    }

    #[test]
    fn odd_width_plane_is_equalized() {
        let (w, h) = (9, 9);
        let plane: Vec<u8> = (0..w * h).map(|i| (i * 3 % 256) as u8).collect();
        let out = equalize(&plane, w, h, &ClaheConfig::default()).unwrap();
        assert_eq!(out.len(), w * h);
    }

    #[test]
    fn tiny_image_shrinks_the_grid() {
        let plane = vec![10u8, 200, 30, 90, 120, 60];
        let out = equalize(&plane, 3, 2, &ClaheConfig::default()).unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn empty_plane_is_rejected() {
        assert!(matches!(
            equalize(&[], 0, 0, &ClaheConfig::default()),
            Err(StageError::EmptyImage { .. })
        ));
    }

    #[test]
    fn lightness_clahe_keeps_gray_neutral() {
        let img = gradient(32, 32);
        let gray: RgbImage = RgbImage::from_fn(32, 32, |x, _| {
            let v = 90 + (x as u8);
            image::Rgb([v, v, v])
        });
        let out = equalize_lightness(&gray, &ClaheConfig::default()).unwrap();
        for p in out.pixels() {
            let [r, g, b] = p.0;
            assert!((r as i16 - g as i16).abs() <= 1 && (g as i16 - b as i16).abs() <= 1);
        }
        assert_eq!(equalize_lightness(&img, &ClaheConfig::default()).unwrap().dimensions(), (32, 32));
    }

    #[test]
    fn flat_image_stays_close_to_its_level() {
        let img = solid(256, 256, [128, 128, 128]);
        let out = equalize_lightness(&img, &ClaheConfig::default()).unwrap();
        let mean = all_mean(&out);
        assert!((mean - 128.0).abs() < 5.0, "mean {mean}");
    }

    #[test]
    fn empty_rgb_is_rejected() {
        assert!(equalize_lightness(&RgbImage::new(0, 3), &ClaheConfig::default()).is_err());
    }
}
