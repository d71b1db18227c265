//! Spatial filters shared by the stage operators.
//!
//! All neighbourhood operations use reflect-101 borders (`dcb|abcd|cba`), so
//! a constant image stays constant under every smoothing kernel here.
//!
//! Pure Rust, no `imageproc` dependency. `image::imageops::blur` is not used:
//! it picks its own kernel length from sigma, replicates edge pixels and
//! rounds to 8 bits after each pass. The stages need explicit kernel sizes
//! (`round(6 * sigma + 1) | 1` by default), reflect-101 borders and float
//! planes they can blend before saturating.

use image::{GrayImage, RgbImage};

use crate::pipeline_config::BilateralConfig;

/// Single-channel float plane, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    /// Extract channel `c` (0..3) of an RGB image.
    pub fn from_channel(img: &RgbImage, c: usize) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().skip(c).step_by(3).map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Value with reflect-101 border handling.
    #[inline]
    pub fn at_reflect(&self, x: isize, y: isize) -> f32 {
        self.at(reflect101(x, self.width), reflect101(y, self.height))
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.data
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / self.data.len() as f64
    }

    /// Round and saturate to 8 bits.
    pub fn to_gray(&self) -> GrayImage {
        let data: Vec<u8> = self.data.iter().map(|&v| saturate_u8(v)).collect();
        GrayImage::from_raw(self.width as u32, self.height as u32, data)
            .unwrap_or_else(|| GrayImage::new(self.width as u32, self.height as u32))
    }
}

#[inline]
pub fn saturate_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Reflect-101 index into `0..n` (`n >= 1`).
#[inline]
pub fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
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

pub fn split_channels(img: &RgbImage) -> [Plane; 3] {
    [
        Plane::from_channel(img, 0),
        Plane::from_channel(img, 1),
        Plane::from_channel(img, 2),
    ]
}

/// Interleave three planes back into RGB, rounding and saturating.
pub fn merge_channels(planes: &[Plane; 3]) -> RgbImage {
    let (w, h) = (planes[0].width, planes[0].height);
    let mut out = RgbImage::new(w as u32, h as u32);
    for (i, px) in out.pixels_mut().enumerate() {
        px.0 = [
            saturate_u8(planes[0].data[i]),
            saturate_u8(planes[1].data[i]),
            saturate_u8(planes[2].data[i]),
        ];
    }
    out
}

/// Apply `f` to each channel plane independently.
pub fn map_channels(img: &RgbImage, f: impl Fn(&Plane) -> Plane) -> RgbImage {
    let [r, g, b] = split_channels(img);
    merge_channels(&[f(&r), f(&g), f(&b)])
}

// ═══════════════════════════════════════════════════════════
// Convolution
// ═══════════════════════════════════════════════════════════

/// 3x3 correlation with reflect-101 borders.
pub fn convolve3x3(plane: &Plane, kernel: &[[f32; 3]; 3]) -> Plane {
    let (w, h) = (plane.width, plane.height);
    let mut out = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (ky, row) in kernel.iter().enumerate() {
                for (kx, &k) in row.iter().enumerate() {
                    if k != 0.0 {
                        acc += k * plane.at_reflect(
                            x as isize + kx as isize - 1,
                            y as isize + ky as isize - 1,
                        );
                    }
                }
            }
            out.data[y * w + x] = acc;
        }
    }
    out
}

/// Apply a 3x3 kernel to every channel of an RGB image, saturating to 8 bits.
pub fn filter_rgb3x3(img: &RgbImage, kernel: &[[f32; 3]; 3]) -> RgbImage {
    map_channels(img, |p| convolve3x3(p, kernel))
}

/// Separable pass with a symmetric 1-D kernel along x, then y.
pub fn separable(plane: &Plane, kernel: &[f32]) -> Plane {
    let (w, h) = (plane.width, plane.height);
    let r = (kernel.len() / 2) as isize;

    let mut tmp = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let sx = reflect101(x as isize + k as isize - r, w);
                acc += kv * plane.data[y * w + sx];
            }
            tmp.data[y * w + x] = acc;
        }
    }

    let mut out = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let sy = reflect101(y as isize + k as isize - r, h);
                acc += kv * tmp.data[sy * w + x];
            }
            out.data[y * w + x] = acc;
        }
    }
    out
}

/// Kernel size derived from sigma for 8-bit data: `round(sigma * 6 + 1) | 1`.
pub fn gaussian_kernel_size(sigma: f32) -> usize {
    (((sigma * 6.0 + 1.0).round() as usize) | 1).max(1)
}

/// Normalized 1-D Gaussian kernel of odd length `ksize`.
pub fn gaussian_kernel(sigma: f32, ksize: usize) -> Vec<f32> {
    let r = (ksize / 2) as isize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut k: Vec<f32> = (-r..=r)
        .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
        .collect();
    let sum: f32 = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Gaussian blur; `ksize = None` derives the size from sigma with
/// [`gaussian_kernel_size`]. Output stays in float.
pub fn gaussian_blur(plane: &Plane, sigma: f32, ksize: Option<usize>) -> Plane {
    let ksize = ksize.unwrap_or_else(|| gaussian_kernel_size(sigma));
    separable(plane, &gaussian_kernel(sigma, ksize))
}

pub fn gaussian_blur_rgb(img: &RgbImage, sigma: f32, ksize: Option<usize>) -> [Plane; 3] {
    let [r, g, b] = split_channels(img);
    [
        gaussian_blur(&r, sigma, ksize),
        gaussian_blur(&g, sigma, ksize),
        gaussian_blur(&b, sigma, ksize),
    ]
}

/// Normalized 3x3 box filter.
pub fn box_blur3(plane: &Plane) -> Plane {
    separable(plane, &[1.0 / 3.0; 3])
}

pub const LAPLACIAN_KERNEL: [[f32; 3]; 3] = [[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]];

pub fn laplacian(plane: &Plane) -> Plane {
    convolve3x3(plane, &LAPLACIAN_KERNEL)
}

/// Sobel gradient magnitude `sqrt(gx^2 + gy^2)` (unclipped).
pub fn sobel_magnitude(plane: &Plane) -> Plane {
    const GX: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
    const GY: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];
    let gx = convolve3x3(plane, &GX);
    let gy = convolve3x3(plane, &GY);
    Plane {
        width: plane.width,
        height: plane.height,
        data: gx
            .data
            .iter()
            .zip(&gy.data)
            .map(|(&x, &y)| (x * x + y * y).sqrt())
            .collect(),
    }
}

/// Median filter over a `ksize x ksize` window (odd), reflect-101 borders.
pub fn median_filter(plane: &Plane, ksize: usize) -> Plane {
    let (w, h) = (plane.width, plane.height);
    let r = (ksize / 2) as isize;
    let mut out = Plane::new(w, h);
    let mut window = Vec::with_capacity(ksize * ksize);
    for y in 0..h {
        for x in 0..w {
            window.clear();
            for dy in -r..=r {
                for dx in -r..=r {
                    window.push(plane.at_reflect(x as isize + dx, y as isize + dy));
                }
            }
            let mid = window.len() / 2;
            window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            out.data[y * w + x] = window[mid];
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Blending
// ═══════════════════════════════════════════════════════════

/// `a * wa + b * wb + gamma`, rounded and saturated per sample.
pub fn blend(a: &RgbImage, wa: f32, b: &RgbImage, wb: f32, gamma: f32) -> RgbImage {
    let mut out = RgbImage::new(a.width(), a.height());
    for ((dst, &x), &y) in out.iter_mut().zip(a.as_raw()).zip(b.as_raw()) {
        *dst = saturate_u8(x as f32 * wa + y as f32 * wb + gamma);
    }
    out
}

/// Blend an image with per-channel float planes of the same size.
pub fn blend_planes(a: &RgbImage, wa: f32, planes: &[Plane; 3], wb: f32) -> RgbImage {
    let mut out = RgbImage::new(a.width(), a.height());
    for (i, (dst, src)) in out.pixels_mut().zip(a.pixels()).enumerate() {
        for c in 0..3 {
            dst.0[c] = saturate_u8(src.0[c] as f32 * wa + planes[c].data[i] * wb);
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Bilateral
// ═══════════════════════════════════════════════════════════

/// Bilateral filter: Gaussian spatial weight times Gaussian color-distance
/// weight over a square window of `diameter` pixels. Window pixels outside the
/// image are skipped.
pub fn bilateral_filter(img: &RgbImage, config: &BilateralConfig) -> RgbImage {
    let (w, h) = (img.width(), img.height());
    let radius = (config.diameter / 2).max(1);
    let color_coeff = -0.5 / (config.sigma_color * config.sigma_color);
    let space_coeff = -0.5 / (config.sigma_space * config.sigma_space);

    let side = (2 * radius + 1) as usize;
    let mut space_weights = vec![0f32; side * side];
    for dy in 0..side {
        for dx in 0..side {
            let ry = dy as f32 - radius as f32;
            let rx = dx as f32 - radius as f32;
            let d2 = rx * rx + ry * ry;
            // Circular window, as the classic formulation uses.
            space_weights[dy * side + dx] = if d2 > (radius * radius) as f32 {
                0.0
            } else {
                (d2 * space_coeff).exp()
            };
        }
    }

    let mut output = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let center = img.get_pixel(x, y).0;
            let (cr, cg, cb) = (center[0] as f32, center[1] as f32, center[2] as f32);

            let mut sum = [0.0f32; 3];
            let mut weight_sum = 0.0f32;

            let y_start = y.saturating_sub(radius);
            let y_end = (y + radius + 1).min(h);
            let x_start = x.saturating_sub(radius);
            let x_end = (x + radius + 1).min(w);

            for ny in y_start..y_end {
                for nx in x_start..x_end {
                    let sw = space_weights[(ny + radius - y) as usize * side
                        + (nx + radius - x) as usize];
                    if sw == 0.0 {
                        continue;
                    }
                    let n = img.get_pixel(nx, ny).0;
                    let (nr, ng, nb) = (n[0] as f32, n[1] as f32, n[2] as f32);
                    let color_dist_sq =
                        (nr - cr).powi(2) + (ng - cg).powi(2) + (nb - cb).powi(2);
                    let weight = sw * (color_dist_sq * color_coeff).exp();

                    sum[0] += nr * weight;
                    sum[1] += ng * weight;
                    sum[2] += nb * weight;
                    weight_sum += weight;
                }
            }

            let px = if weight_sum > 0.0 {
                [
                    saturate_u8(sum[0] / weight_sum),
                    saturate_u8(sum[1] / weight_sum),
                    saturate_u8(sum[2] / weight_sum),
                ]
            } else {
                center
            };
            output.put_pixel(x, y, image::Rgb(px));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::test_support::*;
    use image::Rgb;

    #[test]
    fn reflect101_mirrors_without_repeating_edge() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-3, 1), 0);
        assert_eq!(reflect101(-1, 2), 1);
    }

    #[test]
    fn from_channel_extracts_interleaved_samples() {
        let img = solid(3, 2, [1, 2, 3]);
        assert!(Plane::from_channel(&img, 1).data.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn split_merge_is_lossless() {
        let img = gradient(17, 9);
        assert_eq!(merge_channels(&split_channels(&img)), img);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(2.0, gaussian_kernel_size(2.0));
        assert_eq!(k.len(), 13);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[12]).abs() < 1e-7);
        assert!(k[6] > k[5]);
    }

    #[test]
    fn gaussian_preserves_constant_plane() {
        let plane = Plane::from_channel(&solid(9, 6, [100, 100, 100]), 0);
        let out = gaussian_blur(&plane, 2.0, None);
        assert!(out.data.iter().all(|&v| (v - 100.0).abs() < 1e-3));
    }

    #[test]
    fn laplacian_and_sobel_vanish_on_flat_image() {
        let plane = Plane::from_channel(&solid(8, 8, [42, 42, 42]), 0);
        assert!(laplacian(&plane).data.iter().all(|&v| v == 0.0));
        assert!(sobel_magnitude(&plane).data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn sobel_detects_vertical_step() {
        let img = RgbImage::from_fn(8, 8, |x, _| if x < 4 { Rgb([0; 3]) } else { Rgb([200; 3]) });
        let mag = sobel_magnitude(&Plane::from_channel(&img, 0));
        assert_eq!(mag.at(0, 4), 0.0);
        assert_eq!(mag.at(4, 4), 800.0);
    }

    #[test]
    fn box_blur_averages_neighbourhood() {
        let mut img = solid(5, 5, [0, 0, 0]);
        img.put_pixel(2, 2, Rgb([90, 90, 90]));
        let out = box_blur3(&Plane::from_channel(&img, 0));
        assert!((out.at(2, 2) - 10.0).abs() < 1e-4);
        assert!((out.at(1, 1) - 10.0).abs() < 1e-4);
        assert_eq!(out.at(4, 4), 0.0);
    }

    #[test]
    fn median_removes_salt_noise() {
        let mut img = solid(7, 7, [50, 50, 50]);
        img.put_pixel(3, 3, Rgb([255, 255, 255]));
        let out = median_filter(&Plane::from_channel(&img, 0), 3);
        assert_eq!(out.at(3, 3), 50.0);
    }

    #[test]
    fn blend_saturates() {
        let a = solid(2, 2, [200, 200, 200]);
        let b = solid(2, 2, [200, 200, 200]);
        assert_eq!(blend(&a, 1.0, &b, 1.0, 0.0).get_pixel(0, 0).0, [255; 3]);
        assert_eq!(blend(&a, 0.5, &b, 0.5, 0.0).get_pixel(0, 0).0, [200; 3]);
    }

    // ── bilateral ──

    #[test]
    fn bilateral_preserves_solid_color() {
        let img = solid(12, 12, [128, 64, 32]);
        let out = bilateral_filter(&img, &BilateralConfig::default());
        assert_eq!(out, img);
    }

    #[test]
    fn bilateral_preserves_strong_edges() {
        let img = RgbImage::from_fn(20, 20, |x, _| {
            if x < 10 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let cfg = BilateralConfig {
            diameter: 5,
            sigma_color: 25.0,
            sigma_space: 5.0,
        };
        let out = bilateral_filter(&img, &cfg);
        assert!(out.get_pixel(8, 10).0[0] < 10, "dark side stays dark");
        assert!(out.get_pixel(11, 10).0[0] > 245, "bright side stays bright");
    }

    #[test]
    fn bilateral_reduces_noise() {
        let img = noisy(24, 24, [128, 128, 128], 12, 7);
        let out = bilateral_filter(&img, &BilateralConfig::default());
        assert!(all_std(&out) < all_std(&img));
    }
}
