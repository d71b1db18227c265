//! Color space conversions used by the stage operators.
//!
//! L*a*b* values use the common 8-bit scaling: L in 0-255 (`L* * 255 / 100`),
//! a and b offset by 128, sRGB primaries with a D65 white point. Planes are
//! kept as `f32` so chroma survives round trips without quantization.

use std::sync::OnceLock;

use image::RgbImage;

// D65 reference white.
const WHITE_X: f32 = 0.950456;
const WHITE_Z: f32 = 1.088754;

const LAB_EPSILON: f32 = 0.008856;
const LAB_KAPPA: f32 = 903.3;

/// L*a*b* image as three planes in 8-bit scale.
#[derive(Debug, Clone, PartialEq)]
pub struct LabImage {
    pub width: u32,
    pub height: u32,
    pub l: Vec<f32>,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

fn srgb_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let c = i as f32 / 255.0;
            *v = if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            };
        }
        lut
    })
}

#[inline]
fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

#[inline]
fn lab_f_inv(f: f32) -> f32 {
    let t = f * f * f;
    if t > LAB_EPSILON {
        t
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// Convert one sRGB pixel to 8-bit-scaled L*a*b*.
pub fn rgb_to_lab_pixel(rgb: [u8; 3]) -> [f32; 3] {
    let lut = srgb_linear_lut();
    let (r, g, b) = (lut[rgb[0] as usize], lut[rgb[1] as usize], lut[rgb[2] as usize]);

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON {
        116.0 * fy - 16.0
    } else {
        LAB_KAPPA * y
    };

    [
        l * 255.0 / 100.0,
        500.0 * (fx - fy) + 128.0,
        200.0 * (fy - fz) + 128.0,
    ]
}

/// Convert one 8-bit-scaled L*a*b* pixel back to sRGB (saturating).
pub fn lab_to_rgb_pixel(lab: [f32; 3]) -> [u8; 3] {
    let l = lab[0] * 100.0 / 255.0;
    let a = lab[1] - 128.0;
    let b = lab[2] - 128.0;

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > LAB_KAPPA * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / LAB_KAPPA
    };
    let x = lab_f_inv(fx) * WHITE_X;
    let z = lab_f_inv(fz) * WHITE_Z;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_991 * y + 0.041_556 * z;
    let bl = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(bl)]
}

pub fn rgb_to_lab(img: &RgbImage) -> LabImage {
    let n = (img.width() * img.height()) as usize;
    let mut lab = LabImage {
        width: img.width(),
        height: img.height(),
        l: Vec::with_capacity(n),
        a: Vec::with_capacity(n),
        b: Vec::with_capacity(n),
    };
    for p in img.as_raw().chunks_exact(3) {
        let [l, a, b] = rgb_to_lab_pixel([p[0], p[1], p[2]]);
        lab.l.push(l);
        lab.a.push(a);
        lab.b.push(b);
    }
    lab
}

pub fn lab_to_rgb(lab: &LabImage) -> RgbImage {
    let mut out = RgbImage::new(lab.width, lab.height);
    for (i, px) in out.pixels_mut().enumerate() {
        px.0 = lab_to_rgb_pixel([lab.l[i], lab.a[i], lab.b[i]]);
    }
    out
}

impl LabImage {
    /// Lightness quantized to 8 bits, for histogram-based operators.
    pub fn lightness_u8(&self) -> Vec<u8> {
        self.l
            .iter()
            .map(|&v| v.round().clamp(0.0, 255.0) as u8)
            .collect()
    }

    pub fn set_lightness_u8(&mut self, values: &[u8]) {
        for (dst, &v) in self.l.iter_mut().zip(values) {
            *dst = v as f32;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// HSV
// ═══════════════════════════════════════════════════════════

/// HSV saturation on the 0-255 scale: `255 * (max - min) / max`, 0 for black.
#[inline]
pub fn saturation_u8(r: u8, g: u8, b: u8) -> u8 {
    let max = r.max(g).max(b);
    if max == 0 {
        return 0;
    }
    let min = r.min(g).min(b);
    (255.0 * (max - min) as f32 / max as f32).round() as u8
}

/// `(hue degrees 0-360, saturation 0-1, value 0-255)`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> (f32, f32, f32) {
    let (r, g, b) = (rgb[0] as f32, rgb[1] as f32, rgb[2] as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    (h, s, max)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let s = s.clamp(0.0, 1.0);
    if s == 0.0 {
        let g = v.round().clamp(0.0, 255.0) as u8;
        return [g, g, g];
    }
    let h = (h % 360.0) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as i32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let q8 = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    [q8(r), q8(g), q8(b)]
}

/// Multiply HSV saturation by `gain` (clamped to full saturation), keeping
/// hue and value.
pub fn scale_saturation(img: &RgbImage, gain: f32) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(px.0);
        px.0 = hsv_to_rgb(h, (s * gain).min(1.0), v);
    }
    out
}
