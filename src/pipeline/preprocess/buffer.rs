//! Image buffer layer: byte validation, decoding, orientation, luma, resize.
//!
//! Grounded on the upload path of phone photos:
//! - EXIF orientation must be applied before any geometry (phones store
//!   rotated sensor data plus a tag)
//! - Aspect ratio is preserved; the remainder of the canvas is padded
//! - Everything downstream works on 8-bit interleaved RGB

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Rgb, RgbImage};
use tracing::debug;

use super::StageError;
use crate::pipeline::types::{Snapshot, Stage};
use crate::pipeline::PipelineError;
use crate::pipeline_config::{ResizeConfig, ResizeQuality};

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum accepted upload size.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Smallest valid PNG is 67 bytes; anything shorter cannot be an image.
const MIN_IMAGE_BYTES: usize = 67;

// ═══════════════════════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════════════════════

/// Result of resize + pad.
#[derive(Debug)]
pub struct NormalizedImage {
    /// Padded canvas (exactly target_width x target_height).
    pub image: RgbImage,
    /// Source dimensions before resizing.
    pub original_width: u32,
    pub original_height: u32,
    /// Content area within the canvas.
    pub content_width: u32,
    pub content_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Canvas fill color (mean of the source border pixels).
    pub background: [u8; 3],
}

// ═══════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════

/// Validate image bytes before decoding.
/// Clearly invalid input fails here without touching a decoder.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PipelineError::Decode(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PipelineError::Decode(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Decode uploaded bytes into an upright 3-channel 8-bit snapshot.
///
/// Grayscale, alpha and 16-bit inputs are converted; alpha is dropped.
pub fn load(bytes: &[u8]) -> Result<Snapshot, PipelineError> {
    validate_image_bytes(bytes)?;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::Decode(format!("Unsupported or corrupt image: {e}")))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::Decode(format!(
            "Decoded image has no pixels ({width}x{height})"
        )));
    }

    let orientation = read_exif_orientation(bytes);
    let upright = apply_orientation(decoded, orientation);
    let rgb = upright.to_rgb8();

    debug!(
        width = rgb.width(),
        height = rgb.height(),
        orientation,
        bytes = bytes.len(),
        "Decoded upload"
    );

    Ok(Snapshot::rgb(Stage::Decode.key(), rgb))
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(e) => e,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation value (1-8) to a decoded image.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Luma
// ═══════════════════════════════════════════════════════════

/// BT.601 luma of one pixel, rounded to nearest.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .min(255.0) as u8
}

/// Convert RGB to single-channel luma.
pub fn to_gray(rgb: &RgbImage) -> GrayImage {
    let data: Vec<u8> = rgb
        .as_raw()
        .chunks_exact(3)
        .map(|p| luma(p[0], p[1], p[2]))
        .collect();
    // Buffer length is width * height by construction.
    GrayImage::from_raw(rgb.width(), rgb.height(), data)
        .unwrap_or_else(|| GrayImage::new(rgb.width(), rgb.height()))
}

// ═══════════════════════════════════════════════════════════
// Resize + pad
// ═══════════════════════════════════════════════════════════

/// Dimensions that fit inside `target_w x target_h` while preserving aspect
/// ratio. Small images are scaled up; neither side exceeds the target and
/// neither side collapses below 1 px.
pub fn compute_fit_dimensions(
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }

    let scale = (target_w as f64 / width as f64).min(target_h as f64 / height as f64);
    let new_w = ((width as f64 * scale).floor() as u32).clamp(1, target_w.max(1));
    let new_h = ((height as f64 * scale).floor() as u32).clamp(1, target_h.max(1));

    (new_w, new_h)
}

/// Mean color of the border pixels (top row, bottom row, left and right
/// columns, corners counted in every edge they belong to).
pub fn edge_mean_color(img: &RgbImage) -> [u8; 3] {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return [0, 0, 0];
    }

    let mut sum = [0u64; 3];
    let mut count = 0u64;
    let mut add = |x: u32, y: u32| {
        let p = img.get_pixel(x, y).0;
        for c in 0..3 {
            sum[c] += p[c] as u64;
        }
        count += 1;
    };

    for x in 0..w {
        add(x, 0);
        add(x, h - 1);
    }
    for y in 0..h {
        add(0, y);
        add(w - 1, y);
    }

    let mean = |c: usize| ((sum[c] as f64 / count as f64).round()).min(255.0) as u8;
    [mean(0), mean(1), mean(2)]
}

/// Aspect-preserving resize centered on an edge-colored canvas of exactly the
/// target size. Nothing is cropped.
pub fn resize_and_pad(
    img: &RgbImage,
    config: &ResizeConfig,
) -> Result<NormalizedImage, PipelineError> {
    let (target_w, target_h) = (config.target_width, config.target_height);
    if target_w == 0 || target_h == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "resize target must be positive, got {target_w}x{target_h}"
        )));
    }
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return Err(PipelineError::Stage {
            stage: Stage::Resize,
            source: StageError::EmptyImage {
                width: orig_w,
                height: orig_h,
            },
        });
    }

    let (content_w, content_h) = compute_fit_dimensions(orig_w, orig_h, target_w, target_h);
    let filter = match config.quality {
        ResizeQuality::High => FilterType::Lanczos3,
        ResizeQuality::Balanced => FilterType::CatmullRom,
        ResizeQuality::Fast => FilterType::Triangle,
    };
    let resized = if (content_w, content_h) == (orig_w, orig_h) {
        img.clone()
    } else {
        image::imageops::resize(img, content_w, content_h, filter)
    };

    let background = edge_mean_color(img);
    let mut canvas = RgbImage::from_pixel(target_w, target_h, Rgb(background));
    let offset_x = (target_w - content_w) / 2;
    let offset_y = (target_h - content_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x, offset_y);

    debug!(
        from = format!("{orig_w}x{orig_h}"),
        content = format!("{content_w}x{content_h}"),
        target = format!("{target_w}x{target_h}"),
        "Resized and padded"
    );

    Ok(NormalizedImage {
        image: canvas,
        original_width: orig_w,
        original_height: orig_h,
        content_width: content_w,
        content_height: content_h,
        offset_x,
        offset_y,
        background,
    })
}
