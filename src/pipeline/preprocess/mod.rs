//! Stage operators: pure image-to-image transforms of the preprocessing pipeline.
//!
//! **Layout**: `buffer` owns decoding and geometry, `color`/`filters` hold the
//! shared pixel math, and the heavier algorithms (`clahe`, `denoise`,
//! `edge_preserve`) live in their own modules. `operators` exposes one function
//! per pipeline stage on top of them.
//!
//! All operators take `&RgbImage` and return a fresh image; inputs are never
//! mutated. Arithmetic saturates to 0-255.

pub mod buffer;
pub mod clahe;
pub mod color;
pub mod correction;
pub mod custom;
pub mod denoise;
pub mod edge_preserve;
pub mod filters;
pub mod operators;

use image::RgbImage;
use thiserror::Error;

/// Failure of a single operator on a given image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Reject zero-area images before any pixel loop runs.
pub fn ensure_not_empty(img: &RgbImage) -> Result<(), StageError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(StageError::EmptyImage { width, height });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_is_rejected() {
        let err = ensure_not_empty(&RgbImage::new(0, 5)).unwrap_err();
        assert_eq!(err, StageError::EmptyImage { width: 0, height: 5 });
        assert!(err.to_string().contains("0x5"));
    }

    #[test]
    fn non_empty_image_passes() {
        assert!(ensure_not_empty(&RgbImage::new(1, 1)).is_ok());
    }
}
