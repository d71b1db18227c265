//! Detect-and-correct pass for common photo problems.
//!
//! Five checks run in a fixed order, each measuring the image as left by the
//! previous one. The pass is advisory: a check that fails is logged and
//! skipped, so it never aborts a run.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::buffer::to_gray;
use super::clahe::equalize_lightness;
use super::color::scale_saturation;
use super::filters::filter_rgb3x3;
use super::operators::linear_transform;
use super::{ensure_not_empty, StageError};
use crate::pipeline::analysis::statistics::{laplacian_variance, mean_and_std, mean_saturation};
use crate::pipeline_config::{ClaheConfig, CorrectionConfig};

const SHARPEN_KERNEL: [[f32; 3]; 3] = [[-1.0, -1.0, -1.0], [-1.0, 9.0, -1.0], [-1.0, -1.0, -1.0]];

/// A correction the pass can apply, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    LowBrightness,
    Overexposure,
    Contrast,
    Sharpness,
    Saturation,
}

impl Correction {
    pub const ALL: [Correction; 5] = [
        Correction::LowBrightness,
        Correction::Overexposure,
        Correction::Contrast,
        Correction::Sharpness,
        Correction::Saturation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::LowBrightness => "Low brightness correction",
            Self::Overexposure => "Overexposure correction",
            Self::Contrast => "Contrast enhancement",
            Self::Sharpness => "Sharpness enhancement",
            Self::Saturation => "Saturation enhancement",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub image: RgbImage,
    pub applied: Vec<Correction>,
}

impl CorrectionOutcome {
    pub fn labels(&self) -> Vec<String> {
        self.applied.iter().map(|c| c.label().to_string()).collect()
    }
}

/// Run every check with default thresholds.
pub fn detect_and_correct(img: &RgbImage) -> CorrectionOutcome {
    detect_and_correct_with(img, &CorrectionConfig::default())
}

pub fn detect_and_correct_with(img: &RgbImage, config: &CorrectionConfig) -> CorrectionOutcome {
    let mut current = img.clone();
    let mut applied = Vec::new();

    for correction in Correction::ALL {
        match check(correction, &current, config) {
            Ok(Some(corrected)) => {
                debug!(correction = correction.label(), "Applied auto-correction");
                current = corrected;
                applied.push(correction);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(correction = correction.label(), error = %e, "Auto-correction check failed, skipping");
            }
        }
    }

    CorrectionOutcome {
        image: current,
        applied,
    }
}

/// Measure one condition and return the corrected image if it triggers.
fn check(
    correction: Correction,
    img: &RgbImage,
    config: &CorrectionConfig,
) -> Result<Option<RgbImage>, StageError> {
    ensure_not_empty(img)?;
    let corrected = match correction {
        Correction::LowBrightness => {
            let (brightness, _) = mean_and_std(img.as_raw());
            (brightness < config.min_brightness).then(|| linear_transform(img, 1.3, 30.0))
        }
        Correction::Overexposure => {
            let (brightness, _) = mean_and_std(img.as_raw());
            (brightness > config.max_brightness).then(|| linear_transform(img, 0.8, -20.0))
        }
        Correction::Contrast => {
            let (_, std) = mean_and_std(img.as_raw());
            if std < config.min_contrast {
                Some(equalize_lightness(
                    img,
                    &ClaheConfig::with_clip(config.contrast_clip_limit),
                )?)
            } else {
                None
            }
        }
        Correction::Sharpness => {
            let sharpness = laplacian_variance(&to_gray(img));
            (sharpness < config.min_sharpness).then(|| filter_rgb3x3(img, &SHARPEN_KERNEL))
        }
        Correction::Saturation => {
            let saturation = mean_saturation(img);
            (saturation < config.min_saturation)
                .then(|| scale_saturation(img, config.saturation_gain))
        }
    };
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::test_support::*;
    use image::Rgb;

    /// Saturated, sharp, mid-brightness image that should pass every check.
    fn healthy_image() -> RgbImage {
        RgbImage::from_fn(48, 48, |x, y| {
            if ((x / 2) + (y / 2)) % 2 == 0 {
                Rgb([230, 40, 40])
            } else {
                Rgb([30, 60, 200])
            }
        })
    }

    #[test]
    fn dark_image_gets_brightness_correction() {
        let img = noisy(48, 48, [40, 40, 40], 5, 4);
        let outcome = detect_and_correct(&img);
        assert_eq!(outcome.applied.first(), Some(&Correction::LowBrightness));
        assert!(outcome.labels()[0].contains("brightness"));
        assert!(all_mean(&outcome.image) > all_mean(&img));
    }

    #[test]
    fn overexposed_image_is_darkened() {
        let img = noisy(32, 32, [235, 235, 235], 5, 8);
        let outcome = detect_and_correct(&img);
        assert!(outcome.applied.contains(&Correction::Overexposure));
        assert!(!outcome.applied.contains(&Correction::LowBrightness));
    }

    #[test]
    fn healthy_image_is_left_alone() {
        let img = healthy_image();
        let outcome = detect_and_correct(&img);
        assert!(outcome.applied.is_empty(), "{:?}", outcome.applied);
        assert_eq!(outcome.image, img);
    }

    #[test]
    fn gray_image_gets_saturation_check() {
        let outcome = detect_and_correct(&checkerboard(32, 32, 2));
        assert!(outcome.applied.contains(&Correction::Saturation));
    }

    #[test]
    fn flat_image_triggers_contrast_and_sharpness() {
        let outcome = detect_and_correct(&solid(32, 32, [128, 100, 90]));
        assert!(outcome.applied.contains(&Correction::Contrast));
        assert!(outcome.applied.contains(&Correction::Sharpness));
    }

    #[test]
    fn corrections_keep_check_order() {
        let outcome = detect_and_correct(&solid(32, 32, [30, 30, 30]));
        let positions: Vec<usize> = outcome
            .applied
            .iter()
            .map(|c| Correction::ALL.iter().position(|a| a == c).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn empty_image_skips_every_check() {
        let outcome = detect_and_correct(&RgbImage::new(0, 0));
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.image.dimensions(), (0, 0));
    }

    #[test]
    fn thresholds_come_from_config() {
        let img = noisy(32, 32, [100, 100, 100], 5, 6);
        let config = CorrectionConfig {
            min_brightness: 120.0,
            ..CorrectionConfig::default()
        };
        let outcome = detect_and_correct_with(&img, &config);
        assert_eq!(outcome.applied.first(), Some(&Correction::LowBrightness));
    }
}
