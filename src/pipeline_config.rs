//! Typed configuration for every stage of the preprocessing pipeline.
//!
//! Defaults reproduce the tuned values of the production sequence. A config is
//! validated once, when a `Pipeline` is built from it; stage operators trust
//! the values they receive afterwards.

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;

// ═══════════════════════════════════════════════════════════
// Per-stage configuration
// ═══════════════════════════════════════════════════════════

/// Resize filter quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeQuality {
    /// Lanczos3: sharpest, slowest.
    High,
    /// Catmull-Rom bicubic.
    Balanced,
    /// Bilinear.
    Fast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub target_width: u32,
    pub target_height: u32,
    pub quality: ResizeQuality,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            target_width: 512,
            target_height: 512,
            quality: ResizeQuality::High,
        }
    }
}

/// Adaptive gamma: brightness thresholds and the gamma chosen on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaConfig {
    pub dark_threshold: f64,
    pub bright_threshold: f64,
    pub dark_gamma: f32,
    pub bright_gamma: f32,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            dark_threshold: 85.0,
            bright_threshold: 170.0,
            dark_gamma: 1.3,
            bright_gamma: 0.8,
        }
    }
}

/// Contrast-limited adaptive histogram equalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheConfig {
    pub clip_limit: f32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl ClaheConfig {
    pub fn with_clip(clip_limit: f32) -> Self {
        Self {
            clip_limit,
            ..Self::default()
        }
    }
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

/// Bilateral filter parameters (`diameter` is the full window width).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BilateralConfig {
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BilateralConfig {
    fn default() -> Self {
        Self {
            diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

/// Non-local means denoising, optionally followed by a bilateral pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    pub strength: f32,
    pub template_window: u32,
    pub search_window: u32,
    pub bilateral_pass: Option<BilateralConfig>,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            strength: 10.0,
            template_window: 7,
            search_window: 21,
            bilateral_pass: None,
        }
    }
}

/// Domain-transform recursive filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgePreserveConfig {
    pub sigma_spatial: f32,
    pub sigma_range: f32,
    pub iterations: u32,
}

impl Default for EdgePreserveConfig {
    fn default() -> Self {
        Self {
            sigma_spatial: 50.0,
            sigma_range: 0.4,
            iterations: 3,
        }
    }
}

/// Sobel magnitude blending: `out = image_weight * img + edge_weight * edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeEnhanceConfig {
    pub image_weight: f32,
    pub edge_weight: f32,
}

impl Default for EdgeEnhanceConfig {
    fn default() -> Self {
        Self {
            image_weight: 0.9,
            edge_weight: 0.1,
        }
    }
}

/// Unsharp mask: `out = (1 + amount) * img - amount * gauss(img, sigma)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpenConfig {
    pub sigma: f32,
    pub amount: f32,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            amount: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationConfig {
    pub gain: f32,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self { gain: 1.15 }
    }
}

/// Gray-world white balance in L*a*b*.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteBalanceConfig {
    pub strength: f32,
}

impl Default for WhiteBalanceConfig {
    fn default() -> Self {
        Self { strength: 1.1 }
    }
}

/// High-pass texture kernel blended back into the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub image_weight: f32,
    pub texture_weight: f32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            image_weight: 0.75,
            texture_weight: 0.25,
        }
    }
}

/// Final light Gaussian smoothing blended with the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalOptimizeConfig {
    pub kernel_size: u32,
    pub sigma: f32,
    pub image_weight: f32,
    pub smoothed_weight: f32,
}

impl Default for FinalOptimizeConfig {
    fn default() -> Self {
        Self {
            kernel_size: 3,
            sigma: 0.5,
            image_weight: 0.8,
            smoothed_weight: 0.2,
        }
    }
}

/// Thresholds of the optional auto-correction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub min_brightness: f64,
    pub max_brightness: f64,
    pub min_contrast: f64,
    pub min_sharpness: f64,
    pub min_saturation: f64,
    pub contrast_clip_limit: f32,
    pub saturation_gain: f32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            min_brightness: 80.0,
            max_brightness: 200.0,
            min_contrast: 40.0,
            min_sharpness: 100.0,
            min_saturation: 60.0,
            contrast_clip_limit: 4.0,
            saturation_gain: 1.2,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Pipeline configuration
// ═══════════════════════════════════════════════════════════

/// Full pipeline configuration. Every field has a production default, so a
/// partial JSON document only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resize: ResizeConfig,
    pub gamma: GammaConfig,
    pub local_contrast: ClaheConfig,
    pub denoise: DenoiseConfig,
    pub edge_preserve: EdgePreserveConfig,
    pub edge_enhance: EdgeEnhanceConfig,
    pub sharpen: SharpenConfig,
    pub saturation: SaturationConfig,
    pub white_balance: WhiteBalanceConfig,
    pub texture: TextureConfig,
    pub final_contrast: ClaheConfig,
    pub final_optimize: FinalOptimizeConfig,
    /// Run the detect-and-correct pass on the decoded image before resizing.
    pub auto_correct: bool,
    pub correction: CorrectionConfig,
    /// Keep every stage snapshot in the run output (they are large).
    pub retain_stage_snapshots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resize: ResizeConfig::default(),
            gamma: GammaConfig::default(),
            local_contrast: ClaheConfig::default(),
            denoise: DenoiseConfig::default(),
            edge_preserve: EdgePreserveConfig::default(),
            edge_enhance: EdgeEnhanceConfig::default(),
            sharpen: SharpenConfig::default(),
            saturation: SaturationConfig::default(),
            white_balance: WhiteBalanceConfig::default(),
            texture: TextureConfig::default(),
            final_contrast: ClaheConfig::with_clip(1.5),
            final_optimize: FinalOptimizeConfig::default(),
            auto_correct: false,
            correction: CorrectionConfig::default(),
            retain_stage_snapshots: true,
        }
    }
}

impl PipelineConfig {
    /// Parse a (possibly partial) JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(format!("Malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter once. Returns the first violation found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let r = &self.resize;
        if r.target_width == 0 || r.target_height == 0 {
            return invalid(format!(
                "resize target must be positive, got {}x{}",
                r.target_width, r.target_height
            ));
        }

        let g = &self.gamma;
        ensure_finite_positive("gamma.dark_gamma", g.dark_gamma)?;
        ensure_finite_positive("gamma.bright_gamma", g.bright_gamma)?;
        if !(g.dark_threshold < g.bright_threshold) {
            return invalid(format!(
                "gamma.dark_threshold ({}) must be below gamma.bright_threshold ({})",
                g.dark_threshold, g.bright_threshold
            ));
        }

        validate_clahe("local_contrast", &self.local_contrast)?;
        validate_clahe("final_contrast", &self.final_contrast)?;

        let d = &self.denoise;
        ensure_finite_positive("denoise.strength", d.strength)?;
        ensure_odd_window("denoise.template_window", d.template_window)?;
        ensure_odd_window("denoise.search_window", d.search_window)?;
        if d.search_window < d.template_window {
            return invalid(format!(
                "denoise.search_window ({}) must not be smaller than template_window ({})",
                d.search_window, d.template_window
            ));
        }
        if let Some(b) = &d.bilateral_pass {
            if b.diameter == 0 {
                return invalid("denoise.bilateral_pass.diameter must be positive".into());
            }
            ensure_finite_positive("denoise.bilateral_pass.sigma_color", b.sigma_color)?;
            ensure_finite_positive("denoise.bilateral_pass.sigma_space", b.sigma_space)?;
        }

        let e = &self.edge_preserve;
        ensure_finite_positive("edge_preserve.sigma_spatial", e.sigma_spatial)?;
        ensure_finite_positive("edge_preserve.sigma_range", e.sigma_range)?;
        if e.iterations == 0 {
            return invalid("edge_preserve.iterations must be at least 1".into());
        }

        ensure_weight("edge_enhance.image_weight", self.edge_enhance.image_weight)?;
        ensure_weight("edge_enhance.edge_weight", self.edge_enhance.edge_weight)?;

        ensure_finite_positive("sharpen.sigma", self.sharpen.sigma)?;
        ensure_finite_non_negative("sharpen.amount", self.sharpen.amount)?;
        ensure_finite_non_negative("saturation.gain", self.saturation.gain)?;
        ensure_finite_non_negative("white_balance.strength", self.white_balance.strength)?;

        ensure_weight("texture.image_weight", self.texture.image_weight)?;
        ensure_weight("texture.texture_weight", self.texture.texture_weight)?;

        let f = &self.final_optimize;
        ensure_odd_window("final_optimize.kernel_size", f.kernel_size)?;
        ensure_finite_positive("final_optimize.sigma", f.sigma)?;
        ensure_weight("final_optimize.image_weight", f.image_weight)?;
        ensure_weight("final_optimize.smoothed_weight", f.smoothed_weight)?;

        let c = &self.correction;
        if !(c.min_brightness < c.max_brightness) {
            return invalid(format!(
                "correction.min_brightness ({}) must be below correction.max_brightness ({})",
                c.min_brightness, c.max_brightness
            ));
        }
        ensure_finite_non_negative("correction.contrast_clip_limit", c.contrast_clip_limit)?;
        ensure_finite_non_negative("correction.saturation_gain", c.saturation_gain)?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Validation helpers
// ═══════════════════════════════════════════════════════════

fn invalid(message: String) -> Result<(), PipelineError> {
    Err(PipelineError::InvalidConfig(message))
}

fn validate_clahe(name: &str, c: &ClaheConfig) -> Result<(), PipelineError> {
    if !c.clip_limit.is_finite() || c.clip_limit < 0.0 {
        return invalid(format!("{name}.clip_limit must be >= 0, got {}", c.clip_limit));
    }
    if c.tiles_x == 0 || c.tiles_y == 0 {
        return invalid(format!(
            "{name} tile grid must be positive, got {}x{}",
            c.tiles_x, c.tiles_y
        ));
    }
    Ok(())
}

fn ensure_finite_positive(name: &str, value: f32) -> Result<(), PipelineError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        invalid(format!("{name} must be positive, got {value}"))
    }
}

fn ensure_finite_non_negative(name: &str, value: f32) -> Result<(), PipelineError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        invalid(format!("{name} must be >= 0, got {value}"))
    }
}

fn ensure_weight(name: &str, value: f32) -> Result<(), PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(format!("{name} must be within [0, 1], got {value}"))
    }
}

fn ensure_odd_window(name: &str, value: u32) -> Result<(), PipelineError> {
    if value > 0 && value % 2 == 1 {
        Ok(())
    } else {
        invalid(format!("{name} must be a positive odd size, got {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn defaults_match_production_sequence() {
        let config = PipelineConfig::default();
        assert_eq!(config.resize.target_width, 512);
        assert_eq!(config.resize.target_height, 512);
        assert_eq!(config.local_contrast.clip_limit, 2.0);
        assert_eq!(config.final_contrast.clip_limit, 1.5);
        assert_eq!(config.denoise.search_window, 21);
        assert_eq!(config.edge_preserve.sigma_spatial, 50.0);
        assert!(!config.auto_correct);
        assert!(config.retain_stage_snapshots);
    }

    #[test]
    fn zero_target_is_rejected() {
        let mut config = PipelineConfig::default();
        config.resize.target_width = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(err.to_string().contains("0x512"));
    }

    #[test]
    fn even_denoise_window_is_rejected() {
        let mut config = PipelineConfig::default();
        config.denoise.template_window = 6;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn search_smaller_than_template_is_rejected() {
        let mut config = PipelineConfig::default();
        config.denoise.search_window = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_gamma_thresholds_are_rejected() {
        let mut config = PipelineConfig::default();
        config.gamma.dark_threshold = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_blend_weight_is_rejected() {
        let mut config = PipelineConfig::default();
        config.texture.texture_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn nan_parameters_are_rejected() {
        let mut config = PipelineConfig::default();
        config.sharpen.sigma = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.local_contrast.clip_limit = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "resize": { "target_width": 256 }, "auto_correct": true }"#,
        )
        .unwrap();
        assert_eq!(config.resize.target_width, 256);
        assert_eq!(config.resize.target_height, 512);
        assert!(config.auto_correct);
        assert_eq!(config.sharpen, SharpenConfig::default());
    }

    #[test]
    fn malformed_json_is_invalid_config() {
        let err = PipelineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn json_with_invalid_values_fails_validation() {
        let err = PipelineConfig::from_json(r#"{ "resize": { "target_height": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = PipelineConfig::default();
        config.denoise.bilateral_pass = Some(BilateralConfig::default());
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
