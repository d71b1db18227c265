use std::fmt;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use super::preprocess::buffer::to_gray;

// ═══════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════

/// The fixed stage sequence of the core pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Resize,
    Normalize,
    AdaptiveGamma,
    LocalContrast,
    Denoise,
    EdgePreserve,
    EdgeEnhance,
    Sharpen,
    ColorCorrect,
    SaturationEnhance,
    WhiteBalance,
    TextureEnhance,
    FinalContrast,
    FinalOptimize,
}

impl Stage {
    pub const COUNT: usize = 15;

    const ALL: [Stage; Stage::COUNT] = [
        Stage::Decode,
        Stage::Resize,
        Stage::Normalize,
        Stage::AdaptiveGamma,
        Stage::LocalContrast,
        Stage::Denoise,
        Stage::EdgePreserve,
        Stage::EdgeEnhance,
        Stage::Sharpen,
        Stage::ColorCorrect,
        Stage::SaturationEnhance,
        Stage::WhiteBalance,
        Stage::TextureEnhance,
        Stage::FinalContrast,
        Stage::FinalOptimize,
    ];

    /// All stages in execution order.
    pub fn all() -> &'static [Stage] {
        &Self::ALL
    }

    /// Statistics key for this stage (`step01_original` … `step15_final`).
    pub fn key(&self) -> &'static str {
        match self {
            Self::Decode => "step01_original",
            Self::Resize => "step02_resized",
            Self::Normalize => "step03_normalized",
            Self::AdaptiveGamma => "step04_gamma_corrected",
            Self::LocalContrast => "step05_clahe_enhanced",
            Self::Denoise => "step06_denoised",
            Self::EdgePreserve => "step07_edge_preserved",
            Self::EdgeEnhance => "step08_edges_enhanced",
            Self::Sharpen => "step09_sharpened",
            Self::ColorCorrect => "step10_color_corrected",
            Self::SaturationEnhance => "step11_saturation_enhanced",
            Self::WhiteBalance => "step12_white_balanced",
            Self::TextureEnhance => "step13_texture_enhanced",
            Self::FinalContrast => "step14_final_contrast",
            Self::FinalOptimize => "step15_final",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.key() == key)
    }

    /// 1-based position in the sequence.
    pub fn number(&self) -> usize {
        *self as usize + 1
    }

    /// Human-readable description shown next to stage previews.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Decode => "Original uploaded image without any modifications",
            Self::Resize => "Image resized to the target size with aspect ratio preserved",
            Self::Normalize => "Per-channel color range stretched to the full 0-255 scale",
            Self::AdaptiveGamma => "Gamma adjusted according to overall image brightness",
            Self::LocalContrast => "Local contrast enhanced with CLAHE on the lightness channel",
            Self::Denoise => "Noise reduced with non-local means filtering",
            Self::EdgePreserve => "Smoothed while preserving important edges",
            Self::EdgeEnhance => "Edges strengthened with Sobel gradient blending",
            Self::Sharpen => "Details sharpened with an unsharp mask",
            Self::ColorCorrect => "Lightness range stretched in L*a*b* space",
            Self::SaturationEnhance => "Colors made more vibrant via HSV saturation",
            Self::WhiteBalance => "Color cast removed with a gray-world white balance",
            Self::TextureEnhance => "Fabric texture emphasized with a high-pass kernel",
            Self::FinalContrast => "Final gentle local contrast adjustment",
            Self::FinalOptimize => "Final smoothing pass producing the output image",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ═══════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════

/// Pixel payload of a snapshot: 8-bit luma or 8-bit interleaved RGB.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    Gray(GrayImage),
    Rgb(RgbImage),
}

/// An immutable labelled image captured at some point of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub label: String,
    pub pixels: Pixels,
}

impl Snapshot {
    pub fn rgb(label: impl Into<String>, image: RgbImage) -> Self {
        Self {
            label: label.into(),
            pixels: Pixels::Rgb(image),
        }
    }

    pub fn gray(label: impl Into<String>, image: GrayImage) -> Self {
        Self {
            label: label.into(),
            pixels: Pixels::Gray(image),
        }
    }

    pub fn width(&self) -> u32 {
        match &self.pixels {
            Pixels::Gray(img) => img.width(),
            Pixels::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.pixels {
            Pixels::Gray(img) => img.height(),
            Pixels::Rgb(img) => img.height(),
        }
    }

    /// 1 for grayscale, 3 for color.
    pub fn channels(&self) -> u8 {
        match &self.pixels {
            Pixels::Gray(_) => 1,
            Pixels::Rgb(_) => 3,
        }
    }

    /// Raw pixel storage in bytes (`width * height * channels`).
    pub fn footprint_bytes(&self) -> u64 {
        self.width() as u64 * self.height() as u64 * self.channels() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn as_rgb(&self) -> Option<&RgbImage> {
        match &self.pixels {
            Pixels::Rgb(img) => Some(img),
            Pixels::Gray(_) => None,
        }
    }

    /// Luma view of the snapshot (BT.601 for color, a copy for gray).
    pub fn to_gray(&self) -> GrayImage {
        match &self.pixels {
            Pixels::Gray(img) => img.clone(),
            Pixels::Rgb(img) => to_gray(img),
        }
    }
}

/// Stage snapshots of one run, kept in pipeline order.
///
/// Collaborators that only need the final image can drain this with
/// [`StageSnapshots::take`] or disable retention in the config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSnapshots {
    entries: Vec<Snapshot>,
}

impl StageSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snapshot; an existing label is replaced in place.
    pub fn insert(&mut self, snapshot: Snapshot) {
        match self.entries.iter_mut().find(|s| s.label == snapshot.label) {
            Some(existing) => *existing = snapshot,
            None => self.entries.push(snapshot),
        }
    }

    pub fn get(&self, stage: Stage) -> Option<&Snapshot> {
        self.get_by_label(stage.key())
    }

    pub fn get_by_label(&self, label: &str) -> Option<&Snapshot> {
        self.entries.iter().find(|s| s.label == label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.label.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Hand over all snapshots, leaving the collection empty.
    pub fn take(&mut self) -> Vec<Snapshot> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn every_stage_has_a_distinct_description() {
        let descriptions: Vec<&str> = Stage::all().iter().map(|s| s.description()).collect();
        assert_eq!(descriptions.len(), Stage::COUNT);
        assert!(descriptions.iter().all(|d| !d.is_empty()));
        let unique: std::collections::HashSet<&str> = descriptions.iter().copied().collect();
        assert_eq!(unique.len(), Stage::COUNT);
        assert_eq!(
            Stage::Decode.description(),
            "Original uploaded image without any modifications"
        );
        assert_eq!(
            Stage::FinalOptimize.description(),
            "Final smoothing pass producing the output image"
        );
    }

    #[test]
    fn stage_keys_are_ordered_and_unique() {
        let keys: Vec<&str> = Stage::all().iter().map(|s| s.key()).collect();
        assert_eq!(keys.len(), 15);
        assert_eq!(keys[0], "step01_original");
        assert_eq!(keys[14], "step15_final");
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys, "step numbering sorts in execution order");
    }

    #[test]
    fn stage_number_matches_key_prefix() {
        for stage in Stage::all() {
            let prefix = format!("step{:02}_", stage.number());
            assert!(stage.key().starts_with(&prefix), "{stage}");
        }
    }

    #[test]
    fn stage_from_key_round_trips() {
        for stage in Stage::all() {
            assert_eq!(Stage::from_key(stage.key()), Some(*stage));
        }
        assert_eq!(Stage::from_key("step99_unknown"), None);
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::AdaptiveGamma).unwrap();
        assert_eq!(json, "\"adaptive_gamma\"");
    }

    #[test]
    fn snapshot_dimensions_and_footprint() {
        let rgb = Snapshot::rgb("a", RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])));
        assert_eq!(rgb.channels(), 3);
        assert_eq!(rgb.footprint_bytes(), 36);

        let gray = Snapshot::gray("b", GrayImage::from_pixel(4, 3, Luma([9])));
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.footprint_bytes(), 12);
        assert!(gray.as_rgb().is_none());
    }

    #[test]
    fn empty_snapshot_is_reported() {
        let snap = Snapshot::rgb("empty", RgbImage::new(0, 0));
        assert!(snap.is_empty());
        assert_eq!(snap.footprint_bytes(), 0);
    }

    #[test]
    fn snapshots_overwrite_in_place() {
        let mut snaps = StageSnapshots::new();
        snaps.insert(Snapshot::rgb("first", RgbImage::new(1, 1)));
        snaps.insert(Snapshot::rgb("second", RgbImage::new(1, 1)));
        snaps.insert(Snapshot::rgb("first", RgbImage::new(2, 2)));

        assert_eq!(snaps.labels(), vec!["first", "second"]);
        assert_eq!(snaps.get_by_label("first").unwrap().width(), 2);

        let drained = snaps.take();
        assert_eq!(drained.len(), 2);
        assert!(snaps.is_empty());
    }
}
