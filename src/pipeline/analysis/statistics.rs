//! Per-stage image statistics.
//!
//! A record captures geometry, per-channel distribution (color only), and
//! five scalar quality metrics: brightness, contrast, Laplacian sharpness,
//! noise level and mean saturation. Records are kept in capture order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::preprocess::color::saturation_u8;
use crate::pipeline::preprocess::filters::{box_blur3, laplacian, Plane};
use crate::pipeline::types::{Pixels, Snapshot};

// ═══════════════════════════════════════════════════════════
// Clock
// ═══════════════════════════════════════════════════════════

/// Source of capture timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant. Makes repeated captures bit-identical.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ═══════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════

/// Quantitative description of one stage snapshot.
///
/// Channel vectors (`mean_rgb` … `histograms`) are empty for grayscale
/// snapshots; the scalar metrics are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatistics {
    pub stage: String,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub footprint_bytes: u64,
    pub size_mb: f64,
    pub mean_rgb: Vec<f64>,
    pub std_rgb: Vec<f64>,
    pub min_rgb: Vec<u8>,
    pub max_rgb: Vec<u8>,
    pub median_rgb: Vec<f64>,
    /// 256-bucket histogram per channel.
    pub histograms: Vec<Vec<u64>>,
    /// Mean of all channel values.
    pub brightness: f64,
    /// Population standard deviation of all channel values.
    pub contrast: f64,
    /// Variance of the Laplacian of the luma image. Higher = sharper.
    pub blur_metric: f64,
    /// Standard deviation of luma minus its 3x3 box-filtered version.
    pub noise_level: f64,
    /// Mean HSV saturation (0-255); 0 for grayscale.
    pub saturation_avg: f64,
}

impl StageStatistics {
    pub fn is_color(&self) -> bool {
        self.channels == 3
    }
}

/// Ordered set of records, one per stage name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsSet {
    records: Vec<StageStatistics>,
}

impl StatisticsSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; a record with the same stage name is replaced in place.
    pub fn insert(&mut self, record: StageStatistics) {
        match self.records.iter_mut().find(|r| r.stage == record.stage) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn get(&self, stage: &str) -> Option<&StageStatistics> {
        self.records.iter().find(|r| r.stage == stage)
    }

    pub fn first(&self) -> Option<&StageStatistics> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&StageStatistics> {
        self.records.last()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.stage.clone()).collect()
    }

    pub fn records(&self) -> &[StageStatistics] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageStatistics> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

// ═══════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════

/// Captures records into an ordered set, timestamped by its clock.
pub struct StatisticsEngine {
    records: StatisticsSet,
    clock: Arc<dyn Clock>,
}

impl Default for StatisticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsEngine {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: StatisticsSet::new(),
            clock,
        }
    }

    /// Compute statistics for `snapshot`, store them under `stage` and return
    /// a copy of the stored record.
    pub fn capture(&mut self, snapshot: &Snapshot, stage: &str) -> StageStatistics {
        let record = compute_statistics(snapshot, stage, self.clock.now());
        debug!(
            stage,
            brightness = record.brightness,
            contrast = record.contrast,
            blur = record.blur_metric,
            noise = record.noise_level,
            saturation = record.saturation_avg,
            "Captured stage statistics"
        );
        self.records.insert(record.clone());
        record
    }

    pub fn records(&self) -> &StatisticsSet {
        &self.records
    }

    /// Hand over the records, leaving the engine empty.
    pub fn take_records(&mut self) -> StatisticsSet {
        std::mem::take(&mut self.records)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

// ═══════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════

/// Pure statistics computation for one snapshot.
pub fn compute_statistics(
    snapshot: &Snapshot,
    stage: &str,
    captured_at: DateTime<Utc>,
) -> StageStatistics {
    let footprint_bytes = snapshot.footprint_bytes();
    let gray = snapshot.to_gray();

    let (values, channels) = match &snapshot.pixels {
        Pixels::Gray(img) => (img.as_raw().as_slice(), None),
        Pixels::Rgb(img) => (img.as_raw().as_slice(), Some(channel_summary(img))),
    };
    let (brightness, contrast) = mean_and_std(values);
    let saturation_avg = snapshot.as_rgb().map(mean_saturation).unwrap_or(0.0);
    let channels = channels.unwrap_or_default();

    StageStatistics {
        stage: stage.to_string(),
        captured_at,
        width: snapshot.width(),
        height: snapshot.height(),
        channels: snapshot.channels(),
        footprint_bytes,
        size_mb: footprint_bytes as f64 / (1024.0 * 1024.0),
        mean_rgb: channels.mean,
        std_rgb: channels.std,
        min_rgb: channels.min,
        max_rgb: channels.max,
        median_rgb: channels.median,
        histograms: channels.histograms,
        brightness,
        contrast,
        blur_metric: laplacian_variance(&gray),
        noise_level: noise_level(&gray),
        saturation_avg,
    }
}

#[derive(Debug, Default)]
struct ChannelSummary {
    mean: Vec<f64>,
    std: Vec<f64>,
    min: Vec<u8>,
    max: Vec<u8>,
    median: Vec<f64>,
    histograms: Vec<Vec<u64>>,
}

fn channel_summary(img: &RgbImage) -> ChannelSummary {
    let mut summary = ChannelSummary::default();
    let n = (img.width() as u64) * (img.height() as u64);
    if n == 0 {
        return summary;
    }

    for c in 0..3 {
        let mut hist = vec![0u64; 256];
        for v in img.as_raw().iter().skip(c).step_by(3) {
            hist[*v as usize] += 1;
        }

        let mean = hist.iter().enumerate().map(|(v, &k)| v as f64 * k as f64).sum::<f64>() / n as f64;
        let var = hist
            .iter()
            .enumerate()
            .map(|(v, &k)| (v as f64 - mean).powi(2) * k as f64)
            .sum::<f64>()
            / n as f64;
        let min = hist.iter().position(|&k| k > 0).unwrap_or(0) as u8;
        let max = hist.iter().rposition(|&k| k > 0).unwrap_or(0) as u8;

        summary.mean.push(mean);
        summary.std.push(var.sqrt());
        summary.min.push(min);
        summary.max.push(max);
        summary.median.push(histogram_median(&hist, n));
        summary.histograms.push(hist);
    }
    summary
}

/// Median from a histogram; the mean of the two middle values for even counts.
fn histogram_median(hist: &[u64], n: u64) -> f64 {
    let nth = |k: u64| -> f64 {
        let mut seen = 0u64;
        for (v, &count) in hist.iter().enumerate() {
            seen += count;
            if seen > k {
                return v as f64;
            }
        }
        0.0
    };
    if n % 2 == 1 {
        nth(n / 2)
    } else {
        (nth(n / 2 - 1) + nth(n / 2)) / 2.0
    }
}

/// Mean and population standard deviation.
pub fn mean_and_std(values: &[u8]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut hist = [0u64; 256];
    for &v in values {
        hist[v as usize] += 1;
    }
    let n = values.len() as f64;
    let mean = hist.iter().enumerate().map(|(v, &k)| v as f64 * k as f64).sum::<f64>() / n;
    let var = hist
        .iter()
        .enumerate()
        .map(|(v, &k)| (v as f64 - mean).powi(2) * k as f64)
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Variance of the 3x3 Laplacian response (reflect-101 borders).
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    laplacian(&Plane::from_gray(gray)).variance()
}

/// Standard deviation of the residual after 3x3 box smoothing.
pub fn noise_level(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let plane = Plane::from_gray(gray);
    let smoothed = box_blur3(&plane);
    let residual = Plane {
        width: plane.width,
        height: plane.height,
        data: plane
            .data
            .iter()
            .zip(&smoothed.data)
            .map(|(&a, &b)| a - b)
            .collect(),
    };
    residual.variance().sqrt()
}

/// Mean HSV saturation on the 0-255 scale.
pub fn mean_saturation(img: &RgbImage) -> f64 {
    let raw = img.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let sum: u64 = raw
        .chunks_exact(3)
        .map(|p| saturation_u8(p[0], p[1], p[2]) as u64)
        .sum();
    sum as f64 / (raw.len() / 3) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::test_support::*;
    use chrono::TimeZone;
    use image::{Luma, Rgb};

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn record(name: &str) -> StageStatistics {
        compute_statistics(&Snapshot::rgb(name, solid(2, 2, [1, 2, 3])), name, fixed_time())
    }

    #[test]
    fn grayscale_snapshot_has_no_channel_fields() {
        let snap = Snapshot::gray("g", gray_ramp(32, 8));
        let stats = compute_statistics(&snap, "g", fixed_time());
        assert_eq!(stats.channels, 1);
        assert!(stats.mean_rgb.is_empty());
        assert!(stats.std_rgb.is_empty());
        assert!(stats.min_rgb.is_empty());
        assert!(stats.max_rgb.is_empty());
        assert!(stats.median_rgb.is_empty());
        assert!(stats.histograms.is_empty());
        assert_eq!(stats.saturation_avg, 0.0);
        assert!(stats.brightness > 0.0);
        assert!(stats.blur_metric >= 0.0);
        assert!(!stats.is_color());
    }

    #[test]
    fn color_snapshot_populates_channel_fields() {
        let img = RgbImage::from_fn(4, 1, |x, _| Rgb([x as u8 * 10, 100, 255 - x as u8]));
        let stats = compute_statistics(&Snapshot::rgb("c", img), "c", fixed_time());
        assert_eq!(stats.mean_rgb, vec![15.0, 100.0, 253.5]);
        assert_eq!(stats.min_rgb, vec![0, 100, 252]);
        assert_eq!(stats.max_rgb, vec![30, 100, 255]);
        assert_eq!(stats.median_rgb, vec![15.0, 100.0, 253.5]);
        assert_eq!(stats.std_rgb[1], 0.0);
        assert_eq!(stats.histograms.len(), 3);
        for hist in &stats.histograms {
            assert_eq!(hist.len(), 256);
            assert_eq!(hist.iter().sum::<u64>(), 4);
        }
    }

    #[test]
    fn footprint_and_size() {
        let stats = compute_statistics(
            &Snapshot::rgb("s", solid(512, 512, [0, 0, 0])),
            "s",
            fixed_time(),
        );
        assert_eq!(stats.footprint_bytes, 512 * 512 * 3);
        assert!((stats.size_mb - 0.75).abs() < 1e-12);
    }

    #[test]
    fn mid_gray_has_expected_brightness_and_no_noise() {
        let stats = compute_statistics(
            &Snapshot::rgb("m", solid(64, 64, [128, 128, 128])),
            "m",
            fixed_time(),
        );
        assert_eq!(stats.brightness, 128.0);
        assert_eq!(stats.contrast, 0.0);
        assert_eq!(stats.blur_metric, 0.0);
        assert!(stats.noise_level.abs() < 1e-6);
        assert_eq!(stats.saturation_avg, 0.0);
    }

    #[test]
    fn sharpness_is_deterministic_and_orders_images() {
        let sharp = to_gray_img(&checkerboard(32, 32, 2));
        let soft = to_gray_img(&checkerboard(32, 32, 8));
        assert_eq!(laplacian_variance(&sharp), laplacian_variance(&sharp));
        assert!(laplacian_variance(&sharp) > laplacian_variance(&soft));
    }

    fn to_gray_img(img: &RgbImage) -> GrayImage {
        crate::pipeline::preprocess::buffer::to_gray(img)
    }

    #[test]
    fn laplacian_variance_of_single_spike() {
        let mut gray = GrayImage::from_pixel(5, 5, Luma([0]));
        gray.put_pixel(2, 2, Luma([10]));
        // Responses: -40 at the spike, +10 at its four neighbours, 0 elsewhere.
        let mean = 0.0;
        let expected = ((40.0f64 - mean).powi(2) + 4.0 * 100.0) / 25.0;
        assert!((laplacian_variance(&gray) - expected).abs() < 1e-9);
    }

    #[test]
    fn noisy_image_has_higher_noise_level() {
        let clean = to_gray_img(&solid(32, 32, [120, 120, 120]));
        let noisy_img = to_gray_img(&noisy(32, 32, [120, 120, 120], 20, 9));
        assert!(noise_level(&noisy_img) > noise_level(&clean) + 5.0);
    }

    #[test]
    fn saturation_of_pure_colors() {
        assert_eq!(mean_saturation(&solid(3, 3, [255, 0, 0])), 255.0);
        assert_eq!(mean_saturation(&solid(3, 3, [90, 90, 90])), 0.0);
    }

    #[test]
    fn median_of_even_and_odd_counts() {
        let mut hist = vec![0u64; 256];
        hist[10] = 1;
        hist[20] = 1;
        assert_eq!(histogram_median(&hist, 2), 15.0);
        hist[30] = 1;
        assert_eq!(histogram_median(&hist, 3), 20.0);
    }

    #[test]
    fn capture_is_idempotent_with_fixed_clock() {
        let mut engine = StatisticsEngine::with_clock(Arc::new(FixedClock(fixed_time())));
        let snap = Snapshot::rgb("x", gradient(20, 10));
        let first = engine.capture(&snap, "step");
        let second = engine.capture(&snap, "step");
        assert_eq!(first, second);
        assert_eq!(engine.records().len(), 1);
    }

    #[test]
    fn recapture_overwrites_without_reordering() {
        let mut set = StatisticsSet::new();
        set.insert(record("a"));
        set.insert(record("b"));
        set.insert(record("c"));
        let mut replacement = record("b");
        replacement.width = 99;
        set.insert(replacement);

        assert_eq!(set.stage_names(), vec!["a", "b", "c"]);
        assert_eq!(set.get("b").unwrap().width, 99);
        assert_eq!(set.first().unwrap().stage, "a");
        assert_eq!(set.last().unwrap().stage, "c");
    }

    #[test]
    fn statistics_set_serializes_as_list() {
        let mut set = StatisticsSet::new();
        set.insert(record("a"));
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.is_array());
        let back: StatisticsSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn engine_take_leaves_it_empty() {
        let mut engine = StatisticsEngine::new();
        engine.capture(&Snapshot::rgb("x", solid(2, 2, [0; 3])), "x");
        let taken = engine.take_records();
        assert_eq!(taken.len(), 1);
        assert!(engine.records().is_empty());
    }

    #[test]
    fn empty_snapshot_does_not_panic() {
        let stats = compute_statistics(&Snapshot::rgb("e", RgbImage::new(0, 0)), "e", fixed_time());
        assert_eq!(stats.footprint_bytes, 0);
        assert_eq!(stats.brightness, 0.0);
        assert!(stats.mean_rgb.is_empty());
    }
}
