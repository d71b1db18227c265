//! Run summary: before/after deltas between the first and last records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::statistics::StatisticsSet;

/// Quality deltas, `final - first` except noise (`first - final`, so a
/// positive value means noise went down).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityImprovement {
    pub contrast_improvement: f64,
    pub sharpness_improvement: f64,
    pub noise_reduction: f64,
    pub saturation_enhancement: f64,
}

/// Raw pixel footprint change across the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeChange {
    pub original_mb: f64,
    pub final_mb: f64,
    pub size_change_mb: f64,
    /// Relative to the first footprint; 0 when that footprint is 0.
    pub size_change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub processing_time_secs: f64,
    pub stages_completed: Vec<String>,
    pub total_stages: usize,
    /// Labels of the auto-corrections applied before resizing.
    pub corrections_applied: Vec<String>,
    pub quality_improvement: QualityImprovement,
    pub size_change: SizeChange,
}

impl RunSummary {
    /// Derive a summary from the records of a finished run.
    pub fn from_records(
        run_id: Uuid,
        finished_at: DateTime<Utc>,
        processing_time_secs: f64,
        records: &StatisticsSet,
        corrections_applied: Vec<String>,
    ) -> Self {
        Self {
            run_id,
            finished_at,
            processing_time_secs,
            stages_completed: records.stage_names(),
            total_stages: records.len(),
            corrections_applied,
            quality_improvement: quality_improvement(records),
            size_change: size_change(records),
        }
    }
}

pub fn quality_improvement(records: &StatisticsSet) -> QualityImprovement {
    match (records.first(), records.last()) {
        (Some(first), Some(last)) => QualityImprovement {
            contrast_improvement: last.contrast - first.contrast,
            sharpness_improvement: last.blur_metric - first.blur_metric,
            noise_reduction: first.noise_level - last.noise_level,
            saturation_enhancement: last.saturation_avg - first.saturation_avg,
        },
        _ => QualityImprovement::default(),
    }
}

pub fn size_change(records: &StatisticsSet) -> SizeChange {
    match (records.first(), records.last()) {
        (Some(first), Some(last)) => {
            let delta_bytes = last.footprint_bytes as f64 - first.footprint_bytes as f64;
            let percent = if first.footprint_bytes == 0 {
                0.0
            } else {
                delta_bytes / first.footprint_bytes as f64 * 100.0
            };
            SizeChange {
                original_mb: first.size_mb,
                final_mb: last.size_mb,
                size_change_mb: last.size_mb - first.size_mb,
                size_change_percent: percent,
            }
        }
        _ => SizeChange::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analysis::statistics::compute_statistics;
    use crate::pipeline::preprocess::test_support::*;
    use crate::pipeline::types::Snapshot;
    use image::RgbImage;

    fn records_for(images: &[(&str, RgbImage)]) -> StatisticsSet {
        let mut set = StatisticsSet::new();
        for (name, img) in images {
            set.insert(compute_statistics(&Snapshot::rgb(*name, img.clone()), name, Utc::now()));
        }
        set
    }

    #[test]
    fn noise_reduction_is_first_minus_last_exactly() {
        let set = records_for(&[
            ("first", noisy(32, 32, [128, 128, 128], 20, 1)),
            ("middle", gradient(32, 32)),
            ("last", solid(32, 32, [128, 128, 128])),
        ]);
        let q = quality_improvement(&set);
        let first = set.first().unwrap();
        let last = set.last().unwrap();
        assert_eq!(q.noise_reduction, first.noise_level - last.noise_level);
        assert_eq!(q.contrast_improvement, last.contrast - first.contrast);
        assert_eq!(q.sharpness_improvement, last.blur_metric - first.blur_metric);
        assert!(q.noise_reduction > 0.0);
    }

    #[test]
    fn size_change_percent() {
        let set = records_for(&[("a", solid(100, 100, [0; 3])), ("b", solid(50, 100, [0; 3]))]);
        let s = size_change(&set);
        assert!((s.size_change_percent + 50.0).abs() < 1e-9);
        assert!(s.size_change_mb < 0.0);
        assert!((s.original_mb - 30000.0 / 1048576.0).abs() < 1e-12);
    }

    #[test]
    fn zero_first_footprint_gives_zero_percent() {
        let set = records_for(&[("a", RgbImage::new(0, 0)), ("b", solid(4, 4, [0; 3]))]);
        assert_eq!(size_change(&set).size_change_percent, 0.0);
    }

    #[test]
    fn empty_set_gives_zero_summary() {
        let summary = RunSummary::from_records(
            Uuid::new_v4(),
            Utc::now(),
            0.0,
            &StatisticsSet::new(),
            Vec::new(),
        );
        assert_eq!(summary.total_stages, 0);
        assert_eq!(summary.quality_improvement, QualityImprovement::default());
        assert_eq!(summary.size_change, SizeChange::default());
    }
}
