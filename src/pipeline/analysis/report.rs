//! Tabular and document views of a run's statistics.
//!
//! Everything here is a pure projection of a `StatisticsSet` (plus the run
//! summary); nothing is written to disk. Collaborators decide where the JSON
//! or CSV ends up.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::statistics::{StageStatistics, StatisticsSet};
use super::summary::{QualityImprovement, RunSummary, SizeChange};
use crate::pipeline::types::Stage;
use crate::pipeline::PipelineError;

pub const TABLE_COLUMNS: [&str; 11] = [
    "Stage",
    "Dimensions",
    "Size (MB)",
    "Brightness",
    "Contrast (Std)",
    "Sharpness (Laplacian)",
    "Noise Level",
    "Saturation",
    "Red Mean",
    "Green Mean",
    "Blue Mean",
];

// ═══════════════════════════════════════════════════════════
// Table
// ═══════════════════════════════════════════════════════════

/// One formatted row per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub stage: String,
    pub dimensions: String,
    pub size_mb: String,
    pub brightness: String,
    pub contrast: String,
    pub sharpness: String,
    pub noise_level: String,
    pub saturation: String,
    pub red_mean: String,
    pub green_mean: String,
    pub blue_mean: String,
}

impl TableRow {
    fn from_record(record: &StageStatistics) -> Self {
        let channel = |c: usize| {
            record
                .mean_rgb
                .get(c)
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "N/A".to_string())
        };
        Self {
            stage: title_case(&record.stage),
            dimensions: format!("{}x{}", record.width, record.height),
            size_mb: format!("{:.2}", record.size_mb),
            brightness: format!("{:.1}", record.brightness),
            contrast: format!("{:.1}", record.contrast),
            sharpness: format!("{:.1}", record.blur_metric),
            noise_level: format!("{:.2}", record.noise_level),
            saturation: format!("{:.1}", record.saturation_avg),
            red_mean: channel(0),
            green_mean: channel(1),
            blue_mean: channel(2),
        }
    }

    pub fn cells(&self) -> [&str; 11] {
        [
            self.stage.as_str(),
            self.dimensions.as_str(),
            self.size_mb.as_str(),
            self.brightness.as_str(),
            self.contrast.as_str(),
            self.sharpness.as_str(),
            self.noise_level.as_str(),
            self.saturation.as_str(),
            self.red_mean.as_str(),
            self.green_mean.as_str(),
            self.blue_mean.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsTable {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl StatisticsTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Comma-separated rendering with a header line. Cells containing
    /// commas, quotes or newlines are quoted.
    pub fn to_csv(&self) -> Result<String, PipelineError> {
        if self.columns.is_empty() {
            return Ok(String::new());
        }
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.cells())?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        String::from_utf8(bytes)
            .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

/// One row per record, in record order. An empty set gives an empty table.
pub fn to_table(records: &StatisticsSet) -> StatisticsTable {
    if records.is_empty() {
        return StatisticsTable::default();
    }
    StatisticsTable {
        columns: TABLE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: records.iter().map(TableRow::from_record).collect(),
    }
}

/// `step01_original` → `Step01_Original`.
fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut start = true;
    for ch in name.chars() {
        if ch.is_alphabetic() {
            if start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            start = false;
        } else {
            out.push(ch);
            start = true;
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Report document
// ═══════════════════════════════════════════════════════════

/// Serializable report of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub processing_timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub stages_processed: Vec<String>,
    pub detailed_stats: Vec<StageStatistics>,
    pub summary_table: StatisticsTable,
    pub quality_improvements: QualityImprovement,
    pub size_changes: SizeChange,
}

impl ReportDocument {
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub fn to_report_document(records: &StatisticsSet, summary: &RunSummary) -> ReportDocument {
    ReportDocument {
        processing_timestamp: summary.finished_at,
        run_id: summary.run_id,
        stages_processed: records.stage_names(),
        detailed_stats: records.records().to_vec(),
        summary_table: to_table(records),
        quality_improvements: summary.quality_improvement.clone(),
        size_changes: summary.size_change.clone(),
    }
}

/// Human-readable run summary.
pub fn summary_text(records: &StatisticsSet, summary: &RunSummary) -> String {
    if records.is_empty() {
        return "No processing data available".to_string();
    }

    let q = &summary.quality_improvement;
    let s = &summary.size_change;
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "IMAGE PREPROCESSING SUMMARY");
    let _ = writeln!(out, "===========================");
    let _ = writeln!(out, "Run: {}", summary.run_id);
    let _ = writeln!(out, "Stages completed: {}", records.len());
    let _ = writeln!(out, "Sequence: {}", records.stage_names().join(" -> "));
    let _ = writeln!(out, "Processing time: {:.2}s", summary.processing_time_secs);
    if !summary.corrections_applied.is_empty() {
        let _ = writeln!(out, "Corrections: {}", summary.corrections_applied.join(", "));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "QUALITY CHANGES");
    let _ = writeln!(out, "  Contrast: {:.2}", q.contrast_improvement);
    let _ = writeln!(out, "  Sharpness: {:.2}", q.sharpness_improvement);
    let _ = writeln!(out, "  Noise reduction: {:.2}", q.noise_reduction);
    let _ = writeln!(out, "  Saturation: {:.2}", q.saturation_enhancement);
    let _ = writeln!(out);
    let _ = writeln!(out, "SIZE CHANGES");
    let _ = writeln!(out, "  Original: {:.2} MB", s.original_mb);
    let _ = writeln!(out, "  Final: {:.2} MB", s.final_mb);
    let _ = writeln!(out, "  Change: {:+.1}%", s.size_change_percent);
    let _ = writeln!(out);
    let _ = writeln!(out, "STAGES");
    for name in records.stage_names() {
        let _ = match Stage::from_key(&name) {
            Some(stage) => writeln!(out, "  {:02}. {name}: {}", stage.number(), stage.description()),
            None => writeln!(out, "  {name}"),
        };
    }
    out
}
