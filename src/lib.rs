//! Atelier: multi-stage preprocessing for outfit photos.
//!
//! An upload is decoded, auto-corrected on request, normalized to a fixed
//! canvas and pushed through a fixed sequence of enhancement stages. Every
//! stage is measured, and the measurements feed a run summary, a statistics
//! table and a JSON report.

pub mod config;
pub mod pipeline;
pub mod pipeline_config;

pub use pipeline::analysis::{
    summary_text, to_report_document, to_table, ReportDocument, RunSummary, StageStatistics,
    StatisticsEngine, StatisticsSet, StatisticsTable,
};
pub use pipeline::preprocess::correction::{detect_and_correct, Correction, CorrectionOutcome};
pub use pipeline::preprocess::custom::{run_custom_pipeline, CustomOperation, CustomPipelineOutcome};
pub use pipeline::{Pipeline, PipelineError, PipelineOutput, RunContext, Snapshot, Stage};
pub use pipeline_config::PipelineConfig;
