//! Measurement and reporting over stage snapshots.

pub mod report;
pub mod statistics;
pub mod summary;

pub use report::{summary_text, to_report_document, to_table, ReportDocument, StatisticsTable, TableRow};
pub use statistics::{
    compute_statistics, Clock, FixedClock, StageStatistics, StatisticsEngine, StatisticsSet,
    SystemClock,
};
pub use summary::{QualityImprovement, RunSummary, SizeChange};
