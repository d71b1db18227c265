pub mod analysis;
pub mod orchestrator; // Fixed 15-stage sequence over one upload
pub mod preprocess;
pub mod types;

pub use orchestrator::{Pipeline, PipelineOutput, RunContext};
pub use types::{Pixels, Snapshot, Stage, StageSnapshots};

use thiserror::Error;

use preprocess::StageError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stage that aborted the run, if the failure happened inside the sequence.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
