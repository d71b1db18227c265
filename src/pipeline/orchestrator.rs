//! Pipeline orchestrator: drives one upload through the fixed stage sequence.
//!
//! `Pipeline` holds only validated configuration and a clock, so one instance
//! can serve concurrent runs. Everything a run accumulates (statistics,
//! snapshots, applied corrections) lives in a `RunContext` owned by the
//! caller or created per call.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, info};
use uuid::Uuid;

use super::analysis::statistics::{Clock, StatisticsEngine, StatisticsSet, SystemClock};
use super::analysis::summary::RunSummary;
use super::preprocess::correction::detect_and_correct_with;
use super::preprocess::{buffer, operators, StageError};
use super::types::{Pixels, Snapshot, Stage, StageSnapshots};
use super::PipelineError;
use crate::pipeline_config::PipelineConfig;

// ═══════════════════════════════════════════════════════════
// Run state
// ═══════════════════════════════════════════════════════════

/// Mutable state of a single run.
pub struct RunContext {
    run_id: Uuid,
    statistics: StatisticsEngine,
    snapshots: StageSnapshots,
    corrections: Vec<String>,
}

impl RunContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            statistics: StatisticsEngine::with_clock(clock),
            snapshots: StageSnapshots::new(),
            corrections: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn statistics(&self) -> &StatisticsSet {
        self.statistics.records()
    }

    pub fn snapshots(&self) -> &StageSnapshots {
        &self.snapshots
    }

    pub fn corrections(&self) -> &[String] {
        &self.corrections
    }

    /// Drop everything from a previous run and start under a new id.
    pub fn reset(&mut self) {
        self.run_id = Uuid::new_v4();
        self.statistics.clear();
        self.snapshots.clear();
        self.corrections.clear();
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub final_image: RgbImage,
    pub summary: RunSummary,
    pub statistics: StatisticsSet,
    /// Moved out of the run context. Empty when snapshot retention is disabled.
    pub snapshots: StageSnapshots,
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

pub struct Pipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Validate `config` once; runs never re-check it.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: PipelineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used to timestamp records and summaries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn new_context(&self) -> RunContext {
        RunContext::new(Arc::clone(&self.clock))
    }

    /// Process one upload in a fresh context.
    pub fn run(&self, bytes: &[u8]) -> Result<PipelineOutput, PipelineError> {
        let mut ctx = self.new_context();
        self.run_in(&mut ctx, bytes)
    }

    /// Read an image file and process it.
    pub fn run_path(&self, path: &Path) -> Result<PipelineOutput, PipelineError> {
        let bytes = std::fs::read(path)?;
        self.run(&bytes)
    }

    /// Process one upload in a caller-owned context. The context is reset
    /// first, so nothing from an earlier run leaks into this one. On error the
    /// context keeps what was recorded up to the failing stage.
    pub fn run_in(
        &self,
        ctx: &mut RunContext,
        bytes: &[u8],
    ) -> Result<PipelineOutput, PipelineError> {
        ctx.reset();
        let started = Instant::now();
        info!(run_id = %ctx.run_id, bytes = bytes.len(), "Preprocessing run started");

        let original = buffer::load(bytes)?;
        ctx.statistics.capture(&original, Stage::Decode.key());
        let mut current = match &original.pixels {
            Pixels::Rgb(img) => img.clone(),
            Pixels::Gray(gray) => image::DynamicImage::ImageLuma8(gray.clone()).to_rgb8(),
        };
        if self.config.retain_stage_snapshots {
            ctx.snapshots.insert(original);
        }

        if self.config.auto_correct {
            let outcome = detect_and_correct_with(&current, &self.config.correction);
            ctx.corrections = outcome.labels();
            if !ctx.corrections.is_empty() {
                info!(corrections = ?ctx.corrections, "Applied auto-corrections");
            }
            current = outcome.image;
        }

        for &stage in &Stage::all()[1..] {
            current = self.apply_stage(stage, &current)?;
            self.record(ctx, stage, &current);
        }

        let elapsed = started.elapsed().as_secs_f64();
        let statistics = ctx.statistics.records().clone();
        let summary = RunSummary::from_records(
            ctx.run_id,
            self.clock.now(),
            elapsed,
            &statistics,
            ctx.corrections.clone(),
        );

        info!(
            run_id = %ctx.run_id,
            stages = summary.total_stages,
            elapsed_secs = elapsed,
            noise_reduction = summary.quality_improvement.noise_reduction,
            "Preprocessing run finished"
        );

        Ok(PipelineOutput {
            final_image: current,
            summary,
            statistics,
            snapshots: std::mem::take(&mut ctx.snapshots),
        })
    }

    /// Apply a single stage of the sequence. `Stage::Decode` has no operator
    /// and returns the image unchanged.
    pub fn apply_stage(&self, stage: Stage, img: &RgbImage) -> Result<RgbImage, PipelineError> {
        let result = match stage {
            Stage::Resize => buffer::resize_and_pad(img, &self.config.resize).map(|n| n.image),
            _ => self
                .apply_operator(stage, img)
                .map_err(|source| PipelineError::Stage { stage, source }),
        };
        debug!(stage = %stage, ok = result.is_ok(), "Stage complete");
        result
    }

    fn apply_operator(&self, stage: Stage, img: &RgbImage) -> Result<RgbImage, StageError> {
        let c = &self.config;
        match stage {
            Stage::Decode | Stage::Resize => Ok(img.clone()),
            Stage::Normalize => operators::normalize_colors(img),
            Stage::AdaptiveGamma => operators::adaptive_gamma(img, &c.gamma),
            Stage::LocalContrast => operators::local_contrast(img, &c.local_contrast),
            Stage::Denoise => operators::denoise(img, &c.denoise),
            Stage::EdgePreserve => operators::edge_preserve(img, &c.edge_preserve),
            Stage::EdgeEnhance => operators::enhance_edges(img, &c.edge_enhance),
            Stage::Sharpen => operators::unsharp_mask(img, &c.sharpen),
            Stage::ColorCorrect => operators::correct_colors(img),
            Stage::SaturationEnhance => operators::enhance_saturation(img, &c.saturation),
            Stage::WhiteBalance => operators::white_balance(img, &c.white_balance),
            Stage::TextureEnhance => operators::enhance_texture(img, &c.texture),
            Stage::FinalContrast => operators::local_contrast(img, &c.final_contrast),
            Stage::FinalOptimize => operators::final_optimize(img, &c.final_optimize),
        }
    }

    fn record(&self, ctx: &mut RunContext, stage: Stage, img: &RgbImage) {
        let snapshot = Snapshot::rgb(stage.key(), img.clone());
        ctx.statistics.capture(&snapshot, stage.key());
        if self.config.retain_stage_snapshots {
            ctx.snapshots.insert(snapshot);
        }
    }
}
