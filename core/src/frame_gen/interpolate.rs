//! Temporal interpolation.
//!
//! The interpolator turns a motion field into a per-block [`WarpPlan`]: where
//! to sample the previous and current frames and how to weight the two
//! samples. The plan is dispatched to the device's [`FrameCompositor`], which
//! writes the generated image into an engine-owned target. Confidence is
//! derived from the plan, so it is known before any GPU work is issued.
//!
//! - Performance: one forward warp, linear blend.
//! - Balanced: forward and backward warps, occlusion-aware weights.
//! - Quality: balanced plus iterative neighbour fill of the remaining holes.

use std::sync::Arc;

use glam::Vec2;
use nvvk_shared::{FrameGenMode, FrameId, ImageHandle, NvvkError, NvvkResult};

use super::frame::Frame;
use super::motion::{MotionBlock, MotionField};
use crate::clock::Clock;
use crate::config::InterpolationConfig;
use crate::error::DeviceError;

/// Warp/blend compute pass on the device.
pub trait FrameCompositor: Send + Sync {
    /// Write the frame described by `plan` into `target`.
    fn compose(
        &self,
        plan: &WarpPlan,
        prev: ImageHandle,
        curr: ImageHandle,
        target: ImageHandle,
    ) -> Result<(), DeviceError>;
}

// ============================================================================
// Warp plan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    /// Sampled along its own motion vectors
    Warped,
    /// Borrowed motion from valid neighbours
    Filled,
    /// No usable motion; plain cross-fade at the block position
    Fallback,
}

/// How one output block is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockWarp {
    /// Sample position in the previous frame, in pixels
    pub prev_sample: Vec2,
    /// Sample position in the current frame, in pixels
    pub curr_sample: Vec2,
    pub prev_weight: f32,
    pub curr_weight: f32,
    pub source: BlockSource,
    /// Estimator confidence backing this block, in [0, 1]
    pub score: f32,
}

impl BlockWarp {
    fn fallback(center: Vec2, t: f32) -> Self {
        Self {
            prev_sample: center,
            curr_sample: center,
            prev_weight: 1.0 - t,
            curr_weight: t,
            source: BlockSource::Fallback,
            score: 0.0,
        }
    }
}

/// Per-block instructions for the compositor, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpPlan {
    pub mode: FrameGenMode,
    pub t: f32,
    pub block_size: u32,
    pub cols: u32,
    pub rows: u32,
    pub blocks: Vec<BlockWarp>,
}

impl WarpPlan {
    pub fn count(&self, source: BlockSource) -> usize {
        self.blocks.iter().filter(|b| b.source == source).count()
    }
}

// ============================================================================
// Generated frame
// ============================================================================

/// A synthesized frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratedFrame {
    /// Engine-owned output target
    pub image: ImageHandle,
    /// In [0, 1]
    pub confidence: f32,
    pub generation_time_us: u64,
    pub frame_id: FrameId,
    /// False when confidence is under the floor; the image is then not written
    pub should_present: bool,
    pub mode: FrameGenMode,
    /// Presentation time, interpolated between the bounding real frames
    pub timestamp_us: u64,
    pub over_budget: bool,
}

// ============================================================================
// Interpolator
// ============================================================================

pub struct Interpolator {
    config: InterpolationConfig,
    clock: Arc<dyn Clock>,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    pub fn budget_us(&self, mode: FrameGenMode) -> u64 {
        self.config.budget_us(mode)
    }

    /// Generate the frame at temporal position `t` between `prev` and `curr`.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        prev: &Frame,
        curr: &Frame,
        field: &MotionField,
        mode: FrameGenMode,
        t: f32,
        target: ImageHandle,
        frame_id: FrameId,
        compositor: &dyn FrameCompositor,
    ) -> NvvkResult<GeneratedFrame> {
        let start_us = self.clock.now_us();

        let plan = self.plan(field, mode, t)?;
        let confidence = self.confidence(&plan);
        let should_present = confidence >= self.config.confidence_floor;

        if should_present {
            compositor.compose(&plan, prev.image, curr.image, target)?;
        }

        let generation_time_us = self.clock.now_us().saturating_sub(start_us);
        let span = curr.timestamp_us.saturating_sub(prev.timestamp_us);

        Ok(GeneratedFrame {
            image: target,
            confidence,
            generation_time_us,
            frame_id,
            should_present,
            mode,
            timestamp_us: prev.timestamp_us + (span as f64 * f64::from(t)) as u64,
            over_budget: generation_time_us > self.budget_us(mode),
        })
    }

    /// Build the warp plan for `field`.
    pub fn plan(&self, field: &MotionField, mode: FrameGenMode, t: f32) -> NvvkResult<WarpPlan> {
        if !mode.is_active() {
            return Err(NvvkError::invalid_usage("cannot interpolate with mode off"));
        }
        if !(t > 0.0 && t < 1.0) {
            return Err(NvvkError::invalid_usage(format!(
                "temporal position {t} is outside (0, 1)"
            )));
        }

        let (cols, rows) = field.grid();
        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(field.len())
            .map_err(|_| NvvkError::OutOfMemory("warp plan".into()))?;

        for row in 0..rows {
            for col in 0..cols {
                let warp = match mode {
                    FrameGenMode::Performance => self.forward_warp(field, col, row, t),
                    _ => self.bidirectional_warp(field, col, row, t),
                };
                blocks.push(warp);
            }
        }

        if mode == FrameGenMode::Quality {
            self.fill_holes(field, &mut blocks);
        }

        Ok(WarpPlan {
            mode,
            t,
            block_size: field.block_size(),
            cols,
            rows,
            blocks,
        })
    }

    /// Valid fraction times mean mask confidence, with partial credit for
    /// filled blocks. Always in [0, 1].
    pub fn confidence(&self, plan: &WarpPlan) -> f32 {
        if plan.blocks.is_empty() {
            return 0.0;
        }

        let credit = self.config.filled_block_credit;
        let total: f32 = plan
            .blocks
            .iter()
            .map(|b| match b.source {
                BlockSource::Warped => b.score,
                BlockSource::Filled => credit * b.score,
                BlockSource::Fallback => 0.0,
            })
            .sum();

        let confidence = total / plan.blocks.len() as f32;
        if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn usable(&self, block: &MotionBlock) -> bool {
        !block.occluded && block.confidence >= self.config.occlusion_confidence_floor
    }

    fn forward_warp(&self, field: &MotionField, col: u32, row: u32, t: f32) -> BlockWarp {
        let center = field.block_center(col, row);
        let block = field.block(col, row);
        let prev_sample = center - block.vector * t;
        let curr_sample = center + block.vector * (1.0 - t);

        if !self.usable(block) || !field.in_bounds(prev_sample) || !field.in_bounds(curr_sample) {
            return BlockWarp::fallback(center, t);
        }

        BlockWarp {
            prev_sample,
            curr_sample,
            prev_weight: 1.0 - t,
            curr_weight: t,
            source: BlockSource::Warped,
            score: block.confidence.clamp(0.0, 1.0),
        }
    }

    fn bidirectional_warp(&self, field: &MotionField, col: u32, row: u32, t: f32) -> BlockWarp {
        let center = field.block_center(col, row);

        let forward = field.block(col, row);
        let prev_sample = center - forward.vector * t;
        let prev_conf = if self.usable(forward) && field.in_bounds(prev_sample) {
            forward.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let curr_sample = center - field.backward(col, row) * (1.0 - t);
        let curr_conf = match field.block_at(curr_sample) {
            Some((c, r)) if self.usable(field.block(c, r)) => {
                field.block(c, r).confidence.clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        let w_prev = (1.0 - t) * prev_conf;
        let w_curr = t * curr_conf;
        let sum = w_prev + w_curr;
        if sum <= f32::EPSILON {
            return BlockWarp::fallback(center, t);
        }

        BlockWarp {
            prev_sample,
            curr_sample,
            prev_weight: w_prev / sum,
            curr_weight: w_curr / sum,
            source: BlockSource::Warped,
            score: (w_prev * prev_conf + w_curr * curr_conf) / sum,
        }
    }

    /// Fill fallback blocks from their valid 8-neighbours, weighted by the
    /// neighbours' confidence. Each pass reads the previous pass's result.
    fn fill_holes(&self, field: &MotionField, blocks: &mut [BlockWarp]) {
        let (cols, rows) = field.grid();
        let max = Vec2::new(field.width() as f32 - 0.5, field.height() as f32 - 0.5);

        for _ in 0..self.config.hole_fill_passes {
            let snapshot = blocks.to_vec();
            let mut filled_any = false;

            for row in 0..rows {
                for col in 0..cols {
                    let i = (row * cols + col) as usize;
                    if snapshot[i].source != BlockSource::Fallback {
                        continue;
                    }

                    let mut prev_offset = Vec2::ZERO;
                    let mut curr_offset = Vec2::ZERO;
                    let mut prev_weight = 0.0;
                    let mut curr_weight = 0.0;
                    let mut score = 0.0;
                    let mut total = 0.0;

                    for (nc, nr) in neighbours(col, row, cols, rows) {
                        let n = &snapshot[(nr * cols + nc) as usize];
                        if n.source == BlockSource::Fallback {
                            continue;
                        }
                        let w = n.score.max(f32::EPSILON);
                        let n_center = field.block_center(nc, nr);
                        prev_offset += (n.prev_sample - n_center) * w;
                        curr_offset += (n.curr_sample - n_center) * w;
                        prev_weight += n.prev_weight * w;
                        curr_weight += n.curr_weight * w;
                        score += n.score * w;
                        total += w;
                    }

                    if total <= 0.0 {
                        continue;
                    }

                    let center = field.block_center(col, row);
                    blocks[i] = BlockWarp {
                        prev_sample: (center + prev_offset / total).clamp(Vec2::ZERO, max),
                        curr_sample: (center + curr_offset / total).clamp(Vec2::ZERO, max),
                        prev_weight: prev_weight / total,
                        curr_weight: curr_weight / total,
                        source: BlockSource::Filled,
                        score: (score / total).clamp(0.0, 1.0),
                    };
                    filled_any = true;
                }
            }

            if !filled_any {
                break;
            }
        }
    }
}

fn neighbours(col: u32, row: u32, cols: u32, rows: u32) -> impl Iterator<Item = (u32, u32)> {
    let (col, row) = (col as i64, row as i64);
    (-1i64..=1)
        .flat_map(move |dr| (-1i64..=1).map(move |dc| (col + dc, row + dr)))
        .filter(move |&(c, r)| {
            (c, r) != (col, row) && c >= 0 && r >= 0 && c < cols as i64 && r < rows as i64
        })
        .map(|(c, r)| (c as u32, r as u32))
}
