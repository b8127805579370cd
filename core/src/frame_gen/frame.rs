//! Real and history frames.

use nvvk_shared::{FrameId, ImageHandle, NvvkError, NvvkResult};

use super::motion::MotionField;

/// Number of bins in [`ColorStats::histogram`].
pub const HISTOGRAM_BINS: usize = 16;

/// Coarse colour statistics of a frame, supplied by the caller.
///
/// The engine never reads pixels, so the renderer provides a downsampled luma
/// histogram (usually from a reduction pass it already runs for exposure).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStats {
    /// Normalized luma histogram, sums to 1
    pub histogram: [f32; HISTOGRAM_BINS],
    /// Mean luma in [0, 1]
    pub mean_luma: f32,
}

impl ColorStats {
    /// Build from raw bin counts.
    pub fn from_counts(counts: [u32; HISTOGRAM_BINS]) -> NvvkResult<Self> {
        let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        if total == 0 {
            return Err(NvvkError::invalid_usage("colour histogram is empty"));
        }

        let mut histogram = [0.0; HISTOGRAM_BINS];
        let mut mean = 0.0;
        for (i, &count) in counts.iter().enumerate() {
            let share = count as f32 / total as f32;
            histogram[i] = share;
            mean += share * (i as f32 + 0.5) / HISTOGRAM_BINS as f32;
        }

        Ok(Self {
            histogram,
            mean_luma: mean,
        })
    }

    /// Build from 8-bit luma samples.
    pub fn from_luma(samples: &[u8]) -> NvvkResult<Self> {
        let mut counts = [0u32; HISTOGRAM_BINS];
        for &s in samples {
            counts[usize::from(s) * HISTOGRAM_BINS / 256] += 1;
        }
        Self::from_counts(counts)
    }

    /// Half the L1 distance between the two histograms, in [0, 1].
    pub fn histogram_delta(&self, other: &ColorStats) -> f32 {
        let l1: f32 = self
            .histogram
            .iter()
            .zip(other.histogram.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        (0.5 * l1).clamp(0.0, 1.0)
    }
}

/// A rendered frame handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealFrame {
    pub image: ImageHandle,
    /// Render completion time; the context clock is read when absent
    pub timestamp_us: Option<u64>,
    pub color: Option<ColorStats>,
}

impl RealFrame {
    pub fn new(image: ImageHandle) -> Self {
        Self {
            image,
            timestamp_us: None,
            color: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = Some(timestamp_us);
        self
    }

    pub fn with_color_stats(mut self, color: ColorStats) -> Self {
        self.color = Some(color);
        self
    }
}

/// A frame as held by the history buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub timestamp_us: u64,
    /// Borrowed colour image; the engine never owns real frame images
    pub image: ImageHandle,
    pub color: Option<ColorStats>,
    /// Field between this frame and its predecessor, while the pair is newest
    pub motion: Option<MotionField>,
    pub is_generated: bool,
}

impl Frame {
    /// Real frame before the sequencer has assigned its id.
    pub fn real(image: ImageHandle, timestamp_us: u64, color: Option<ColorStats>) -> Self {
        Self {
            id: 0,
            timestamp_us,
            image,
            color,
            motion: None,
            is_generated: false,
        }
    }
}
