//! Motion fields and the motion estimation port.
//!
//! A [`MotionField`] is a grid of blocks, each carrying the displacement (in
//! pixels) of its content from the previous frame to the current one, the
//! estimator's confidence in that vector, an occlusion bit and the local
//! colour delta after compensation. Backward vectors (current to previous) are
//! optional; when absent the negated forward vector stands in.

use glam::Vec2;
use nvvk_shared::{NvvkError, NvvkResult};

use super::frame::Frame;
use crate::error::DeviceError;

/// Hardware optical flow, as seen by the engine.
pub trait MotionEstimator: Send + Sync {
    /// Estimate the field from `prev` to `curr`.
    ///
    /// `NotSupported` is permanent for the calling context.
    fn estimate(&self, prev: &Frame, curr: &Frame) -> Result<MotionField, DeviceError>;
}

/// One block of a motion field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionBlock {
    /// Forward displacement in pixels
    pub vector: Vec2,
    /// Estimator confidence in [0, 1]
    pub confidence: f32,
    /// Content disappears between the two frames
    pub occluded: bool,
    /// Residual colour difference after motion compensation, in [0, 1]
    pub color_delta: f32,
}

impl MotionBlock {
    pub const STILL: Self = Self {
        vector: Vec2::ZERO,
        confidence: 1.0,
        occluded: false,
        color_delta: 0.0,
    };
}

/// Grid dimensions for a `width` x `height` frame with square blocks.
pub fn grid_dims(width: u32, height: u32, block_size: u32) -> (u32, u32) {
    (width.div_ceil(block_size), height.div_ceil(block_size))
}

/// Per-block displacement vectors plus the confidence/occlusion mask.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionField {
    width: u32,
    height: u32,
    block_size: u32,
    cols: u32,
    rows: u32,
    blocks: Vec<MotionBlock>,
    backward: Option<Vec<Vec2>>,
}

impl MotionField {
    /// A field of still, fully confident blocks.
    pub fn still(width: u32, height: u32, block_size: u32) -> NvvkResult<Self> {
        let (cols, rows) = Self::validate_geometry(width, height, block_size)?;
        let count = (cols as usize) * (rows as usize);

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(count)
            .map_err(|_| NvvkError::OutOfMemory(format!("motion field of {count} blocks")))?;
        blocks.resize(count, MotionBlock::STILL);

        Ok(Self {
            width,
            height,
            block_size,
            cols,
            rows,
            blocks,
            backward: None,
        })
    }

    /// Wrap blocks produced by an estimator, in row-major order.
    pub fn from_blocks(
        width: u32,
        height: u32,
        block_size: u32,
        blocks: Vec<MotionBlock>,
    ) -> NvvkResult<Self> {
        let (cols, rows) = Self::validate_geometry(width, height, block_size)?;
        let expected = (cols as usize) * (rows as usize);
        if blocks.len() != expected {
            return Err(NvvkError::invalid_usage(format!(
                "motion field has {} blocks, expected {expected}",
                blocks.len()
            )));
        }

        Ok(Self {
            width,
            height,
            block_size,
            cols,
            rows,
            blocks,
            backward: None,
        })
    }

    /// Attach explicit backward vectors, in row-major order.
    pub fn with_backward(mut self, backward: Vec<Vec2>) -> NvvkResult<Self> {
        if backward.len() != self.blocks.len() {
            return Err(NvvkError::invalid_usage(format!(
                "backward field has {} blocks, expected {}",
                backward.len(),
                self.blocks.len()
            )));
        }
        self.backward = Some(backward);
        Ok(self)
    }

    fn validate_geometry(width: u32, height: u32, block_size: u32) -> NvvkResult<(u32, u32)> {
        if width == 0 || height == 0 {
            return Err(NvvkError::invalid_usage("motion field has zero extent"));
        }
        if block_size == 0 {
            return Err(NvvkError::invalid_usage("motion field block size is zero"));
        }
        Ok(grid_dims(width, height, block_size))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// (columns, rows)
    pub fn grid(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[MotionBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [MotionBlock] {
        &mut self.blocks
    }

    pub fn has_backward(&self) -> bool {
        self.backward.is_some()
    }

    fn index(&self, col: u32, row: u32) -> usize {
        (row as usize) * (self.cols as usize) + col as usize
    }

    pub fn block(&self, col: u32, row: u32) -> &MotionBlock {
        &self.blocks[self.index(col, row)]
    }

    /// Backward displacement (current to previous) of a block.
    pub fn backward(&self, col: u32, row: u32) -> Vec2 {
        let i = self.index(col, row);
        match &self.backward {
            Some(backward) => backward[i],
            None => -self.blocks[i].vector,
        }
    }

    /// Pixel centre of a block. Edge blocks are clipped to the frame first.
    pub fn block_center(&self, col: u32, row: u32) -> Vec2 {
        let x0 = col * self.block_size;
        let y0 = row * self.block_size;
        let x1 = (x0 + self.block_size).min(self.width);
        let y1 = (y0 + self.block_size).min(self.height);
        Vec2::new((x0 + x1) as f32 * 0.5, (y0 + y1) as f32 * 0.5)
    }

    pub fn in_bounds(&self, pos: Vec2) -> bool {
        pos.x >= 0.0 && pos.y >= 0.0 && pos.x < self.width as f32 && pos.y < self.height as f32
    }

    /// Block containing pixel position `pos`, if inside the frame.
    pub fn block_at(&self, pos: Vec2) -> Option<(u32, u32)> {
        if !self.in_bounds(pos) {
            return None;
        }
        let col = (pos.x as u32 / self.block_size).min(self.cols - 1);
        let row = (pos.y as u32 / self.block_size).min(self.rows - 1);
        Some((col, row))
    }

    /// Frame diagonal in pixels.
    pub fn diagonal(&self) -> f32 {
        Vec2::new(self.width as f32, self.height as f32).length()
    }
}
