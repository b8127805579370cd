//! Shared test utilities for integration and unit tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nvvk_shared::ImageHandle;

use crate::clock::Clock;
use crate::error::DeviceError;
use crate::frame_gen::{FrameCompositor, RealFrame, WarpPlan};

// ============================================================================
// Manual clock
// ============================================================================

/// Clock that only moves when told to. Sleeping jumps straight to the deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now: AtomicU64::new(start_us),
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::AcqRel);
    }

    pub fn set(&self, us: u64) {
        self.now.store(us, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn sleep_until(&self, deadline_us: u64) {
        self.now.fetch_max(deadline_us, Ordering::AcqRel);
    }
}

// ============================================================================
// Recording compositor
// ============================================================================

/// Compositor that records its targets and can be told to fail.
#[derive(Default)]
pub struct RecordingCompositor {
    targets: Mutex<Vec<ImageHandle>>,
    failure: Mutex<Option<DeviceError>>,
    cost: Option<(Arc<ManualClock>, u64)>,
}

impl RecordingCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each composition advances `clock` by `cost_us`.
    pub fn with_cost(clock: Arc<ManualClock>, cost_us: u64) -> Self {
        Self {
            cost: Some((clock, cost_us)),
            ..Self::default()
        }
    }

    pub fn fail_with(&self, err: DeviceError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn targets(&self) -> Vec<ImageHandle> {
        self.targets.lock().unwrap().clone()
    }
}

impl FrameCompositor for RecordingCompositor {
    fn compose(
        &self,
        _plan: &WarpPlan,
        _prev: ImageHandle,
        _curr: ImageHandle,
        target: ImageHandle,
    ) -> Result<(), DeviceError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some((clock, cost_us)) = &self.cost {
            clock.advance(*cost_us);
        }
        self.targets.lock().unwrap().push(target);
        Ok(())
    }
}

// ============================================================================
// Frames
// ============================================================================

/// A real frame with a distinct image handle per `image_id`.
pub fn real_frame(image_id: u64, timestamp_us: u64) -> RealFrame {
    RealFrame::new(ImageHandle::new(image_id, image_id + 0x1_0000)).with_timestamp(timestamp_us)
}
