//! Frame generation engine.
//!
//! A [`FrameGenContext`] is created per render target. Each call to
//! [`FrameGenContext::submit_frame`] runs one interval: estimate motion between
//! the two newest real frames, gate on scene changes, interpolate, then hand
//! back the frames to present in order with their ids assigned.
//!
//! Mode and the enabled flag live in state shared with [`FrameGenHandle`] so
//! other threads can flip them; both are latched once at the start of each
//! interval. Stats are behind a mutex and read by copy.

mod frame;
mod history;
mod interpolate;
mod motion;
mod scene;
mod sequencer;
mod stats;

pub use frame::{ColorStats, Frame, HISTOGRAM_BINS, RealFrame};
pub use history::FrameHistoryBuffer;
pub use interpolate::{
    BlockSource, BlockWarp, FrameCompositor, GeneratedFrame, Interpolator, WarpPlan,
};
pub use motion::{MotionBlock, MotionEstimator, MotionField, grid_dims};
pub use scene::{SceneChangeDetector, SceneClass, SceneVerdict};
pub use sequencer::{
    FrameIdSource, IntervalIds, IntervalOutcome, IntervalPresentation, PresentationSequencer,
    PresentedFrame, PresentedKind, SkipReason,
};
pub use stats::{FrameGenStats, StatsAggregator};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nvvk_shared::{
    FrameGenMode, FrameId, ImageHandle, NvvkError, NvvkResult, OPTICAL_FLOW_EXTENSION_NAME,
};

use crate::clock::Clock;
use crate::config::{FrameGenConfig, NvvkConfig};
use crate::device::{Capability, Device, SupportLatch};
use crate::error::DeviceError;

// ============================================================================
// Shared state
// ============================================================================

struct Shared {
    mode: AtomicU32,
    enabled: AtomicBool,
    /// Optical flow still usable; cleared permanently on `NotSupported`
    supported: AtomicBool,
    lost: AtomicBool,
    current_id: AtomicU64,
    /// History holds a frame, so the next submit closes an interval
    primed: AtomicBool,
    last_interval_generated: AtomicBool,
    hold_back_compensation: bool,
    stats: Mutex<StatsAggregator>,
    ids: Arc<FrameIdSource>,
}

impl Shared {
    fn mode(&self) -> FrameGenMode {
        FrameGenMode::from_raw(self.mode.load(Ordering::Acquire)).unwrap_or(FrameGenMode::Off)
    }

    fn stats(&self) -> MutexGuard<'_, StatsAggregator> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generating(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
            && self.mode().is_active()
            && self.supported.load(Ordering::Acquire)
            && !self.lost.load(Ordering::Acquire)
    }

    fn latency_compensation_us(&self) -> u64 {
        if !self.generating() {
            return 0;
        }
        let stats = self.stats().snapshot();
        let hold_back = if self.hold_back_compensation {
            stats.avg_real_interval_us / 2
        } else {
            0
        };
        stats.avg_gen_time_us + hold_back
    }
}

/// Cloneable control and query handle for a [`FrameGenContext`].
///
/// Safe to use from any thread; the context picks up changes at the start of
/// its next interval.
#[derive(Clone)]
pub struct FrameGenHandle {
    shared: Arc<Shared>,
}

impl FrameGenHandle {
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn set_mode(&self, mode: FrameGenMode) {
        self.shared.mode.store(mode.as_raw(), Ordering::Release);
    }

    pub fn mode(&self) -> FrameGenMode {
        self.shared.mode()
    }

    /// Stats copy. Reading clears `scene_change_detected`.
    pub fn stats(&self) -> FrameGenStats {
        self.shared.stats().read()
    }

    /// Extra latency introduced by frame generation, 0 when it is inactive.
    pub fn latency_compensation_us(&self) -> u64 {
        self.shared.latency_compensation_us()
    }

    pub fn current_frame_id(&self) -> FrameId {
        self.shared.current_id.load(Ordering::Acquire)
    }

    /// Whether the most recent interval presented a generated frame.
    pub fn last_interval_generated(&self) -> bool {
        self.shared.last_interval_generated.load(Ordering::Acquire)
    }

    /// Whether the next submitted frame is expected to be preceded by a
    /// generated one. Scene changes and low confidence can still skip it.
    pub fn expects_generated(&self) -> bool {
        self.shared.generating() && self.shared.primed.load(Ordering::Acquire)
    }

    /// Id source the context assigns presented ids from.
    pub fn frame_ids(&self) -> Arc<FrameIdSource> {
        self.shared.ids.clone()
    }
}

// ============================================================================
// Output targets
// ============================================================================

/// Two engine-owned images, alternated between generated frames so the
/// compositor never writes the image the presentation engine is reading.
struct OutputTargets {
    device: Arc<dyn Device>,
    images: [ImageHandle; 2],
    next: usize,
}

impl OutputTargets {
    fn create(device: Arc<dyn Device>, width: u32, height: u32) -> NvvkResult<Self> {
        let first = device
            .create_image(width, height)
            .map_err(|e| output_alloc_error(e, width, height))?;
        let second = match device.create_image(width, height) {
            Ok(image) => image,
            Err(e) => {
                device.destroy_image(first);
                return Err(output_alloc_error(e, width, height));
            }
        };

        Ok(Self {
            device,
            images: [first, second],
            next: 0,
        })
    }

    fn peek(&self) -> ImageHandle {
        self.images[self.next]
    }

    fn advance(&mut self) {
        self.next = 1 - self.next;
    }
}

impl Drop for OutputTargets {
    fn drop(&mut self) {
        for image in self.images {
            self.device.destroy_image(image);
        }
    }
}

fn output_alloc_error(err: DeviceError, width: u32, height: u32) -> NvvkError {
    match err {
        DeviceError::OutOfMemory => {
            NvvkError::OutOfMemory(format!("output target {width}x{height}"))
        }
        other => other.into(),
    }
}

// ============================================================================
// Context
// ============================================================================

struct IntervalResult {
    outcome: IntervalOutcome,
    generated: Option<GeneratedFrame>,
    field: Option<MotionField>,
    unsupported: Option<NvvkError>,
}

impl IntervalResult {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: IntervalOutcome::Skipped(reason),
            generated: None,
            field: None,
            unsupported: None,
        }
    }
}

/// Frame generation state for one render target.
pub struct FrameGenContext {
    shared: Arc<Shared>,
    estimator: Capability<Arc<dyn MotionEstimator>>,
    compositor: Arc<dyn FrameCompositor>,
    device: Arc<dyn Device>,
    clock: Arc<dyn Clock>,
    history: FrameHistoryBuffer,
    detector: SceneChangeDetector,
    interpolator: Interpolator,
    sequencer: PresentationSequencer,
    targets: OutputTargets,
    unsupported: SupportLatch,
    width: u32,
    height: u32,
    temporal_position: f32,
    budget_overrun_logged: bool,
}

impl FrameGenContext {
    /// Create a context with default tunables.
    pub fn init(
        device: Arc<dyn Device>,
        width: u32,
        height: u32,
        mode: FrameGenMode,
    ) -> NvvkResult<Self> {
        Self::with_config(device, width, height, mode, &NvvkConfig::default())
    }

    pub fn with_config(
        device: Arc<dyn Device>,
        width: u32,
        height: u32,
        mode: FrameGenMode,
        config: &NvvkConfig,
    ) -> NvvkResult<Self> {
        if width == 0 || height == 0 {
            return Err(NvvkError::invalid_usage(format!(
                "frame generation target {width}x{height} has zero extent"
            )));
        }

        let estimator: Capability<Arc<dyn MotionEstimator>> =
            device.optical_flow(width, height).into();
        if !estimator.is_available() {
            tracing::warn!(
                "{} unavailable, frame generation will pass frames through",
                OPTICAL_FLOW_EXTENSION_NAME
            );
        }

        let targets = OutputTargets::create(device.clone(), width, height)?;
        let clock = device.clock();
        let fg: &FrameGenConfig = &config.frame_gen;

        let ids = Arc::new(FrameIdSource::new());
        let shared = Arc::new(Shared {
            mode: AtomicU32::new(mode.as_raw()),
            enabled: AtomicBool::new(true),
            supported: AtomicBool::new(estimator.is_available()),
            lost: AtomicBool::new(false),
            current_id: AtomicU64::new(0),
            primed: AtomicBool::new(false),
            last_interval_generated: AtomicBool::new(false),
            hold_back_compensation: fg.hold_back_compensation,
            stats: Mutex::new(StatsAggregator::new(fg.ema_alpha)),
            ids: ids.clone(),
        });

        tracing::info!(
            "Frame generation context created: {}x{} mode={} optical_flow={:?}",
            width,
            height,
            mode,
            estimator
        );

        Ok(Self {
            shared,
            estimator,
            compositor: device.compositor(),
            interpolator: Interpolator::new(config.interpolation.clone(), clock.clone()),
            detector: SceneChangeDetector::new(config.scene_change.clone()),
            device,
            clock,
            history: FrameHistoryBuffer::new(),
            sequencer: PresentationSequencer::with_ids(ids),
            targets,
            unsupported: SupportLatch::new(),
            width,
            height,
            temporal_position: fg.temporal_position.clamp(0.05, 0.95),
            budget_overrun_logged: false,
        })
    }

    /// Release the context and its output targets.
    pub fn destroy(self) {
        tracing::info!(
            "Frame generation context destroyed after {} frames",
            self.sequencer.current_id()
        );
    }

    pub fn handle(&self) -> FrameGenHandle {
        FrameGenHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.handle().set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn set_mode(&self, mode: FrameGenMode) {
        self.handle().set_mode(mode);
    }

    pub fn mode(&self) -> FrameGenMode {
        self.shared.mode()
    }

    /// Whether optical flow is still usable by this context.
    pub fn is_supported(&self) -> bool {
        self.shared.supported.load(Ordering::Acquire)
    }

    pub fn get_stats(&self) -> FrameGenStats {
        self.shared.stats().read()
    }

    pub fn get_latency_compensation(&self) -> u64 {
        self.shared.latency_compensation_us()
    }

    pub fn get_current_frame_id(&self) -> FrameId {
        self.shared.current_id.load(Ordering::Acquire)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn history(&self) -> &FrameHistoryBuffer {
        &self.history
    }

    fn ensure_alive(&self) -> NvvkResult<()> {
        if self.shared.lost.load(Ordering::Acquire) {
            return Err(NvvkError::DeviceLost);
        }
        Ok(())
    }

    fn mark_lost(&self) -> NvvkError {
        if !self.shared.lost.swap(true, Ordering::AcqRel) {
            tracing::warn!("Device lost, frame generation context is now terminal");
        }
        NvvkError::DeviceLost
    }

    fn check(&self, err: NvvkError) -> NvvkError {
        if err.is_device_lost() {
            self.mark_lost()
        } else {
            err
        }
    }

    /// Drop history so the next frame starts a fresh pair. Ids keep counting.
    pub fn reset(&mut self) -> NvvkResult<()> {
        self.ensure_alive()?;
        self.history.reset();
        self.shared.primed.store(false, Ordering::Release);
        self.shared.stats().restart_timeline();
        tracing::debug!("Frame generation history reset");
        Ok(())
    }

    /// Recreate output targets for a new swapchain extent.
    ///
    /// On failure the old targets and extent are kept.
    pub fn resize(&mut self, width: u32, height: u32) -> NvvkResult<()> {
        self.ensure_alive()?;
        if width == 0 || height == 0 {
            return Err(NvvkError::invalid_usage(format!(
                "frame generation target {width}x{height} has zero extent"
            )));
        }

        let targets = OutputTargets::create(self.device.clone(), width, height)
            .map_err(|e| self.check(e))?;
        self.targets = targets;
        if self.is_supported() {
            self.estimator = self.device.optical_flow(width, height).into();
            if !self.estimator.is_available() {
                self.shared.supported.store(false, Ordering::Release);
            }
        }
        self.width = width;
        self.height = height;
        self.history.reset();
        self.shared.primed.store(false, Ordering::Release);
        self.shared.stats().restart_timeline();
        tracing::info!("Frame generation targets resized to {}x{}", width, height);
        Ok(())
    }

    /// Submit the next real frame and get back what to present, in order.
    pub fn submit_frame(&mut self, frame: RealFrame) -> NvvkResult<IntervalPresentation> {
        self.ensure_alive()?;
        if frame.image.is_null() {
            return Err(NvvkError::invalid_usage("real frame has a null image"));
        }

        let timestamp_us = frame.timestamp_us.unwrap_or_else(|| self.clock.now_us());
        if let Some(newest) = self.history.newest()
            && timestamp_us < newest.timestamp_us
        {
            return Err(NvvkError::invalid_usage(format!(
                "frame timestamp {timestamp_us} precedes previous frame at {}",
                newest.timestamp_us
            )));
        }

        let mut curr = Frame::real(frame.image, timestamp_us, frame.color);
        let mode = self.shared.mode();
        let enabled = self.shared.enabled.load(Ordering::Acquire);

        let result = match self.history.newest() {
            None => IntervalResult {
                outcome: IntervalOutcome::FirstFrame,
                generated: None,
                field: None,
                unsupported: None,
            },
            Some(prev) => self.run_interval(prev, &curr, mode, enabled)?,
        };

        // Commit. Nothing below can fail, so errors above leave state unchanged.
        {
            let mut stats = self.shared.stats();
            stats.record_real(timestamp_us);
            if let Some(g) = &result.generated {
                stats.record_generation(g.generation_time_us, g.confidence, g.over_budget);
            }
            match result.outcome {
                IntervalOutcome::Generated => stats.record_presented(),
                IntervalOutcome::Skipped(SkipReason::SceneChange) => stats.record_scene_change(),
                IntervalOutcome::Skipped(SkipReason::LowConfidence) => {
                    stats.record_low_confidence()
                }
                IntervalOutcome::Skipped(SkipReason::Discarded) => stats.record_discarded(),
                _ => {}
            }
        }

        if let Some(g) = &result.generated
            && g.over_budget
            && !self.budget_overrun_logged
        {
            tracing::warn!(
                "Frame generation took {}us, over the {}us {} budget",
                g.generation_time_us,
                self.interpolator.budget_us(g.mode),
                g.mode
            );
            self.budget_overrun_logged = true;
        }

        let generated_presented = result.outcome == IntervalOutcome::Generated;
        if generated_presented {
            self.targets.advance();
        }

        curr.motion = result.field;
        let real_image = curr.image;
        self.history.push(curr);

        self.shared.primed.store(true, Ordering::Release);

        let mut presentation =
            self.sequencer
                .sequence(real_image, timestamp_us, result.outcome, result.generated);
        presentation.unsupported = result.unsupported;
        if let Some(newest) = self.history.newest_mut() {
            newest.id = presentation.real().id;
        }

        self.shared
            .current_id
            .store(presentation.real().id, Ordering::Release);
        self.shared
            .last_interval_generated
            .store(generated_presented, Ordering::Release);

        tracing::trace!(
            "Interval {:?}: presented {:?}",
            presentation.outcome,
            presentation.frames().iter().map(|f| f.id).collect::<Vec<_>>()
        );
        Ok(presentation)
    }

    fn run_interval(
        &self,
        prev: &Frame,
        curr: &Frame,
        mode: FrameGenMode,
        enabled: bool,
    ) -> NvvkResult<IntervalResult> {
        if !enabled {
            return Ok(IntervalResult::skipped(SkipReason::Disabled));
        }
        if !mode.is_active() {
            return Ok(IntervalResult::skipped(SkipReason::ModeOff));
        }

        let estimator = match self.estimator.get() {
            Some(estimator) if self.is_supported() => estimator,
            _ => return Ok(self.unsupported(OPTICAL_FLOW_EXTENSION_NAME)),
        };

        let field = match estimator.estimate(prev, curr) {
            Ok(field) => field,
            Err(DeviceError::NotSupported(what)) => {
                self.shared.supported.store(false, Ordering::Release);
                return Ok(self.unsupported(&what));
            }
            Err(DeviceError::DeviceLost) => return Err(self.mark_lost()),
            Err(other) => return Err(other.into()),
        };
        if field.width() != self.width || field.height() != self.height {
            return Err(NvvkError::Unknown(format!(
                "motion field is {}x{}, expected {}x{}",
                field.width(),
                field.height(),
                self.width,
                self.height
            )));
        }

        let verdict = self.detector.classify(&field, prev, curr, mode);
        if verdict.is_scene_change() {
            tracing::debug!(
                "Scene change: {:.0}% blocks disagree, histogram delta {:?}",
                verdict.disagreeing_fraction * 100.0,
                verdict.histogram_delta
            );
            return Ok(IntervalResult {
                field: Some(field),
                ..IntervalResult::skipped(SkipReason::SceneChange)
            });
        }

        let generated = self
            .interpolator
            .generate(
                prev,
                curr,
                &field,
                mode,
                self.temporal_position,
                self.targets.peek(),
                self.sequencer.next_id(),
                self.compositor.as_ref(),
            )
            .map_err(|e| self.check(e))?;

        // set_enabled(false) may have landed while generating
        if !self.shared.enabled.load(Ordering::Acquire) {
            tracing::debug!("Frame generation disabled mid-interval, discarding result");
            return Ok(IntervalResult {
                field: Some(field),
                ..IntervalResult::skipped(SkipReason::Discarded)
            });
        }

        let outcome = if generated.should_present {
            IntervalOutcome::Generated
        } else {
            IntervalOutcome::Skipped(SkipReason::LowConfidence)
        };

        Ok(IntervalResult {
            outcome,
            generated: Some(generated),
            field: Some(field),
            unsupported: None,
        })
    }

    /// Pass-through interval. The first one carries `NotSupported`.
    fn unsupported(&self, what: &str) -> IntervalResult {
        IntervalResult {
            unsupported: self.unsupported.surface(what).err(),
            ..IntervalResult::skipped(SkipReason::Unsupported)
        }
    }
}
