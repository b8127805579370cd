//! Software device.
//!
//! `HeadlessDevice` implements every capability on the CPU so the engine can
//! run without a GPU: the CLI's `simulate` command and the test suite both
//! drive it. Optical flow is synthesized deterministically from a seed and
//! the frame timestamps, the compositor only records what it was asked to
//! write, and each capability can be switched off to exercise pass-through.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glam::Vec2;
use hashbrown::HashMap;
use nvvk_shared::{
    CommandBufferHandle, DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME, DeviceHandle, FrameId,
    ImageHandle, LOW_LATENCY_EXTENSION_NAME, LatencyMarker, NVIDIA_VENDOR_ID,
    OPTICAL_FLOW_EXTENSION_NAME, QueueHandle, SemaphoreHandle, SwapchainHandle,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::{Device, SemaphoreSignaler};
use crate::clock::{Clock, SystemClock};
use crate::diagnostics::{CheckpointDriver, DriverCheckpoint, PipelineStage};
use crate::error::DeviceError;
use crate::frame_gen::{
    Frame, FrameCompositor, MotionBlock, MotionEstimator, MotionField, WarpPlan,
};
use crate::low_latency::{DriverTimings, LatencyDriver, SleepMode};

/// Driver timing rows retained by the headless low-latency driver.
const DRIVER_TIMING_ROWS: usize = 64;

/// Shape of the synthetic motion field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticMotion {
    /// Global pan in pixels per real frame
    pub pan: Vec2,
    /// Per-block jitter amplitude in pixels
    pub noise: f32,
    /// Probability that a block is marked occluded
    pub occlusion_rate: f32,
}

impl Default for SyntheticMotion {
    fn default() -> Self {
        Self {
            pan: Vec2::new(2.0, 0.0),
            noise: 0.25,
            occlusion_rate: 0.02,
        }
    }
}

/// Capabilities and behaviour of a [`HeadlessDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessConfig {
    pub optical_flow: bool,
    pub low_latency: bool,
    pub checkpoints: bool,
    pub vendor_id: u32,
    /// Motion field block size in pixels
    pub block_size: u32,
    pub motion: SyntheticMotion,
    pub seed: u64,
    /// Simulated GPU time per composition
    pub compose_cost_us: u64,
    /// Maximum live images; allocation beyond it reports out of memory
    pub image_budget: Option<usize>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            optical_flow: true,
            low_latency: true,
            checkpoints: true,
            vendor_id: NVIDIA_VENDOR_ID,
            block_size: 8,
            motion: SyntheticMotion::default(),
            seed: 0x6e76_766b,
            compose_cost_us: 0,
            image_budget: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct HeadlessState {
    lost: AtomicBool,
    next_image: AtomicU64,
    live_images: AtomicUsize,
    compositions: AtomicU64,
    composed_targets: Mutex<Vec<ImageHandle>>,
    signals: Mutex<Vec<(SemaphoreHandle, u64, u64)>>,
    sleep_modes: Mutex<Vec<SleepMode>>,
    markers: Mutex<Vec<(FrameId, LatencyMarker, u64)>>,
    checkpoints: Mutex<HashMap<CommandBufferHandle, Vec<u64>>>,
}

impl HeadlessState {
    fn check(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(DeviceError::DeviceLost);
        }
        Ok(())
    }
}

/// CPU-only [`Device`].
pub struct HeadlessDevice {
    config: HeadlessConfig,
    clock: Arc<dyn Clock>,
    state: Arc<HeadlessState>,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: HeadlessConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Arc::new(HeadlessState {
                next_image: AtomicU64::new(0x1000),
                ..HeadlessState::default()
            }),
        }
    }

    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    /// Simulate `VK_ERROR_DEVICE_LOST` on every later call.
    pub fn lose_device(&self) {
        self.state.lost.store(true, Ordering::Release);
    }

    pub fn is_lost(&self) -> bool {
        self.state.lost.load(Ordering::Acquire)
    }

    pub fn live_images(&self) -> usize {
        self.state.live_images.load(Ordering::Acquire)
    }

    pub fn compositions(&self) -> u64 {
        self.state.compositions.load(Ordering::Acquire)
    }

    pub fn composed_targets(&self) -> Vec<ImageHandle> {
        lock(&self.state.composed_targets).clone()
    }

    /// (semaphore, value, time signaled)
    pub fn signals(&self) -> Vec<(SemaphoreHandle, u64, u64)> {
        lock(&self.state.signals).clone()
    }

    pub fn sleep_modes(&self) -> Vec<SleepMode> {
        lock(&self.state.sleep_modes).clone()
    }

    /// Markers forwarded to the low-latency driver, in order.
    pub fn driver_markers(&self) -> Vec<(FrameId, LatencyMarker)> {
        lock(&self.state.markers)
            .iter()
            .map(|&(id, marker, _)| (id, marker))
            .collect()
    }
}

impl Device for HeadlessDevice {
    fn handle(&self) -> DeviceHandle {
        DeviceHandle::from_raw(0x00de_71ce)
    }

    fn vendor_id(&self) -> u32 {
        self.config.vendor_id
    }

    fn supports_extension(&self, name: &str) -> bool {
        match name {
            OPTICAL_FLOW_EXTENSION_NAME => self.config.optical_flow,
            LOW_LATENCY_EXTENSION_NAME => self.config.low_latency,
            DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME => self.config.checkpoints,
            _ => false,
        }
    }

    fn optical_flow(&self, width: u32, height: u32) -> Option<Arc<dyn MotionEstimator>> {
        if !self.config.optical_flow {
            return None;
        }
        Some(Arc::new(SyntheticFlow {
            width,
            height,
            block_size: self.config.block_size.max(1),
            motion: self.config.motion,
            seed: self.config.seed,
            state: self.state.clone(),
        }))
    }

    fn compositor(&self) -> Arc<dyn FrameCompositor> {
        Arc::new(RecordingCompositor {
            cost_us: self.config.compose_cost_us,
            clock: self.clock.clone(),
            state: self.state.clone(),
        })
    }

    fn low_latency(&self, swapchain: SwapchainHandle) -> Option<Arc<dyn LatencyDriver>> {
        if !self.config.low_latency || swapchain.is_null() {
            return None;
        }
        Some(Arc::new(HeadlessLatencyDriver {
            clock: self.clock.clone(),
            state: self.state.clone(),
        }))
    }

    fn checkpoints(&self) -> Option<Arc<dyn CheckpointDriver>> {
        if !self.config.checkpoints {
            return None;
        }
        Some(Arc::new(HeadlessCheckpoints {
            state: self.state.clone(),
        }))
    }

    fn semaphores(&self) -> Arc<dyn SemaphoreSignaler> {
        Arc::new(HeadlessSemaphores {
            clock: self.clock.clone(),
            state: self.state.clone(),
        })
    }

    fn create_image(&self, width: u32, height: u32) -> Result<ImageHandle, DeviceError> {
        self.state.check()?;
        if width == 0 || height == 0 {
            return Err(DeviceError::Other(format!("image extent {width}x{height}")));
        }
        if let Some(budget) = self.config.image_budget
            && self.live_images() >= budget
        {
            return Err(DeviceError::OutOfMemory);
        }

        let raw = self.state.next_image.fetch_add(2, Ordering::AcqRel);
        self.state.live_images.fetch_add(1, Ordering::AcqRel);
        Ok(ImageHandle::new(raw, raw + 1))
    }

    fn destroy_image(&self, image: ImageHandle) {
        if image.is_null() {
            return;
        }
        let _ = self
            .state
            .live_images
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}

// ============================================================================
// Capabilities
// ============================================================================

struct SyntheticFlow {
    width: u32,
    height: u32,
    block_size: u32,
    motion: SyntheticMotion,
    seed: u64,
    state: Arc<HeadlessState>,
}

impl MotionEstimator for SyntheticFlow {
    fn estimate(&self, prev: &Frame, curr: &Frame) -> Result<MotionField, DeviceError> {
        self.state.check()?;

        let mut rng = Pcg32::seed_from_u64(
            self.seed ^ prev.timestamp_us.rotate_left(21) ^ curr.timestamp_us,
        );
        // a cut shows up as residual colour error everywhere
        let cut = match (&prev.color, &curr.color) {
            (Some(a), Some(b)) => a.histogram_delta(b),
            _ => 0.0,
        };

        let mut field = MotionField::still(self.width, self.height, self.block_size)
            .map_err(|_| DeviceError::OutOfMemory)?;
        let noise = self.motion.noise.abs();
        for block in field.blocks_mut() {
            let jitter = Vec2::new(
                rng.random_range(-noise..=noise),
                rng.random_range(-noise..=noise),
            );
            *block = MotionBlock {
                vector: self.motion.pan + jitter,
                confidence: ((1.0 - cut) * rng.random_range(0.85..=1.0)).clamp(0.0, 1.0),
                occluded: rng.random::<f32>() < self.motion.occlusion_rate,
                color_delta: (cut + rng.random_range(0.0..0.05)).min(1.0),
            };
        }
        Ok(field)
    }
}

struct RecordingCompositor {
    cost_us: u64,
    clock: Arc<dyn Clock>,
    state: Arc<HeadlessState>,
}

impl FrameCompositor for RecordingCompositor {
    fn compose(
        &self,
        plan: &WarpPlan,
        _prev: ImageHandle,
        _curr: ImageHandle,
        target: ImageHandle,
    ) -> Result<(), DeviceError> {
        self.state.check()?;
        if plan.blocks.is_empty() {
            return Err(DeviceError::Other("empty warp plan".into()));
        }
        if self.cost_us > 0 {
            self.clock.sleep_until(self.clock.now_us() + self.cost_us);
        }
        self.state.compositions.fetch_add(1, Ordering::AcqRel);
        lock(&self.state.composed_targets).push(target);
        Ok(())
    }
}

struct HeadlessSemaphores {
    clock: Arc<dyn Clock>,
    state: Arc<HeadlessState>,
}

impl SemaphoreSignaler for HeadlessSemaphores {
    fn signal(&self, semaphore: SemaphoreHandle, value: u64) -> Result<(), DeviceError> {
        self.state.check()?;
        lock(&self.state.signals).push((semaphore, value, self.clock.now_us()));
        Ok(())
    }
}

struct HeadlessLatencyDriver {
    clock: Arc<dyn Clock>,
    state: Arc<HeadlessState>,
}

impl LatencyDriver for HeadlessLatencyDriver {
    fn set_sleep_mode(&self, mode: SleepMode) -> Result<(), DeviceError> {
        self.state.check()?;
        lock(&self.state.sleep_modes).push(mode);
        Ok(())
    }

    fn set_marker(&self, present_id: FrameId, marker: LatencyMarker) -> Result<(), DeviceError> {
        self.state.check()?;
        lock(&self.state.markers).push((present_id, marker, self.clock.now_us()));
        Ok(())
    }

    /// Render submission stands in for driver time and submit-to-present
    /// for GPU time.
    fn timings(&self) -> Result<Vec<DriverTimings>, DeviceError> {
        self.state.check()?;
        let markers = lock(&self.state.markers);

        let mut rows: Vec<DriverTimings> = Vec::new();
        for &(id, marker, at) in markers.iter() {
            let row = match rows.iter_mut().position(|r| r.present_id == id) {
                Some(i) => &mut rows[i],
                None => {
                    rows.push(DriverTimings {
                        present_id: id,
                        ..DriverTimings::default()
                    });
                    let last = rows.len() - 1;
                    &mut rows[last]
                }
            };
            match marker {
                LatencyMarker::RenderSubmitStart => row.driver_start_us = at,
                LatencyMarker::RenderSubmitEnd => {
                    row.driver_end_us = at;
                    row.gpu_render_start_us = at;
                }
                LatencyMarker::PresentStart => row.gpu_render_end_us = at,
                _ => {}
            }
        }

        let skip = rows.len().saturating_sub(DRIVER_TIMING_ROWS);
        Ok(rows.split_off(skip))
    }
}

struct HeadlessCheckpoints {
    state: Arc<HeadlessState>,
}

impl CheckpointDriver for HeadlessCheckpoints {
    fn set_checkpoint(&self, cmd: CommandBufferHandle, marker: u64) -> Result<(), DeviceError> {
        self.state.check()?;
        lock(&self.state.checkpoints)
            .entry(cmd)
            .or_default()
            .push(marker);
        Ok(())
    }

    /// Every recorded checkpoint has executed; the headless queue never hangs.
    fn queue_checkpoints(&self, _queue: QueueHandle) -> Result<Vec<DriverCheckpoint>, DeviceError> {
        let recorded = lock(&self.state.checkpoints);
        let mut cmds: Vec<_> = recorded.keys().copied().collect();
        cmds.sort_by_key(|c| c.as_raw());

        Ok(cmds
            .into_iter()
            .flat_map(|cmd| {
                recorded.get(&cmd).into_iter().flatten().map(|&marker| DriverCheckpoint {
                    stage: PipelineStage::BottomOfPipe,
                    marker,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_gen::ColorStats;

    fn frame(ts: u64, color: Option<ColorStats>) -> Frame {
        Frame::real(ImageHandle::new(ts + 1, 0), ts, color)
    }

    #[test]
    fn test_capability_switches() {
        let device = HeadlessDevice::new(HeadlessConfig {
            optical_flow: false,
            checkpoints: false,
            ..HeadlessConfig::default()
        });
        assert!(device.optical_flow(64, 64).is_none());
        assert!(device.checkpoints().is_none());
        assert!(device.low_latency(SwapchainHandle::from_raw(1)).is_some());
        assert!(device.low_latency(SwapchainHandle::NULL).is_none());
        assert!(!device.supports_extension(OPTICAL_FLOW_EXTENSION_NAME));
        assert!(device.supports_extension(LOW_LATENCY_EXTENSION_NAME));
    }

    #[test]
    fn test_synthetic_flow_is_deterministic() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let flow = device.optical_flow(64, 48).unwrap();
        let a = flow.estimate(&frame(0, None), &frame(16_000, None)).unwrap();
        let b = flow.estimate(&frame(0, None), &frame(16_000, None)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.grid(), (8, 6));
        assert!(a.blocks().iter().all(|blk| (0.0..=1.0).contains(&blk.confidence)));
    }

    #[test]
    fn test_synthetic_flow_reports_cuts() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let flow = device.optical_flow(32, 32).unwrap();
        let dark = ColorStats::from_luma(&[0, 5, 10]).unwrap();
        let bright = ColorStats::from_luma(&[250, 252, 255]).unwrap();
        let field = flow
            .estimate(&frame(0, Some(dark)), &frame(16_000, Some(bright)))
            .unwrap();
        assert!(field.blocks().iter().all(|b| b.color_delta >= 0.99));
    }

    #[test]
    fn test_image_budget() {
        let device = HeadlessDevice::new(HeadlessConfig {
            image_budget: Some(1),
            ..HeadlessConfig::default()
        });
        let image = device.create_image(8, 8).unwrap();
        assert_eq!(device.create_image(8, 8), Err(DeviceError::OutOfMemory));
        device.destroy_image(image);
        assert_eq!(device.live_images(), 0);
        assert!(device.create_image(8, 8).is_ok());
    }

    #[test]
    fn test_lost_device_fails_everything() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        device.lose_device();
        assert_eq!(device.create_image(8, 8), Err(DeviceError::DeviceLost));
        let sem = device.semaphores();
        assert_eq!(
            sem.signal(SemaphoreHandle::from_raw(1), 1),
            Err(DeviceError::DeviceLost)
        );
    }

    #[test]
    fn test_driver_timings_from_markers() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let driver = device.low_latency(SwapchainHandle::from_raw(1)).unwrap();
        driver.set_marker(1, LatencyMarker::RenderSubmitStart).unwrap();
        driver.set_marker(1, LatencyMarker::RenderSubmitEnd).unwrap();
        driver.set_marker(1, LatencyMarker::PresentStart).unwrap();

        let timings = driver.timings().unwrap();
        assert_eq!(timings.len(), 1);
        let row = timings[0];
        assert_eq!(row.present_id, 1);
        assert!(row.driver_start_us <= row.driver_end_us);
        assert!(row.gpu_render_start_us <= row.gpu_render_end_us);
    }

    #[test]
    fn test_checkpoints_recorded_per_command_buffer() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let driver = device.checkpoints().unwrap();
        driver.set_checkpoint(CommandBufferHandle::from_raw(2), 20).unwrap();
        driver.set_checkpoint(CommandBufferHandle::from_raw(1), 10).unwrap();
        driver.set_checkpoint(CommandBufferHandle::from_raw(1), 11).unwrap();

        let markers: Vec<u64> = driver
            .queue_checkpoints(QueueHandle::from_raw(1))
            .unwrap()
            .iter()
            .map(|c| c.marker)
            .collect();
        assert_eq!(markers, vec![10, 11, 20]);
    }
}
