//! Low-latency pacing and latency markers.
//!
//! A [`LowLatencyContext`] is bound to one swapchain. It tracks per-frame
//! marker rows, forwards markers and sleep settings to the driver when
//! `VK_NV_low_latency2` is present, and paces the frame loop through
//! [`LowLatencyContext::sleep`] or its background variant.
//!
//! The marker ring is the only state shared with readers: a
//! [`LatencyReader`] can copy timings and stats from a telemetry thread while
//! the render thread keeps recording.

mod driver;
mod markers;
mod pacing;

pub use driver::{DriverTimings, LatencyDriver, SleepMode};
pub use markers::{LatencyMarkerTracker, LatencyStats, MarkerError, RowState};
pub use pacing::{PacingController, PacingInputs, PacingSettings};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use nvvk_shared::{
    FrameId, FrameTimings, LOW_LATENCY_EXTENSION_NAME, LatencyMarker, NvvkError, NvvkResult,
    SemaphoreHandle, SwapchainHandle,
};

use crate::clock::Clock;
use crate::config::{LowLatencyConfig, NvvkConfig};
use crate::device::{Capability, Device, SemaphoreSignaler, SupportLatch};
use crate::error::DeviceError;
use crate::frame_gen::FrameGenHandle;

// ============================================================================
// Shared state
// ============================================================================

struct Shared {
    tracker: Mutex<LatencyMarkerTracker>,
    driver: Capability<Arc<dyn LatencyDriver>>,
    lost: AtomicBool,
}

impl Shared {
    /// Lock the tracker with every sequenced interval bound to its rows.
    fn tracker(&self) -> MutexGuard<'_, LatencyMarkerTracker> {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        tracker.sync();
        tracker
    }

    fn ensure_alive(&self) -> NvvkResult<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(NvvkError::DeviceLost);
        }
        Ok(())
    }

    fn mark_lost(&self) -> NvvkError {
        if !self.lost.swap(true, Ordering::AcqRel) {
            tracing::warn!("Device lost, low-latency context is now terminal");
        }
        NvvkError::DeviceLost
    }

    /// Map a driver failure. Anything short of device loss is logged and
    /// tolerated; the markers are advisory for the driver.
    fn driver_result(&self, result: Result<(), DeviceError>) -> NvvkResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(DeviceError::DeviceLost) => Err(self.mark_lost()),
            Err(e) => {
                tracing::debug!("Low-latency driver call failed: {}", e);
                Ok(())
            }
        }
    }

    fn timings(&self, max: usize) -> NvvkResult<Vec<FrameTimings>> {
        self.ensure_alive()?;
        let mut rows = self.tracker().timings(max);

        if let Some(driver) = self.driver.get() {
            let reports = match driver.timings() {
                Ok(reports) => reports,
                Err(DeviceError::DeviceLost) => return Err(self.mark_lost()),
                Err(e) => {
                    tracing::debug!("Driver timing query failed: {}", e);
                    Vec::new()
                }
            };
            for row in &mut rows {
                if let Some(report) = reports.iter().find(|r| r.present_id == row.present_id) {
                    row.driver_start_time_us = report.driver_start_us;
                    row.driver_end_time_us = report.driver_end_us;
                    row.gpu_render_start_time_us = report.gpu_render_start_us;
                    row.gpu_render_end_time_us = report.gpu_render_end_us;
                }
            }
        }
        Ok(rows)
    }
}

/// Read-only view of a context's timings, usable from any thread.
#[derive(Clone)]
pub struct LatencyReader {
    shared: Arc<Shared>,
}

impl LatencyReader {
    pub fn current_frame_id(&self) -> FrameId {
        self.shared.tracker().current_id()
    }

    pub fn stats(&self) -> LatencyStats {
        self.shared.tracker().stats()
    }

    pub fn timings(&self, max: usize) -> NvvkResult<Vec<FrameTimings>> {
        self.shared.timings(max)
    }
}

// ============================================================================
// Background waiter
// ============================================================================

/// Outcome of one pacing sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepReport {
    /// Time the semaphore was due to be signaled
    pub deadline_us: u64,
    /// Time actually spent waiting
    pub slept_us: u64,
    /// Frame generation hold-back folded into the deadline
    pub compensation_us: u64,
}

struct WaitRequest {
    deadline_us: u64,
    compensation_us: u64,
    semaphore: SemaphoreHandle,
    value: u64,
}

/// Single worker thread that performs at most one wait at a time.
struct AsyncWaiter {
    requests: Option<Sender<WaitRequest>>,
    results: Receiver<NvvkResult<SleepReport>>,
    thread: Option<JoinHandle<()>>,
    pending: bool,
}

impl AsyncWaiter {
    fn spawn(
        clock: Arc<dyn Clock>,
        semaphores: Arc<dyn SemaphoreSignaler>,
        shared: Arc<Shared>,
    ) -> NvvkResult<Self> {
        let (request_tx, request_rx) = mpsc::channel::<WaitRequest>();
        let (result_tx, result_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("nvvk-latency-sleep".into())
            .spawn(move || {
                while let Ok(request) = request_rx.recv() {
                    let result =
                        wait_and_signal(clock.as_ref(), semaphores.as_ref(), &shared, &request);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| NvvkError::Unknown(format!("failed to spawn sleep thread: {e}")))?;

        Ok(Self {
            requests: Some(request_tx),
            results: result_rx,
            thread: Some(thread),
            pending: false,
        })
    }

    /// Collect a finished wait without blocking.
    fn poll(&mut self) -> Option<NvvkResult<SleepReport>> {
        if !self.pending {
            return None;
        }
        match self.results.try_recv() {
            Ok(result) => {
                self.pending = false;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.pending = false;
                Some(Err(NvvkError::Unknown("sleep thread exited".into())))
            }
        }
    }

    fn wait(&mut self) -> Option<NvvkResult<SleepReport>> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(
            self.results
                .recv()
                .unwrap_or_else(|_| Err(NvvkError::Unknown("sleep thread exited".into()))),
        )
    }

    fn submit(&mut self, request: WaitRequest) -> NvvkResult<()> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| NvvkError::Unknown("sleep thread stopped".into()))?;
        sender
            .send(request)
            .map_err(|_| NvvkError::Unknown("sleep thread exited".into()))?;
        self.pending = true;
        Ok(())
    }
}

impl Drop for AsyncWaiter {
    fn drop(&mut self) {
        // closing the channel ends the worker after any wait in progress
        self.requests.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("Latency sleep thread panicked");
        }
    }
}

fn wait_and_signal(
    clock: &dyn Clock,
    semaphores: &dyn SemaphoreSignaler,
    shared: &Shared,
    request: &WaitRequest,
) -> NvvkResult<SleepReport> {
    let start_us = clock.now_us();
    if request.deadline_us > start_us {
        clock.sleep_until(request.deadline_us);
    }
    let slept_us = clock.now_us().saturating_sub(start_us);

    match semaphores.signal(request.semaphore, request.value) {
        Ok(()) => {}
        Err(DeviceError::DeviceLost) => return Err(shared.mark_lost()),
        Err(e) => return Err(e.into()),
    }

    Ok(SleepReport {
        deadline_us: request.deadline_us,
        slept_us,
        compensation_us: request.compensation_us,
    })
}

// ============================================================================
// Context
// ============================================================================

/// Low-latency state for one swapchain.
pub struct LowLatencyContext {
    shared: Arc<Shared>,
    swapchain: SwapchainHandle,
    clock: Arc<dyn Clock>,
    semaphores: Arc<dyn SemaphoreSignaler>,
    pacing: PacingController,
    config: LowLatencyConfig,
    frame_gen: Option<FrameGenHandle>,
    unsupported: SupportLatch,
    waiter: Option<AsyncWaiter>,
}

impl LowLatencyContext {
    /// Create a context with default tunables.
    pub fn init(device: Arc<dyn Device>, swapchain: SwapchainHandle) -> NvvkResult<Self> {
        Self::with_config(device, swapchain, &NvvkConfig::default())
    }

    pub fn with_config(
        device: Arc<dyn Device>,
        swapchain: SwapchainHandle,
        config: &NvvkConfig,
    ) -> NvvkResult<Self> {
        if swapchain.is_null() {
            return Err(NvvkError::invalid_usage("low-latency context needs a swapchain"));
        }

        let driver: Capability<Arc<dyn LatencyDriver>> = device.low_latency(swapchain).into();
        if !driver.is_available() {
            tracing::warn!(
                "{} unavailable, pacing falls back to marker tracking only",
                LOW_LATENCY_EXTENSION_NAME
            );
        }

        let ll = config.low_latency.clone();
        let shared = Arc::new(Shared {
            tracker: Mutex::new(LatencyMarkerTracker::new(ll.marker_retention, ll.ema_alpha)),
            driver,
            lost: AtomicBool::new(false),
        });

        tracing::info!(
            "Low-latency context created for swapchain {:#x}: driver={:?}",
            swapchain.as_raw(),
            shared.driver
        );

        Ok(Self {
            shared,
            swapchain,
            clock: device.clock(),
            semaphores: device.semaphores(),
            pacing: PacingController::new(ll.max_sleep_us),
            config: ll,
            frame_gen: None,
            unsupported: SupportLatch::new(),
            waiter: None,
        })
    }

    /// Release the context. An outstanding background wait finishes first.
    pub fn destroy(self) {
        tracing::info!(
            "Low-latency context destroyed after {} frames",
            self.shared.tracker().current_id()
        );
    }

    pub fn swapchain(&self) -> SwapchainHandle {
        self.swapchain
    }

    pub fn is_supported(&self) -> bool {
        self.shared.driver.is_available()
    }

    pub fn reader(&self) -> LatencyReader {
        LatencyReader {
            shared: self.shared.clone(),
        }
    }

    /// Pace with the boost and interval from the config file.
    pub fn enable_default(&mut self) -> NvvkResult<()> {
        self.enable(self.config.boost, self.config.min_interval_us)
    }

    /// Turn on pacing from the next `sleep()`.
    pub fn enable(&mut self, boost: bool, min_interval_us: u32) -> NvvkResult<()> {
        self.shared.ensure_alive()?;
        if !self.is_supported() {
            return self.unsupported.surface(LOW_LATENCY_EXTENSION_NAME);
        }
        self.pacing.enable(boost, min_interval_us);
        tracing::debug!("Pacing enabled: boost={} min_interval={}us", boost, min_interval_us);
        Ok(())
    }

    /// Turn off pacing from the next `sleep()`. A sleep in progress is not cut short.
    pub fn disable(&mut self) -> NvvkResult<()> {
        self.shared.ensure_alive()?;
        self.pacing.disable();
        Ok(())
    }

    pub fn pacing_settings(&self) -> PacingSettings {
        self.pacing.settings()
    }

    // ------------------------------------------------------------------------
    // Frame generation coupling
    // ------------------------------------------------------------------------

    /// Fold frame generation hold-back into pacing deadlines and number
    /// marker rows with the ids frame generation presents.
    pub fn attach_frame_generation(&mut self, handle: FrameGenHandle) {
        self.shared.tracker().link(handle.frame_ids());
        self.frame_gen = Some(handle);
    }

    pub fn detach_frame_generation(&mut self) {
        self.shared.tracker().unlink();
        self.frame_gen = None;
    }

    /// Latency added by frame generation, 0 when none is attached or active.
    pub fn get_latency_compensation(&self) -> u64 {
        self.frame_gen
            .as_ref()
            .map_or(0, FrameGenHandle::latency_compensation_us)
    }

    /// Compensation for the upcoming deadline; only intervals that presented
    /// a generated frame pushed the real frame back.
    fn deadline_compensation(&self) -> u64 {
        match &self.frame_gen {
            Some(fg) if fg.last_interval_generated() => fg.latency_compensation_us(),
            _ => 0,
        }
    }

    // ------------------------------------------------------------------------
    // Sleep
    // ------------------------------------------------------------------------

    fn prepare_sleep(&mut self, semaphore: SemaphoreHandle, value: u64) -> NvvkResult<WaitRequest> {
        self.shared.ensure_alive()?;
        if semaphore.is_null() {
            return Err(NvvkError::invalid_usage("sleep needs a semaphore"));
        }
        if let Some(waiter) = self.waiter.as_mut()
            && let Some(result) = waiter.poll()
            && let Err(e) = result
        {
            tracing::debug!("Previous background sleep failed: {}", e);
        }
        if self.waiter.as_ref().is_some_and(|w| w.pending) {
            return Err(NvvkError::invalid_usage("a background sleep is already outstanding"));
        }

        if let Some(mode) = self.pacing.latch()
            && let Some(driver) = self.shared.driver.get()
        {
            self.shared.driver_result(driver.set_sleep_mode(mode))?;
        }

        let compensation_us = self.deadline_compensation();
        let inputs = {
            let tracker = self.shared.tracker();
            PacingInputs {
                now_us: self.clock.now_us(),
                last_present_end_us: tracker.last_present_end_us(),
                avg_latency_us: tracker.stats().avg_latency_us,
                compensation_us,
            }
        };

        Ok(WaitRequest {
            deadline_us: self.pacing.deadline(inputs),
            compensation_us,
            semaphore,
            value,
        })
    }

    /// Block until the next frame should start, then signal `semaphore` to `value`.
    pub fn sleep(&mut self, semaphore: SemaphoreHandle, value: u64) -> NvvkResult<SleepReport> {
        let request = self.prepare_sleep(semaphore, value)?;
        wait_and_signal(self.clock.as_ref(), self.semaphores.as_ref(), &self.shared, &request)
    }

    /// Arrange for `semaphore` to be signaled at the pacing deadline and
    /// return immediately. Only one background sleep may be outstanding.
    pub fn sleep_async(&mut self, semaphore: SemaphoreHandle, value: u64) -> NvvkResult<()> {
        let request = self.prepare_sleep(semaphore, value)?;
        if self.waiter.is_none() {
            self.waiter = Some(AsyncWaiter::spawn(
                self.clock.clone(),
                self.semaphores.clone(),
                self.shared.clone(),
            )?);
        }
        match self.waiter.as_mut() {
            Some(waiter) => waiter.submit(request),
            None => Err(NvvkError::Unknown("sleep thread unavailable".into())),
        }
    }

    /// Result of the outstanding background sleep, if it has finished.
    pub fn poll_sleep(&mut self) -> Option<NvvkResult<SleepReport>> {
        self.waiter.as_mut().and_then(AsyncWaiter::poll)
    }

    /// Block until the outstanding background sleep finishes.
    pub fn wait_sleep(&mut self) -> Option<NvvkResult<SleepReport>> {
        self.waiter.as_mut().and_then(AsyncWaiter::wait)
    }

    pub fn sleep_pending(&self) -> bool {
        self.waiter.as_ref().is_some_and(|w| w.pending)
    }

    // ------------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------------

    /// Start a new frame; records `SIMULATION_START` and returns its id.
    ///
    /// With frame generation attached the id is the one the frame's real
    /// image will be presented under, skipping the generated frame expected
    /// ahead of it.
    pub fn begin_frame(&mut self) -> NvvkResult<FrameId> {
        self.shared.ensure_alive()?;
        let generated_ahead = self
            .frame_gen
            .as_ref()
            .is_some_and(FrameGenHandle::expects_generated);
        let id = self
            .shared
            .tracker()
            .begin_frame_expecting(self.clock.now_us(), generated_ahead);
        self.forward(id, LatencyMarker::SimulationStart)?;
        Ok(id)
    }

    /// Record `marker` on the current frame. `SIMULATION_START` begins a new frame.
    pub fn set_marker(&mut self, marker: LatencyMarker) -> NvvkResult<()> {
        if marker == LatencyMarker::SimulationStart {
            return self.begin_frame().map(|_| ());
        }
        if marker == LatencyMarker::InputSample {
            return self.mark_input_sample();
        }
        self.shared.ensure_alive()?;

        let now = self.clock.now_us();
        let id = self.shared.tracker().record(marker, now)?;
        self.forward(id, marker)
    }

    /// Record `marker` on an earlier frame, for out-of-band work that
    /// finishes after the next frame began.
    pub fn set_marker_for(&mut self, id: FrameId, marker: LatencyMarker) -> NvvkResult<()> {
        self.shared.ensure_alive()?;
        self.shared
            .tracker()
            .record_for(id, marker, self.clock.now_us())?;
        self.forward(id, marker)
    }

    fn forward(&self, id: FrameId, marker: LatencyMarker) -> NvvkResult<()> {
        match self.shared.driver.get() {
            Some(driver) => self.shared.driver_result(driver.set_marker(id, marker)),
            None => Ok(()),
        }
    }

    pub fn begin_simulation(&mut self) -> NvvkResult<FrameId> {
        self.begin_frame()
    }

    pub fn end_simulation(&mut self) -> NvvkResult<()> {
        self.set_marker(LatencyMarker::SimulationEnd)
    }

    pub fn begin_render_submit(&mut self) -> NvvkResult<()> {
        self.set_marker(LatencyMarker::RenderSubmitStart)
    }

    pub fn end_render_submit(&mut self) -> NvvkResult<()> {
        self.set_marker(LatencyMarker::RenderSubmitEnd)
    }

    pub fn begin_present(&mut self) -> NvvkResult<()> {
        self.set_marker(LatencyMarker::PresentStart)
    }

    pub fn end_present(&mut self) -> NvvkResult<()> {
        self.set_marker(LatencyMarker::PresentEnd)
    }

    pub fn trigger_flash(&mut self) -> NvvkResult<()> {
        self.set_marker(LatencyMarker::TriggerFlash)
    }

    /// Record when input was read. Lands on the current frame while it is
    /// still simulating, otherwise on the next frame.
    pub fn mark_input_sample(&mut self) -> NvvkResult<()> {
        self.shared.ensure_alive()?;
        let now = self.clock.now_us();
        let recorded = self.shared.tracker().input_sample(now);
        match recorded {
            Some(id) => self.forward(id, LatencyMarker::InputSample),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get_current_frame_id(&self) -> FrameId {
        self.shared.tracker().current_id()
    }

    /// Copy up to `out.len()` of the newest retired rows into `out`, oldest
    /// first. Returns the number written.
    pub fn get_timings(&self, out: &mut [FrameTimings]) -> NvvkResult<usize> {
        let rows = self.shared.timings(out.len())?;
        out[..rows.len()].copy_from_slice(&rows);
        Ok(rows.len())
    }

    pub fn timings(&self, max: usize) -> NvvkResult<Vec<FrameTimings>> {
        self.shared.timings(max)
    }

    pub fn stats(&self) -> LatencyStats {
        self.shared.tracker().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessConfig, HeadlessDevice};
    use crate::test_utils::ManualClock;
    use nvvk_shared::ResultCode;

    const SWAPCHAIN: SwapchainHandle = SwapchainHandle::from_raw(0x5c);
    const SEMAPHORE: SemaphoreHandle = SemaphoreHandle::from_raw(0x5e);

    fn context(config: HeadlessConfig) -> (LowLatencyContext, Arc<HeadlessDevice>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let device = Arc::new(HeadlessDevice::with_clock(config, clock.clone()));
        let ctx = LowLatencyContext::init(device.clone(), SWAPCHAIN).unwrap();
        (ctx, device, clock)
    }

    fn run_frame(ctx: &mut LowLatencyContext, clock: &ManualClock, step_us: u64) -> FrameId {
        let id = ctx.begin_frame().unwrap();
        clock.advance(step_us);
        ctx.end_simulation().unwrap();
        ctx.begin_render_submit().unwrap();
        clock.advance(step_us);
        ctx.end_render_submit().unwrap();
        ctx.begin_present().unwrap();
        clock.advance(step_us);
        ctx.end_present().unwrap();
        id
    }

    // =============================================================
    // Lifecycle tests
    // =============================================================

    #[test]
    fn test_init_requires_swapchain() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let err = LowLatencyContext::init(device, SwapchainHandle::NULL).err();
        assert_eq!(err.map(|e| e.code()), Some(ResultCode::InvalidHandle));
    }

    #[test]
    fn test_unsupported_enable_reports_once() {
        let (mut ctx, device, clock) = context(HeadlessConfig {
            low_latency: false,
            ..HeadlessConfig::default()
        });
        assert!(!ctx.is_supported());
        assert_eq!(ctx.enable(true, 0).unwrap_err().code(), ResultCode::NotSupported);
        assert!(ctx.enable(true, 0).is_ok());
        assert!(!ctx.pacing.upcoming().enabled);

        // markers still tracked in software
        let id = run_frame(&mut ctx, &clock, 100);
        assert_eq!(id, 1);
        assert!(device.driver_markers().is_empty());
    }

    // =============================================================
    // Marker tests
    // =============================================================

    #[test]
    fn test_markers_forwarded_to_driver() {
        let (mut ctx, device, clock) = context(HeadlessConfig::default());
        let id = run_frame(&mut ctx, &clock, 1_000);

        let forwarded = device.driver_markers();
        assert_eq!(forwarded.len(), 6);
        assert_eq!(forwarded[0], (id, LatencyMarker::SimulationStart));
        assert_eq!(forwarded[5], (id, LatencyMarker::PresentEnd));
    }

    #[test]
    fn test_out_of_order_marker_is_invalid_usage() {
        let (mut ctx, device, _) = context(HeadlessConfig::default());
        ctx.begin_frame().unwrap();
        let err = ctx.end_present().unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidHandle);
        assert_eq!(ctx.stats().usage_errors, 1);
        // rejected markers never reach the driver
        assert_eq!(device.driver_markers().len(), 1);
    }

    #[test]
    fn test_timings_merge_driver_columns() {
        let (mut ctx, _, clock) = context(HeadlessConfig::default());
        run_frame(&mut ctx, &clock, 1_000);
        run_frame(&mut ctx, &clock, 1_000);

        let mut out = [FrameTimings::default(); 4];
        let written = ctx.get_timings(&mut out).unwrap();
        assert_eq!(written, 2);
        assert_eq!(out[0].present_id, 1);
        assert_eq!(out[1].present_id, 2);
        assert_eq!(out[0].driver_start_time_us, out[0].render_submit_start_time_us);
        assert!(out[0].gpu_render_end_time_us >= out[0].gpu_render_start_time_us);
        assert_eq!(out[1].total_latency_us(), Some(3_000));

        let mut small = [FrameTimings::default(); 1];
        assert_eq!(ctx.get_timings(&mut small).unwrap(), 1);
        assert_eq!(small[0].present_id, 2);
    }

    #[test]
    fn test_input_sample_marks_current_frame() {
        let (mut ctx, _, clock) = context(HeadlessConfig::default());
        let id = ctx.begin_frame().unwrap();
        clock.advance(100);
        ctx.mark_input_sample().unwrap();
        ctx.set_marker(LatencyMarker::SimulationEnd).unwrap();
        assert_eq!(
            ctx.shared.tracker().stamp(id, LatencyMarker::InputSample),
            Some(1_100)
        );
    }

    #[test]
    fn test_held_input_sample_not_forwarded() {
        let (mut ctx, device, _) = context(HeadlessConfig::default());
        let id = ctx.begin_frame().unwrap();
        ctx.mark_input_sample().unwrap();
        // same instant again: held for the next frame
        ctx.mark_input_sample().unwrap();

        let samples: Vec<_> = device
            .driver_markers()
            .into_iter()
            .filter(|(_, marker)| *marker == LatencyMarker::InputSample)
            .collect();
        assert_eq!(samples, vec![(id, LatencyMarker::InputSample)]);

        let next = ctx.begin_frame().unwrap();
        assert_eq!(
            ctx.shared.tracker().stamp(next, LatencyMarker::InputSample),
            Some(1_000)
        );
    }

    #[test]
    fn test_reader_sees_updates_from_other_thread() {
        let (mut ctx, _, clock) = context(HeadlessConfig::default());
        let reader = ctx.reader();
        run_frame(&mut ctx, &clock, 500);

        let (current, rows) = std::thread::spawn(move || {
            (reader.current_frame_id(), reader.timings(8).unwrap().len())
        })
        .join()
        .unwrap();
        assert_eq!(current, 1);
        assert_eq!(rows, 1);
    }

    // =============================================================
    // Sleep tests
    // =============================================================

    #[test]
    fn test_sleep_waits_for_min_interval() {
        let (mut ctx, device, clock) = context(HeadlessConfig::default());
        ctx.enable(false, 10_000).unwrap();
        run_frame(&mut ctx, &clock, 1_000);
        let present_end = clock.now_us();

        let report = ctx.sleep(SEMAPHORE, 7).unwrap();
        // next present at +10ms, minus 3ms of sim-to-present latency
        assert_eq!(report.deadline_us, present_end + 7_000);
        assert_eq!(report.slept_us, 7_000);
        assert_eq!(clock.now_us(), present_end + 7_000);

        let signals = device.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!((signals[0].0, signals[0].1), (SEMAPHORE, 7));
        assert_eq!(device.sleep_modes().len(), 1);
    }

    #[test]
    fn test_disable_applies_to_next_sleep() {
        let (mut ctx, device, clock) = context(HeadlessConfig::default());
        ctx.enable(true, 10_000).unwrap();
        run_frame(&mut ctx, &clock, 1_000);
        assert_eq!(ctx.sleep(SEMAPHORE, 1).unwrap().slept_us, 7_000);

        run_frame(&mut ctx, &clock, 1_000);
        ctx.disable().unwrap();
        assert!(ctx.pacing_settings().enabled);

        let report = ctx.sleep(SEMAPHORE, 2).unwrap();
        assert_eq!(report.slept_us, 0);
        assert!(!ctx.pacing_settings().enabled);
        assert_eq!(
            device.sleep_modes(),
            vec![
                SleepMode {
                    enabled: true,
                    boost: true,
                    min_interval_us: 10_000
                },
                SleepMode::default()
            ]
        );
    }

    #[test]
    fn test_sleep_rejects_null_semaphore() {
        let (mut ctx, device, _) = context(HeadlessConfig::default());
        let err = ctx.sleep(SemaphoreHandle::NULL, 1).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidHandle);
        assert!(device.signals().is_empty());
    }

    #[test]
    fn test_sleep_async_signals_from_background() {
        let (mut ctx, device, clock) = context(HeadlessConfig::default());
        ctx.enable(false, 10_000).unwrap();
        run_frame(&mut ctx, &clock, 1_000);

        ctx.sleep_async(SEMAPHORE, 3).unwrap();
        let report = ctx.wait_sleep().unwrap().unwrap();
        assert_eq!(report.slept_us, 7_000);
        assert_eq!(device.signals().len(), 1);
        assert!(!ctx.sleep_pending());
        assert!(ctx.poll_sleep().is_none());
    }

    #[test]
    fn test_device_lost_is_terminal() {
        let (mut ctx, device, _) = context(HeadlessConfig::default());
        ctx.begin_frame().unwrap();
        device.lose_device();

        assert!(ctx.end_simulation().unwrap_err().is_device_lost());
        assert!(ctx.begin_frame().unwrap_err().is_device_lost());
        assert!(ctx.sleep(SEMAPHORE, 1).unwrap_err().is_device_lost());
        assert!(ctx.timings(4).unwrap_err().is_device_lost());
        ctx.destroy();
    }
}
