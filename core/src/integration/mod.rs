//! Integration tests for the NVVK engines
//!
//! Drives the frame generation and low-latency contexts together over a
//! headless device: presentation ordering, scene cuts, pacing compensation
//! and device loss across contexts.

#[cfg(test)]
mod pacing_tests;

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use nvvk_shared::{FrameGenMode, SemaphoreHandle, SwapchainHandle};

    use crate::config::NvvkConfig;
    use crate::device::{HeadlessConfig, HeadlessDevice};
    use crate::frame_gen::{ColorStats, FrameGenContext, IntervalPresentation, RealFrame};
    use crate::low_latency::LowLatencyContext;
    use crate::test_utils::{ManualClock, real_frame};

    pub const SWAPCHAIN: SwapchainHandle = SwapchainHandle::from_raw(0x5ca1);
    pub const SEMAPHORE: SemaphoreHandle = SemaphoreHandle::from_raw(0x5e4a);

    /// Real frame interval used by the scenarios (60 Hz)
    pub const FRAME_US: u64 = 16_000;

    pub struct Rig {
        pub clock: Arc<ManualClock>,
        pub device: Arc<HeadlessDevice>,
        pub frame_gen: FrameGenContext,
    }

    impl Rig {
        pub fn new(config: HeadlessConfig, mode: FrameGenMode) -> Self {
            Self::with_config(config, mode, &NvvkConfig::default(), 64, 64)
        }

        pub fn with_config(
            config: HeadlessConfig,
            mode: FrameGenMode,
            nvvk: &NvvkConfig,
            width: u32,
            height: u32,
        ) -> Self {
            let clock = Arc::new(ManualClock::new(0));
            let device = Arc::new(HeadlessDevice::with_clock(config, clock.clone()));
            let frame_gen =
                FrameGenContext::with_config(device.clone(), width, height, mode, nvvk).unwrap();
            Self {
                clock,
                device,
                frame_gen,
            }
        }

        pub fn low_latency(&self) -> LowLatencyContext {
            LowLatencyContext::init(self.device.clone(), SWAPCHAIN).unwrap()
        }

        /// Submit real frame `n` at `n * FRAME_US`.
        pub fn push(&mut self, n: u64) -> IntervalPresentation {
            self.frame_gen.submit_frame(real_frame(n, n * FRAME_US)).unwrap()
        }

        pub fn push_colored(&mut self, n: u64, color: ColorStats) -> IntervalPresentation {
            let frame: RealFrame = real_frame(n, n * FRAME_US).with_color_stats(color);
            self.frame_gen.submit_frame(frame).unwrap()
        }
    }

    pub fn dark() -> ColorStats {
        ColorStats::from_luma(&[4, 8, 12, 10]).unwrap()
    }

    pub fn bright() -> ColorStats {
        ColorStats::from_luma(&[250, 245, 252, 255]).unwrap()
    }
}
