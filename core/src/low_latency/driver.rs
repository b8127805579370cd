//! Low-latency driver port (`VK_NV_low_latency2`).

use nvvk_shared::{FrameId, LatencyMarker};

use crate::error::DeviceError;

/// Sleep mode forwarded to the driver when pacing settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SleepMode {
    pub enabled: bool,
    pub boost: bool,
    /// Minimum frame interval in microseconds, 0 for uncapped
    pub min_interval_us: u32,
}

/// Driver and GPU timings for one present id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverTimings {
    pub present_id: FrameId,
    pub driver_start_us: u64,
    pub driver_end_us: u64,
    pub gpu_render_start_us: u64,
    pub gpu_render_end_us: u64,
}

/// Driver entry points bound to one swapchain.
pub trait LatencyDriver: Send + Sync {
    fn set_sleep_mode(&self, mode: SleepMode) -> Result<(), DeviceError>;

    fn set_marker(&self, present_id: FrameId, marker: LatencyMarker) -> Result<(), DeviceError>;

    /// Timings the driver still retains, in any order.
    fn timings(&self) -> Result<Vec<DriverTimings>, DeviceError>;
}
