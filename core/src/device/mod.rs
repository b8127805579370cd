//! Device capability layer.
//!
//! A [`Device`] hands out the capabilities the contexts consume: optical flow,
//! the warp compositor, the low-latency driver, diagnostic checkpoints,
//! semaphore signaling and output image allocation. Contexts probe each
//! optional capability once at init and cache the result as a
//! [`Capability`].

mod headless;

pub use headless::{HeadlessConfig, HeadlessDevice, SyntheticMotion};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nvvk_shared::{DeviceHandle, ImageHandle, NVIDIA_VENDOR_ID, NvvkResult, SemaphoreHandle};
use nvvk_shared::{NvvkError, SwapchainHandle};

use crate::clock::{Clock, SystemClock};
use crate::diagnostics::CheckpointDriver;
use crate::error::DeviceError;
use crate::frame_gen::{FrameCompositor, MotionEstimator};
use crate::low_latency::LatencyDriver;

// ============================================================================
// Device trait
// ============================================================================

/// A logical GPU device and the capabilities it exposes.
pub trait Device: Send + Sync {
    /// Raw device handle, for logging and driver calls.
    fn handle(&self) -> DeviceHandle;

    /// PCI vendor id of the physical device.
    fn vendor_id(&self) -> u32;

    /// Whether a device extension was enabled at creation.
    fn supports_extension(&self, name: &str) -> bool;

    /// Motion estimation session for `width` x `height` frames, if the
    /// optical flow extension is present.
    fn optical_flow(&self, width: u32, height: u32) -> Option<Arc<dyn MotionEstimator>>;

    /// Warp/blend compute pass used to write generated frames.
    fn compositor(&self) -> Arc<dyn FrameCompositor>;

    /// Low-latency driver entry points bound to `swapchain`.
    fn low_latency(&self, swapchain: SwapchainHandle) -> Option<Arc<dyn LatencyDriver>>;

    /// Diagnostic checkpoint entry points.
    fn checkpoints(&self) -> Option<Arc<dyn CheckpointDriver>>;

    /// Timeline semaphore signaling.
    fn semaphores(&self) -> Arc<dyn SemaphoreSignaler>;

    /// Allocate a colour image usable as a generated-frame target.
    fn create_image(&self, width: u32, height: u32) -> Result<ImageHandle, DeviceError>;

    /// Release an image from [`Device::create_image`].
    fn destroy_image(&self, image: ImageHandle);

    /// Time domain shared by marker timestamps and pacing deadlines.
    fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(SystemClock::new())
    }
}

/// Host-side timeline semaphore signal.
pub trait SemaphoreSignaler: Send + Sync {
    fn signal(&self, semaphore: SemaphoreHandle, value: u64) -> Result<(), DeviceError>;
}

// ============================================================================
// Capability probing
// ============================================================================

/// Result of probing an optional capability at init.
#[derive(Clone)]
pub enum Capability<T> {
    Available(T),
    Unsupported,
}

impl<T> Capability<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unsupported => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl<T> From<Option<T>> for Capability<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Available(v),
            None => Self::Unsupported,
        }
    }
}

impl<T> std::fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(_) => f.write_str("Available"),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// Reports a missing capability exactly once.
///
/// The first call to [`SupportLatch::surface`] returns `NotSupported`; every
/// later call returns `Ok` so the caller can fall back to pass-through.
#[derive(Debug, Default)]
pub struct SupportLatch {
    reported: AtomicBool,
}

impl SupportLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self, what: &str) -> NvvkResult<()> {
        if self.reported.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::warn!("{} is not supported, continuing in pass-through", what);
        Err(NvvkError::not_supported(what))
    }

    pub fn was_reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }
}

// ============================================================================
// Vendor detection
// ============================================================================

/// Whether an NVIDIA kernel driver is loaded on this machine.
pub fn detect_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Whether `device` reports the NVIDIA PCI vendor id.
pub fn is_nvidia_device(device: &dyn Device) -> bool {
    device.vendor_id() == NVIDIA_VENDOR_ID
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvvk_shared::ResultCode;

    #[test]
    fn test_capability_from_option() {
        let available: Capability<u32> = Some(3).into();
        assert!(available.is_available());
        assert_eq!(available.get(), Some(&3));

        let missing: Capability<u32> = None.into();
        assert!(!missing.is_available());
        assert_eq!(missing.get(), None);
    }

    #[test]
    fn test_support_latch_reports_once() {
        let latch = SupportLatch::new();
        let first = latch.surface("VK_NV_low_latency2");
        assert_eq!(ResultCode::of(&first), ResultCode::NotSupported);
        assert!(latch.was_reported());
        assert!(latch.surface("VK_NV_low_latency2").is_ok());
        assert!(latch.surface("VK_NV_low_latency2").is_ok());
    }

    #[test]
    fn test_is_nvidia_device() {
        let nvidia = HeadlessDevice::new(HeadlessConfig::default());
        assert!(is_nvidia_device(&nvidia));

        let other = HeadlessDevice::new(HeadlessConfig {
            vendor_id: 0x1002,
            ..HeadlessConfig::default()
        });
        assert!(!is_nvidia_device(&other));
    }
}
