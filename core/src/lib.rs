//! NVVK Core - frame generation and low-latency pacing
//!
//! This crate holds the engines that sit between a Vulkan renderer and its
//! swapchain on NVIDIA hardware.
//!
//! # Architecture
//!
//! - [`FrameGenContext`] - Interpolates one generated frame between each pair
//!   of real frames and orders them for presentation
//! - [`LowLatencyContext`] - Per-frame latency markers and pacing sleeps
//! - [`DiagnosticsContext`] - Checkpoint log for post-mortem of a device loss
//! - [`Device`] - Capability layer the contexts are built on; [`HeadlessDevice`]
//!   implements it in software

pub mod clock;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod frame_gen;
#[cfg(test)]
mod integration;
pub mod low_latency;
#[cfg(test)]
pub mod test_utils;

pub use clock::{Clock, SystemClock};
pub use config::NvvkConfig;
pub use device::{
    Capability, Device, HeadlessConfig, HeadlessDevice, SemaphoreSignaler, SyntheticMotion,
    detect_nvidia_gpu, is_nvidia_device,
};
pub use diagnostics::{Checkpoint, CheckpointMarker, DiagnosticsContext, PipelineStage};
pub use error::DeviceError;
pub use frame_gen::{
    FrameGenContext, FrameGenHandle, FrameGenStats, GeneratedFrame, IntervalOutcome,
    IntervalPresentation, PresentedFrame, PresentedKind, RealFrame, SkipReason,
};
pub use low_latency::{LatencyReader, LatencyStats, LowLatencyContext, SleepReport};

// Re-export the shared value types so most callers need only this crate
pub use nvvk_shared::{
    FrameGenMode, FrameId, FrameTimings, ImageHandle, LatencyMarker, NvvkError, NvvkResult,
    ResultCode,
};
