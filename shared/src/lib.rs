//! Shared value types for the nvvk frame generation and low-latency crates.
//!
//! Everything here is plain data: result codes, opaque GPU handles, marker
//! and timing layouts, modes and diagnostics flags. No behavior that needs a
//! device lives in this crate.

pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod frame_gen;
pub mod handles;
pub mod latency;

pub use constants::{
    DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME, DIAGNOSTICS_CONFIG_EXTENSION_NAME,
    LOW_LATENCY_EXTENSION_NAME, NVIDIA_VENDOR_ID, OPTICAL_FLOW_EXTENSION_NAME, VERSION_MAJOR,
    VERSION_MINOR, VERSION_PATCH, pack_version, unpack_version, version, version_string,
};
pub use diagnostics::{
    CheckpointTag, DiagnosticsConfigFlags, DiagnosticsPreset, full_config_flags,
    minimal_config_flags,
};
pub use error::{NvvkError, NvvkResult, ResultCode};
pub use frame_gen::FrameGenMode;
pub use handles::{
    CommandBufferHandle, DeviceHandle, ImageHandle, QueueHandle, SemaphoreHandle, SwapchainHandle,
};
pub use latency::{FrameTimings, LatencyMarker, MarkerChannel};

/// Monotonic frame / present identifier shared by both subsystems.
pub type FrameId = u64;
