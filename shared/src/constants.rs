//! Version and extension-name constants.
//!
//! Single source of truth for everything the capability/name queries report.

/// Library major version
pub const VERSION_MAJOR: u32 = 0;
/// Library minor version
pub const VERSION_MINOR: u32 = 1;
/// Library patch version
pub const VERSION_PATCH: u32 = 0;

/// `VK_NV_low_latency2` (Reflex-style pacing and markers)
pub const LOW_LATENCY_EXTENSION_NAME: &str = "VK_NV_low_latency2";

/// `VK_NV_device_diagnostic_checkpoints`
pub const DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME: &str = "VK_NV_device_diagnostic_checkpoints";

/// `VK_NV_device_diagnostics_config`
pub const DIAGNOSTICS_CONFIG_EXTENSION_NAME: &str = "VK_NV_device_diagnostics_config";

/// `VK_NV_optical_flow` (required for frame generation)
pub const OPTICAL_FLOW_EXTENSION_NAME: &str = "VK_NV_optical_flow";

/// PCI vendor id of NVIDIA devices.
pub const NVIDIA_VENDOR_ID: u32 = 0x10DE;

/// Library version packed as `major << 16 | minor << 8 | patch`.
pub const fn version() -> u32 {
    pack_version(VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Pack a version triple. Minor and patch are truncated to 8 bits.
pub const fn pack_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 16) | ((minor & 0xFF) << 8) | (patch & 0xFF)
}

/// Inverse of [`pack_version`].
pub const fn unpack_version(packed: u32) -> (u32, u32, u32) {
    (packed >> 16, (packed >> 8) & 0xFF, packed & 0xFF)
}

/// Human readable `major.minor.patch`.
pub fn version_string() -> String {
    let (major, minor, patch) = unpack_version(version());
    format!("{major}.{minor}.{patch}")
}
