//! Diagnostic checkpoint tags and device-creation config flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Predefined checkpoint tags (`NvvkCheckpointTag`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointTag {
    FrameStart = 0x1000,
    FrameEnd = 0x1001,
    DrawStart = 0x2000,
    DrawEnd = 0x2001,
    ComputeStart = 0x3000,
    ComputeEnd = 0x3001,
    TransferStart = 0x4000,
    TransferEnd = 0x4001,
}

impl CheckpointTag {
    pub const ALL: [CheckpointTag; 8] = [
        Self::FrameStart,
        Self::FrameEnd,
        Self::DrawStart,
        Self::DrawEnd,
        Self::ComputeStart,
        Self::ComputeEnd,
        Self::TransferStart,
        Self::TransferEnd,
    ];

    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_raw() == raw)
    }
}

bitflags! {
    /// `VkDeviceDiagnosticsConfigFlagsNV` subset exposed by the library.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DiagnosticsConfigFlags: u32 {
        const ENABLE_SHADER_DEBUG_INFO = 0x0000_0001;
        const ENABLE_RESOURCE_TRACKING = 0x0000_0002;
        const ENABLE_AUTOMATIC_CHECKPOINTS = 0x0000_0004;
        const ENABLE_SHADER_ERROR_REPORTING = 0x0000_0008;
    }
}

/// Flags for full crash debugging.
pub const fn full_config_flags() -> DiagnosticsConfigFlags {
    DiagnosticsConfigFlags::all()
}

/// Flags for minimal overhead: automatic checkpoints only.
pub const fn minimal_config_flags() -> DiagnosticsConfigFlags {
    DiagnosticsConfigFlags::ENABLE_AUTOMATIC_CHECKPOINTS
}

/// Which flag preset to chain into device creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsPreset {
    Full,
    #[default]
    Minimal,
}

impl DiagnosticsPreset {
    pub const fn flags(self) -> DiagnosticsConfigFlags {
        match self {
            Self::Full => full_config_flags(),
            Self::Minimal => minimal_config_flags(),
        }
    }
}
