//! Errors reported by device ports.

use nvvk_shared::NvvkError;

/// Failure reported by a device capability.
///
/// Contexts translate these into [`NvvkError`] and decide whether the failure
/// is permanent for the context (missing capability, lost device) or only for
/// the current call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The capability is not available on this device
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Device memory or a driver allocation was exhausted
    #[error("device out of memory")]
    OutOfMemory,

    /// The device was lost; no further work will complete
    #[error("device lost")]
    DeviceLost,

    #[error("{0}")]
    Other(String),
}

impl DeviceError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

impl From<DeviceError> for NvvkError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotSupported(what) => NvvkError::NotSupported(what),
            DeviceError::OutOfMemory => NvvkError::OutOfMemory("device allocation failed".into()),
            DeviceError::DeviceLost => NvvkError::DeviceLost,
            DeviceError::Other(msg) => NvvkError::Unknown(msg),
        }
    }
}
