//! Result codes and the library-wide error type.
//!
//! Every fallible operation returns [`NvvkResult`]. The numeric codes match
//! the C ABI of the original library so callers bridging into C can fold a
//! result with [`ResultCode::of`].

use serde::{Deserialize, Serialize};

/// Convenience alias used by every fallible operation.
pub type NvvkResult<T> = Result<T, NvvkError>;

/// Numeric result codes (`NvvkResult` in the C header).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success = 0,
    NotSupported = -1,
    InvalidHandle = -2,
    OutOfMemory = -3,
    DeviceLost = -4,
    Unknown = -5,
}

impl ResultCode {
    /// Fold a result into its numeric code.
    pub fn of<T>(result: &NvvkResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.code(),
        }
    }

    /// Raw C value.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Parse a raw C value. Unrecognized values map to `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Success,
            -1 => Self::NotSupported,
            -2 => Self::InvalidHandle,
            -3 => Self::OutOfMemory,
            -4 => Self::DeviceLost,
            _ => Self::Unknown,
        }
    }
}

/// Library error.
///
/// The variants follow the error taxonomy: a missing capability, invalid
/// usage (bad handle, out-of-order marker, missing prerequisite), resource
/// exhaustion, a lost device, and anything else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NvvkError {
    /// Extension or hardware capability is absent
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Caller broke an API contract; internal state is unchanged
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Allocation of an internal buffer or device resource failed
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The owning context is in its terminal state
    #[error("device lost")]
    DeviceLost,

    #[error("{0}")]
    Unknown(String),
}

impl NvvkError {
    /// Numeric code for this error. Invalid usage shares the invalid-handle
    /// code, which is what the C surface reports for contract violations.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::NotSupported(_) => ResultCode::NotSupported,
            Self::InvalidUsage(_) => ResultCode::InvalidHandle,
            Self::OutOfMemory(_) => ResultCode::OutOfMemory,
            Self::DeviceLost => ResultCode::DeviceLost,
            Self::Unknown(_) => ResultCode::Unknown,
        }
    }

    pub fn invalid_usage(msg: impl Into<String>) -> Self {
        Self::InvalidUsage(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// True for the terminal device-lost state.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}
