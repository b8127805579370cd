//! Opaque GPU handles passed through the library.
//!
//! These wrap the raw Vulkan handle values. The library never dereferences
//! them; it only stores, compares and forwards them to device ports.

use serde::{Deserialize, Serialize};

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub const NULL: Self = Self(0);

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn as_raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

opaque_handle!(
    /// `VkDevice`
    DeviceHandle
);
opaque_handle!(
    /// `VkSwapchainKHR`
    SwapchainHandle
);
opaque_handle!(
    /// Timeline `VkSemaphore`
    SemaphoreHandle
);
opaque_handle!(
    /// `VkQueue`
    QueueHandle
);
opaque_handle!(
    /// `VkCommandBuffer`
    CommandBufferHandle
);

/// A colour image and its view (`VkImage` + `VkImageView`).
///
/// Real frames carry handles owned by the caller. Generated frames carry
/// handles of engine-owned output targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageHandle {
    pub image: u64,
    pub view: u64,
}

impl ImageHandle {
    pub const NULL: Self = Self { image: 0, view: 0 };

    pub const fn new(image: u64, view: u64) -> Self {
        Self { image, view }
    }

    pub const fn is_null(&self) -> bool {
        self.image == 0
    }
}
