//! Errors at the host input framework boundary

use crate::device::state::FourCc;
use crate::device::virtual_device::DeviceHandle;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Host rejected the state layout
    #[error("Layout registration failed for {format}: {reason}")]
    LayoutRejected { format: FourCc, reason: String },

    /// An instance was requested before its layout was registered
    #[error("Layout {0} is not registered")]
    LayoutNotRegistered(FourCc),

    /// Host could not create a device instance
    #[error("Failed to create device instance: {0}")]
    CreateFailed(String),

    /// Handle does not refer to a live device
    #[error("Unknown device handle {0}")]
    UnknownDevice(DeviceHandle),

    /// State was applied while no virtual device is attached
    #[error("No virtual device attached")]
    NoDevice,

    /// Named control does not exist in the layout (or has another kind)
    #[error("Control '{0}' not found in layout")]
    UnknownControl(String),
}
