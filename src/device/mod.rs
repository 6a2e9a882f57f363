//! Virtual input device for the external sensor
//!
//! - [`state`] - format tag, fixed state block and layout description
//! - [`virtual_device`] - host boundary, device instance and consumer runtime
//! - [`error`] - host boundary errors

pub mod error;
pub mod state;
pub mod virtual_device;

pub use error::HostError;
pub use state::{
    AxisControl, ButtonControl, ControlDescriptor, ControlKind, DeviceStateSample, FourCc,
    StateLayout, Vec2, PRIMARY_BUTTON_BIT, SENSOR_FORMAT, SENSOR_LAYOUT, STATE_BLOCK_SIZE,
};
pub use virtual_device::{DeviceHandle, FrameReport, InputHost, InputRuntime, VirtualDevice};
