//! Sensor state block and its fixed layout
//!
//! The host interprets a state block by its [`FourCc`] format tag. The layout
//! below is fixed for the life of the process once registered.

use crate::device::error::HostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::{offset_of, size_of};

/// Four-character code identifying a state block layout
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    /// Big-endian packing, first character in the most significant byte
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() { byte as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

pub const SENSOR_FORMAT: FourCc = FourCc::new(b'M', b'D', b'E', b'V');

/// Bit of the primary button in [`DeviceStateSample::buttons`]
pub const PRIMARY_BUTTON_BIT: u8 = 0;

pub const STATE_BLOCK_SIZE: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// One sensor sample. Value type, copied between threads.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeviceStateSample {
    /// Button bitfield, bit 0 is the primary button
    pub buttons: u32,
    /// Rotation axes, nominally in [-1, 1] but never clamped
    pub rotation: Vec2,
}

const _: () = assert!(size_of::<DeviceStateSample>() == STATE_BLOCK_SIZE);

impl DeviceStateSample {
    pub const fn new(buttons: u32, rotation: Vec2) -> Self {
        Self { buttons, rotation }
    }

    pub const fn format(&self) -> FourCc {
        SENSOR_FORMAT
    }

    pub fn is_pressed(&self, bit: u8) -> bool {
        bit < 32 && self.buttons & (1 << bit) != 0
    }

    /// Little-endian state block in layout order
    pub fn to_bytes(&self) -> [u8; STATE_BLOCK_SIZE] {
        let mut block = [0u8; STATE_BLOCK_SIZE];
        block[0..4].copy_from_slice(&self.buttons.to_le_bytes());
        block[4..8].copy_from_slice(&self.rotation.x.to_le_bytes());
        block[8..12].copy_from_slice(&self.rotation.y.to_le_bytes());
        block
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    Button { bit: u8 },
    Vector2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlDescriptor {
    pub name: &'static str,
    pub kind: ControlKind,
    /// Byte offset inside the state block
    pub offset: usize,
}

/// Layout registered with the host for one device type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateLayout {
    pub name: &'static str,
    pub display_name: &'static str,
    pub format: FourCc,
    pub size: usize,
    pub controls: &'static [ControlDescriptor],
}

pub const SENSOR_LAYOUT: StateLayout = StateLayout {
    name: "SensorDevice",
    display_name: "Sensor Device",
    format: SENSOR_FORMAT,
    size: STATE_BLOCK_SIZE,
    controls: &[
        ControlDescriptor {
            name: "primary_button",
            kind: ControlKind::Button {
                bit: PRIMARY_BUTTON_BIT,
            },
            offset: offset_of!(DeviceStateSample, buttons),
        },
        ControlDescriptor {
            name: "rotation",
            kind: ControlKind::Vector2,
            offset: offset_of!(DeviceStateSample, rotation),
        },
    ],
};

impl StateLayout {
    pub fn control(&self, name: &str) -> Option<&ControlDescriptor> {
        self.controls.iter().find(|control| control.name == name)
    }

    /// Resolves a button control once so later reads skip the name lookup
    pub fn button(&self, name: &str) -> Result<ButtonControl, HostError> {
        match self.control(name).map(|control| control.kind) {
            Some(ControlKind::Button { bit }) => Ok(ButtonControl { bit }),
            _ => Err(HostError::UnknownControl(name.to_string())),
        }
    }

    pub fn axis(&self, name: &str) -> Result<AxisControl, HostError> {
        match self.control(name).map(|control| control.kind) {
            Some(ControlKind::Vector2) => Ok(AxisControl { _private: () }),
            _ => Err(HostError::UnknownControl(name.to_string())),
        }
    }
}

/// Typed handle to a button bit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonControl {
    bit: u8,
}

impl ButtonControl {
    pub fn is_pressed(&self, sample: &DeviceStateSample) -> bool {
        sample.is_pressed(self.bit)
    }
}

/// Typed handle to the 2D rotation axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisControl {
    _private: (),
}

impl AxisControl {
    pub fn read(&self, sample: &DeviceStateSample) -> Vec2 {
        sample.rotation
    }
}
