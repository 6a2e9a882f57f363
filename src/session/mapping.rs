//! Angle to rotation mapping

use crate::device::{DeviceStateSample, Vec2};
use crate::session::events::Angles;

/// Maps decoded angles onto the rotation axis.
///
/// `x = lateral / full_scale`, `y = 1 - forward / full_scale`. Out-of-range
/// angles map linearly; nothing is clamped. Yaw is not used.
pub fn map_rotation(angles: &Angles, full_scale_degrees: f32) -> Vec2 {
    Vec2::new(
        angles.lateral as f32 / full_scale_degrees,
        1.0 - angles.forward as f32 / full_scale_degrees,
    )
}

pub fn sample_from_angles(angles: &Angles, full_scale_degrees: f32, buttons: u32) -> DeviceStateSample {
    DeviceStateSample::new(buttons, map_rotation(angles, full_scale_degrees))
}
