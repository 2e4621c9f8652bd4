use std::f32::consts::{FRAC_PI_2, PI, TAU};

use glam::Vec3;

/// Where the viewer at the center of a panorama is looking.
///
/// Yaw 0 looks toward -Z and grows clockwise when seen from above; pitch 0 is
/// the horizon and positive pitch looks up. Both are in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewOrientation {
    pub yaw: f32,
    pub pitch: f32,
}

impl ViewOrientation {
    /// Create an orientation from radians. Pitch is clamped short of the poles.
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self {
            yaw,
            pitch: clamp_pitch(pitch),
        }
    }

    /// Create an orientation from a bearing and elevation in degrees.
    pub fn from_degrees(yaw: f32, pitch: f32) -> Self {
        Self::new(yaw.to_radians(), pitch.to_radians())
    }

    /// Create an orientation facing along `direction`.
    pub fn looking_toward(direction: impl Into<Vec3>) -> Self {
        let dir = direction.into().normalize_or_zero();
        Self::new(dir.x.atan2(-dir.z), dir.y.clamp(-1.0, 1.0).asin())
    }

    /// Unit vector the viewer is looking along.
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
        .normalize_or_zero()
    }

    /// Interpolate toward `target`, turning yaw the short way around.
    pub fn lerp_toward(&self, target: &ViewOrientation, t: f32) -> ViewOrientation {
        let t = t.clamp(0.0, 1.0);
        let yaw = wrap_angle(self.yaw + shortest_yaw_delta(self.yaw, target.yaw) * t);
        let pitch = self.pitch + (target.pitch - self.pitch) * t;
        ViewOrientation::new(yaw, pitch)
    }
}

/// Signed yaw change from `from` to `to`, wrapped into [-π, π].
pub fn shortest_yaw_delta(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

/// Wrap an angle into [-π, π].
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid can land exactly on TAU for inputs just below a multiple of it
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

fn clamp_pitch(pitch: f32) -> f32 {
    pitch.clamp(-FRAC_PI_2 + 0.01, FRAC_PI_2 - 0.01)
}
