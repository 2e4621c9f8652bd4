//! Ray casting against hotspot markers.
//!
//! The viewer always sits at the center of the panorama sphere, so a picking
//! ray starts at the origin and points wherever the user is looking or
//! tapping. Markers are small spheres floating in front of the panorama.

use glam::Vec3;

use crate::camera::ViewOrientation;

/// A ray in 3D space, used for gaze and pointer picking.
///
/// # Example
///
/// ```
/// use panodome::{Ray, ViewOrientation};
///
/// let gaze = Ray::from_view(ViewOrientation::from_degrees(90.0, 0.0));
/// let ahead = gaze.point_at(10.0);
/// assert!((ahead.x - 10.0).abs() < 1e-4);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    /// The starting point of the ray.
    pub origin: Vec3,
    /// The normalized direction of the ray.
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray. The direction is normalized.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Ray from the sphere center along a view orientation.
    pub fn from_view(orientation: ViewOrientation) -> Self {
        Self::new(Vec3::ZERO, orientation.forward())
    }

    /// Point at distance `t` along the ray.
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Distance to the nearest intersection with a sphere in front of the
    /// origin, or `None` on a miss.
    pub fn intersect_sphere(&self, center: Vec3, radius: f32) -> Option<f32> {
        let oc = self.origin - center;
        let a = self.direction.dot(self.direction);
        if a <= f32::EPSILON {
            return None;
        }
        let b = 2.0 * oc.dot(self.direction);
        let c = oc.dot(oc) - radius * radius;
        let discriminant = b * b - 4.0 * a * c;

        if discriminant < 0.0 {
            return None;
        }

        let sqrt_disc = discriminant.sqrt();
        let t1 = (-b - sqrt_disc) / (2.0 * a);
        let t2 = (-b + sqrt_disc) / (2.0 * a);

        if t1 > 0.0 {
            Some(t1)
        } else if t2 > 0.0 {
            Some(t2)
        } else {
            None
        }
    }
}
