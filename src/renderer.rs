//! The boundary between the engine and whatever draws the panorama spheres.
//!
//! The engine never touches meshes, materials or shaders. It asks the
//! renderer for a sphere textured with a panorama, adjusts its opacity and
//! visibility during transitions, and disposes it on eviction. Everything
//! runs on the render loop's thread, so implementations take `&self` and use
//! interior mutability.

use futures::future::LocalBoxFuture;
use image::RgbaImage;

use crate::assets::Quality;
use crate::error::LoadError;

/// Opaque identifier for a renderer-owned panorama sphere.
///
/// Handles are allocated by the renderer. The engine stores them only inside
/// the resource cache and refers to spheres by node id everywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SphereHandle(u64);

impl SphereHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Pending creation of a sphere resource.
pub type SphereFuture = LocalBoxFuture<'static, Result<SphereHandle, LoadError>>;

/// Rendering primitives the engine drives.
pub trait SphereRenderer {
    /// Start loading the panorama at `uri` onto a new sphere.
    ///
    /// The sphere must start disabled. The returned future must not borrow
    /// the renderer; it resolves on the render loop once the resource is ready.
    fn create_sphere(&self, uri: &str, quality: Quality) -> SphereFuture;

    /// Create a sphere from pixels already in memory. Used for the fallback
    /// panorama, so it cannot fail. The sphere starts disabled.
    fn create_sphere_from_image(&self, image: &RgbaImage) -> SphereHandle;

    fn set_opacity(&self, handle: SphereHandle, opacity: f32);

    fn set_enabled(&self, handle: SphereHandle, enabled: bool);

    /// Release the sphere and its GPU memory. Unknown handles are ignored.
    fn dispose(&self, handle: SphereHandle);

    /// False once the resource behind `handle` is gone, including when the
    /// platform reclaimed it without being asked.
    fn is_alive(&self, handle: SphereHandle) -> bool;
}
