//! A [`SphereRenderer`] backed by wgpu textures.
//!
//! [`GpuSphereRenderer`] owns one [`SphereTexture`] per sphere plus the
//! opacity and visibility the engine sets on it. Drawing is left to the
//! host: each frame it walks [`GpuSphereRenderer::for_each_visible`] and
//! binds the textures to its own sphere pipeline.
//!
//! Image files are read and decoded on a worker thread so the render loop
//! never waits on disk or on the decoder. Only the upload happens on the
//! loop thread, once the decoded pixels arrive.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use panodome::{GpuSphereRenderer, NodeGraph, TieredResolver, TourBuilder};
//!
//! let renderer = Rc::new(GpuSphereRenderer::headless().unwrap());
//! let graph = NodeGraph::from_json(&std::fs::read_to_string("tour.json").unwrap()).unwrap();
//!
//! let mut tour = TourBuilder::new(graph, renderer.clone())
//!     .resolver(TieredResolver::new("panoramas"))
//!     .build()
//!     .unwrap();
//!
//! tour.frame(1.0 / 60.0);
//! renderer.for_each_visible(|_handle, texture, opacity| {
//!     // bind `texture.view()` and draw the sphere with `opacity`
//!     let _ = (texture, opacity);
//! });
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use image::RgbaImage;
use thiserror::Error;

use crate::assets::Quality;
use crate::error::LoadError;
use crate::renderer::{SphereFuture, SphereHandle, SphereRenderer};
use crate::texture::{SphereTexture, check_dimensions, fit_to_limit};

/// Failure to set up a GPU device.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(String),
    #[error("failed to create GPU device: {0}")]
    Device(String),
}

#[derive(Debug)]
struct GpuSphere {
    texture: SphereTexture,
    quality: Option<Quality>,
    opacity: f32,
    enabled: bool,
}

#[derive(Default)]
struct GpuState {
    next_id: u64,
    spheres: HashMap<SphereHandle, GpuSphere>,
}

impl GpuState {
    fn insert(&mut self, texture: SphereTexture, quality: Option<Quality>) -> SphereHandle {
        self.next_id += 1;
        let handle = SphereHandle::new(self.next_id);
        self.spheres.insert(
            handle,
            GpuSphere {
                texture,
                quality,
                opacity: 1.0,
                enabled: false,
            },
        );
        handle
    }
}

/// Panorama spheres as wgpu textures.
pub struct GpuSphereRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    state: Rc<RefCell<GpuState>>,
}

impl GpuSphereRenderer {
    /// Wrap an existing device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            state: Rc::new(RefCell::new(GpuState::default())),
        }
    }

    /// Create a renderer with its own device, without a window surface.
    pub fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GpuError::NoAdapter(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Panodome Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| GpuError::Device(e.to_string()))?;

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Largest panorama side the device accepts; bigger images are scaled down.
    pub fn max_texture_side(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Call `f` for every enabled sphere with non-zero opacity.
    pub fn for_each_visible(&self, mut f: impl FnMut(SphereHandle, &SphereTexture, f32)) {
        let state = self.state.borrow();
        let mut visible: Vec<_> = state
            .spheres
            .iter()
            .filter(|(_, sphere)| sphere.enabled && sphere.opacity > 0.0)
            .collect();
        // Draw back to front: the more opaque sphere first
        visible.sort_by(|a, b| b.1.opacity.total_cmp(&a.1.opacity));
        for (handle, sphere) in visible {
            f(*handle, &sphere.texture, sphere.opacity);
        }
    }

    /// Tier a sphere was loaded at; `None` for the fallback or unknown handles.
    pub fn quality(&self, handle: SphereHandle) -> Option<Quality> {
        self.state.borrow().spheres.get(&handle).and_then(|sphere| sphere.quality)
    }

    /// Number of live spheres, including disabled ones.
    pub fn sphere_count(&self) -> usize {
        self.state.borrow().spheres.len()
    }

    /// GPU memory held by all live sphere textures.
    pub fn resident_bytes(&self) -> u64 {
        self.state
            .borrow()
            .spheres
            .values()
            .map(|sphere| sphere.texture.byte_size())
            .sum()
    }

    /// Forget every sphere after the device was lost.
    ///
    /// The textures are already gone with the device, so nothing is destroyed;
    /// the engine notices through [`SphereRenderer::is_alive`] and reloads.
    pub fn on_device_lost(&self) {
        let mut state = self.state.borrow_mut();
        log::warn!("[gpu] device lost, dropping {} spheres", state.spheres.len());
        state.spheres.clear();
    }
}

impl SphereRenderer for GpuSphereRenderer {
    fn create_sphere(&self, uri: &str, quality: Quality) -> SphereFuture {
        let (tx, rx) = oneshot::channel();
        let path = local_path(uri);
        let worker_uri = uri.to_string();
        let max_side = self.max_texture_side();

        let spawned = std::thread::Builder::new()
            .name("panodome-decode".into())
            .spawn(move || {
                let _ = tx.send(decode(&worker_uri, path, max_side));
            });

        let uri = uri.to_string();
        let device = self.device.clone();
        let queue = self.queue.clone();
        let state = Rc::clone(&self.state);

        async move {
            if let Err(e) = spawned {
                return Err(LoadError::Fetch {
                    uri,
                    reason: format!("could not start decoder thread: {e}"),
                });
            }
            let image = rx.await.map_err(|_| LoadError::Decode {
                uri: uri.clone(),
                reason: "decoder thread exited without a result".into(),
            })??;

            check_dimensions(&uri, image.width(), image.height(), max_side)?;
            let texture = SphereTexture::from_image(&device, &queue, &image, &uri);
            let handle = state.borrow_mut().insert(texture, Some(quality));
            log::debug!(
                "[gpu] uploaded '{}' ({}x{}, {})",
                uri,
                image.width(),
                image.height(),
                quality
            );
            Ok(handle)
        }
        .boxed_local()
    }

    fn create_sphere_from_image(&self, image: &RgbaImage) -> SphereHandle {
        let fitted = fit_to_limit(image, self.max_texture_side());
        let image = fitted.as_ref().unwrap_or(image);
        let texture = SphereTexture::from_image(&self.device, &self.queue, image, "Fallback Panorama");
        self.state.borrow_mut().insert(texture, None)
    }

    fn set_opacity(&self, handle: SphereHandle, opacity: f32) {
        if let Some(sphere) = self.state.borrow_mut().spheres.get_mut(&handle) {
            sphere.opacity = opacity.clamp(0.0, 1.0);
        }
    }

    fn set_enabled(&self, handle: SphereHandle, enabled: bool) {
        if let Some(sphere) = self.state.borrow_mut().spheres.get_mut(&handle) {
            sphere.enabled = enabled;
        }
    }

    fn dispose(&self, handle: SphereHandle) {
        let removed = self.state.borrow_mut().spheres.remove(&handle);
        if let Some(sphere) = removed {
            sphere.texture.destroy();
        }
    }

    fn is_alive(&self, handle: SphereHandle) -> bool {
        self.state.borrow().spheres.contains_key(&handle)
    }
}

/// Filesystem path for a `file://` URI or a plain path. Remote URIs have none.
fn local_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        Some(PathBuf::from(path))
    } else if uri.contains("://") {
        None
    } else {
        Some(PathBuf::from(uri))
    }
}

/// Read and decode a panorama, shrinking it to fit `max_side` texels.
fn decode(uri: &str, path: Option<PathBuf>, max_side: u32) -> Result<RgbaImage, LoadError> {
    let path = path.ok_or_else(|| LoadError::Fetch {
        uri: uri.to_string(),
        reason: "only local files are supported by this renderer".into(),
    })?;
    let bytes = std::fs::read(&path).map_err(|e| LoadError::Fetch {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    let image = image::load_from_memory(&bytes).map_err(|e| LoadError::Decode {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    let image = image.to_rgba8();
    Ok(fit_to_limit(&image, max_side).unwrap_or(image))
}
