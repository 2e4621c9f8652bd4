use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::error::LoadError;

/// An equirectangular panorama uploaded to the GPU.
#[derive(Debug)]
pub struct SphereTexture {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

impl SphereTexture {
    /// Upload RGBA pixels as an sRGB texture.
    pub fn from_rgba(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        data: &[u8],
        width: u32,
        height: u32,
        label: &str,
    ) -> Self {
        use wgpu::util::DeviceExt;

        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Longitude wraps around the seam, latitude stops at the poles
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{} Sampler", label)),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            width,
            height,
        }
    }

    /// Upload a decoded image.
    pub fn from_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &RgbaImage,
        label: &str,
    ) -> Self {
        let (width, height) = image.dimensions();
        Self::from_rgba(device, queue, image.as_raw(), width, height, label)
    }

    /// Bytes of GPU memory held by the texture.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Free the GPU memory now rather than when the last reference drops.
    pub(crate) fn destroy(&self) {
        self.texture.destroy();
    }
}

/// Size that keeps the aspect ratio and puts neither side above `max_side`.
pub(crate) fn fitted_size(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || max_side == 0 {
        return (width, height);
    }
    let scale = f64::from(max_side) / f64::from(longest);
    let fit = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max_side);
    (fit(width), fit(height))
}

/// Downscaled copy of `image` if it is larger than the device allows.
pub(crate) fn fit_to_limit(image: &RgbaImage, max_side: u32) -> Option<RgbaImage> {
    let (width, height) = image.dimensions();
    let (fit_width, fit_height) = fitted_size(width, height, max_side);
    if (fit_width, fit_height) == (width, height) {
        return None;
    }
    log::debug!(
        "[gpu] scaling {}x{} panorama down to {}x{}",
        width,
        height,
        fit_width,
        fit_height
    );
    Some(imageops::resize(image, fit_width, fit_height, FilterType::Triangle))
}

/// Refuse texture sizes the device cannot create.
pub(crate) fn check_dimensions(
    uri: &str,
    width: u32,
    height: u32,
    max_side: u32,
) -> Result<(), LoadError> {
    if width == 0 || height == 0 {
        return Err(LoadError::Upload {
            uri: uri.to_string(),
            reason: format!("image is empty ({width}x{height})"),
        });
    }
    if width > max_side || height > max_side {
        return Err(LoadError::Upload {
            uri: uri.to_string(),
            reason: format!("{width}x{height} exceeds the device limit of {max_side}"),
        });
    }
    Ok(())
}

/// Generate the neutral panorama shown when a node's image cannot be loaded.
///
/// A soft sky-to-floor gradient with a faint horizon band and a little
/// blocky noise, so the viewer reads as "inside a room" instead of a void.
pub fn fallback_panorama(width: u32, height: u32) -> RgbaImage {
    let width = width.max(1);
    let height = height.max(1);

    let sky = [92.0, 98.0, 110.0];
    let floor = [48.0, 46.0, 44.0];

    RgbaImage::from_fn(width, height, |x, y| {
        let v = y as f32 / (height - 1).max(1) as f32;
        let base: Vec<f32> = sky.iter().zip(floor.iter()).map(|(s, f)| s + (f - s) * v).collect();

        let horizon = (1.0 - ((v - 0.5).abs() * 24.0)).max(0.0) * 18.0;
        let variation = ((hash(x / 8, y / 8, 0x5eed) % 9) as f32) - 4.0;

        let channel = |c: f32| (c + horizon + variation).clamp(0.0, 255.0) as u8;
        Rgba([channel(base[0]), channel(base[1]), channel(base[2]), 255])
    })
}

/// Simple hash function for procedural generation.
fn hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_add(x.wrapping_mul(374761393));
    h = h.wrapping_add(y.wrapping_mul(668265263));
    h ^= h >> 13;
    h = h.wrapping_mul(1274126177);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_has_requested_size_and_is_opaque() {
        let image = fallback_panorama(64, 32);
        assert_eq!(image.dimensions(), (64, 32));
        assert!(image.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn fallback_sky_is_lighter_than_floor() {
        let image = fallback_panorama(16, 64);
        let top = image.get_pixel(0, 0).0[0];
        let bottom = image.get_pixel(0, 63).0[0];
        assert!(top > bottom);
    }

    #[test]
    fn fallback_is_deterministic() {
        assert_eq!(fallback_panorama(32, 16), fallback_panorama(32, 16));
    }

    #[test]
    fn oversized_panoramas_fit_the_device() {
        assert_eq!(fitted_size(16384, 8192, 8192), (8192, 4096));
        assert_eq!(fitted_size(4096, 2048, 8192), (4096, 2048));
        assert_eq!(fitted_size(30000, 10, 8192), (8192, 3));

        let image = fallback_panorama(64, 32);
        let fitted = fit_to_limit(&image, 16).unwrap();
        assert_eq!(fitted.dimensions(), (16, 8));
        assert!(fit_to_limit(&image, 64).is_none());
    }

    #[test]
    fn sizes_beyond_the_limit_are_upload_errors() {
        assert!(check_dimensions("a.jpg", 8192, 4096, 8192).is_ok());
        assert!(matches!(
            check_dimensions("a.jpg", 16384, 8192, 8192),
            Err(LoadError::Upload { .. })
        ));
        assert!(matches!(
            check_dimensions("a.jpg", 0, 8, 8192),
            Err(LoadError::Upload { .. })
        ));
    }

    #[test]
    fn degenerate_sizes_are_clamped() {
        assert_eq!(fallback_panorama(0, 0).dimensions(), (1, 1));
    }
}
