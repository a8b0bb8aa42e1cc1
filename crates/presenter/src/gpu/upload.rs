//! Turns overlay state into GPU-resident textures.
//!
//! The uploader owns the gamma lookup texture, the cursor texture, and two
//! persistent staging buffers. Flushes are recorded into the caller's
//! command encoder during `begin_present`, while the overlay lock is held.

use crate::error::PresentError;
use crate::gpu::overlay::{cursor_texel_size, OverlayState};
use crate::types::{Extent2d, GammaControlPoint};

// 16-bit unorm keeps the full control-point precision; requires
// `wgpu::Features::TEXTURE_FORMAT_16BIT_NORM` on the device.
const GAMMA_LUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Unorm;
const GAMMA_LUT_TEXEL_BYTES: usize = 8;

struct GammaTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
}

struct CursorTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: Extent2d,
    format: wgpu::TextureFormat,
}

pub(crate) struct ResourceUploader {
    gamma_lut_width: u32,
    gamma: Option<GammaTexture>,
    gamma_staging: Option<wgpu::Buffer>,
    cursor: Option<CursorTexture>,
    cursor_staging: Option<wgpu::Buffer>,
    /// 1-texel lookup texture bound whenever no gamma ramp is active, so the
    /// bind group layout never changes shape.
    placeholder_lut_view: wgpu::TextureView,
}

impl ResourceUploader {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        gamma_lut_width: u32,
    ) -> Result<Self, PresentError> {
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let placeholder = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gamma lut placeholder"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D1,
            format: GAMMA_LUT_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &placeholder,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8; GAMMA_LUT_TEXEL_BYTES],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: None,
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(PresentError::Allocation(error));
        }

        let placeholder_lut_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            gamma_lut_width: gamma_lut_width.max(2),
            gamma: None,
            gamma_staging: None,
            cursor: None,
            cursor_staging: None,
            placeholder_lut_view,
        })
    }

    /// Lookup texture view to bind for the next draw. Falls back to the
    /// placeholder when no ramp is active; shader variants without
    /// `GAMMA_BOUND` never sample it.
    pub(crate) fn gamma_lut_view(&self) -> &wgpu::TextureView {
        self.gamma
            .as_ref()
            .map_or(&self.placeholder_lut_view, |gamma| &gamma.view)
    }

    pub(crate) fn gamma_bound(&self) -> bool {
        self.gamma.is_some()
    }

    pub(crate) fn cursor_view(&self) -> Option<&wgpu::TextureView> {
        self.cursor.as_ref().map(|cursor| &cursor.view)
    }

    /// Records uploads for any dirty overlay sub-state into `encoder` and
    /// releases textures whose sub-state was cleared. Called with the overlay
    /// lock held.
    pub(crate) fn flush(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        state: &mut OverlayState,
    ) -> Result<(), PresentError> {
        self.flush_gamma(device, queue, encoder, state)?;
        self.flush_cursor(device, queue, encoder, state)
    }

    fn flush_gamma(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        state: &mut OverlayState,
    ) -> Result<(), PresentError> {
        let Some(ramp) = state.gamma.as_mut() else {
            if self.gamma.take().is_some() {
                tracing::debug!("gamma ramp disabled; releasing lookup texture");
            }
            return Ok(());
        };

        if !ramp.dirty && self.gamma.is_some() {
            return Ok(());
        }

        let width = self.gamma_lut_width;
        let texels = build_gamma_lut(&ramp.points, width);

        if self.gamma.as_ref().map(|gamma| gamma.width) != Some(width) {
            device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("gamma lut"),
                size: wgpu::Extent3d {
                    width,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D1,
                format: GAMMA_LUT_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            if let Some(error) = pollster::block_on(device.pop_error_scope()) {
                return Err(PresentError::Allocation(error));
            }
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.gamma = Some(GammaTexture { texture, view, width });
        }

        let staging = ensure_staging(
            &mut self.gamma_staging,
            device,
            texels.len() as u64,
            "gamma lut staging",
        )?;
        queue.write_buffer(staging, 0, &texels);

        let gamma = self.gamma.as_ref().expect("gamma texture just created");
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: None,
                    rows_per_image: None,
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &gamma.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        tracing::debug!(control_points = ramp.points.len(), width, "uploaded gamma lookup texture");
        ramp.dirty = false;
        Ok(())
    }

    fn flush_cursor(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        state: &mut OverlayState,
    ) -> Result<(), PresentError> {
        let Some(image) = state.cursor.as_mut() else {
            if self.cursor.take().is_some() {
                tracing::debug!("cursor cleared; releasing cursor texture");
            }
            return Ok(());
        };

        let matches_texture = self
            .cursor
            .as_ref()
            .is_some_and(|cursor| cursor.extent == image.extent && cursor.format == image.format);

        if !image.dirty && matches_texture {
            return Ok(());
        }

        if !matches_texture {
            device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("cursor texture"),
                size: wgpu::Extent3d {
                    width: image.extent.width,
                    height: image.extent.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: image.format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            if let Some(error) = pollster::block_on(device.pop_error_scope()) {
                return Err(PresentError::Allocation(error));
            }
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.cursor = Some(CursorTexture {
                texture,
                view,
                extent: image.extent,
                format: image.format,
            });
        }

        let texel_size = cursor_texel_size(image.format)
            .ok_or(PresentError::UnsupportedCursorFormat(image.format))?;
        let row_bytes = image.extent.width * texel_size;
        let padded_row = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let padded = pad_rows(&image.pixels, row_bytes as usize, padded_row as usize, image.extent.height as usize);

        let staging = ensure_staging(
            &mut self.cursor_staging,
            device,
            padded.len() as u64,
            "cursor staging",
        )?;
        queue.write_buffer(staging, 0, &padded);

        let cursor = self.cursor.as_ref().expect("cursor texture just created");
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(image.extent.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &cursor.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: image.extent.width,
                height: image.extent.height,
                depth_or_array_layers: 1,
            },
        );

        tracing::debug!(
            width = image.extent.width,
            height = image.extent.height,
            format = ?image.format,
            "uploaded cursor texture"
        );
        image.dirty = false;
        Ok(())
    }
}

/// Creates or grows a staging buffer so it can hold `size` bytes.
fn ensure_staging<'a>(
    slot: &'a mut Option<wgpu::Buffer>,
    device: &wgpu::Device,
    size: u64,
    label: &str,
) -> Result<&'a wgpu::Buffer, PresentError> {
    let needs_alloc = slot.as_ref().is_none_or(|buffer| buffer.size() < size);
    if needs_alloc {
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.next_power_of_two(),
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(PresentError::Allocation(error));
        }
        *slot = Some(buffer);
    }
    Ok(slot.as_ref().expect("staging buffer just ensured"))
}

/// Expands sparse control points into `width` RGBA16 texels by
/// piecewise-linear interpolation. A single control point yields a constant
/// ramp.
pub(crate) fn build_gamma_lut(points: &[GammaControlPoint], width: u32) -> Vec<u8> {
    let width = width.max(1) as usize;
    let mut out = Vec::with_capacity(width * GAMMA_LUT_TEXEL_BYTES);
    if points.is_empty() {
        return out;
    }

    let last = points.len() - 1;
    for i in 0..width {
        let t = if width == 1 {
            0.0
        } else {
            i as f64 / (width - 1) as f64
        };
        let pos = t * last as f64;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(last);
        let frac = pos - lo as f64;

        let lerp = |a: u16, b: u16| -> u16 {
            (f64::from(a) + (f64::from(b) - f64::from(a)) * frac).round() as u16
        };

        for value in [
            lerp(points[lo].r, points[hi].r),
            lerp(points[lo].g, points[hi].g),
            lerp(points[lo].b, points[hi].b),
            lerp(points[lo].a, points[hi].a),
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Repacks tightly-packed rows into wgpu's copy row alignment.
pub(crate) fn pad_rows(data: &[u8], row_bytes: usize, padded_row: usize, rows: usize) -> Vec<u8> {
    if row_bytes == padded_row {
        return data.to_vec();
    }
    let mut out = vec![0u8; padded_row * rows];
    for row in 0..rows {
        let src = &data[row * row_bytes..row * row_bytes + row_bytes];
        out[row * padded_row..row * padded_row + row_bytes].copy_from_slice(src);
    }
    out
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}
