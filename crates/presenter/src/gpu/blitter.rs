//! The presentation sequencer: records the composite of a rendered source
//! image onto an acquired surface texture.

use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};

use crate::error::PresentError;
use crate::gpu::cache::PipelineCache;
use crate::gpu::key::{classify_cursor, classify_present, BlitVariant, ImageDesc, PipelineKey};
use crate::gpu::overlay::{
    cursor_filter, lock_overlay, CursorSnapshot, OverlayHandle, OverlayState, SharedOverlay,
};
use crate::gpu::upload::ResourceUploader;
use crate::types::{BlitterConfig, ColorSpace, Extent2d, GammaControlPoint, Rect2d};

/// Per-draw parameters, pushed as inline constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PushArgs {
    src_offset: [i32; 2],
    src_extent: [u32; 2],
    dst_offset: [i32; 2],
}

enum PresentState {
    Idle,
    Presenting { pass: wgpu::RenderPass<'static> },
}

/// Composites a rendered image onto a swapchain image immediately before it
/// reaches the display: color-space reconciliation, optional blit/resolve,
/// gamma correction, and a software cursor overlay.
///
/// The device handed in must have [`wgpu::Features::PUSH_CONSTANTS`] enabled
/// with `max_push_constant_size` of at least 24 bytes, plus
/// [`wgpu::Features::TEXTURE_FORMAT_16BIT_NORM`] for the gamma lookup
/// texture.
///
/// `begin_present` / `end_present` run on the thread that records
/// presentation commands; the gamma/cursor setters may run on any thread
/// (see [`OverlayHandle`]).
pub struct SwapchainBlitter {
    device: wgpu::Device,
    queue: wgpu::Queue,
    cache: PipelineCache,
    overlay: SharedOverlay,
    uploader: ResourceUploader,
    sampler_nearest: wgpu::Sampler,
    sampler_linear: wgpu::Sampler,
    sampler_gamma: wgpu::Sampler,
    state: PresentState,
    warned_unknown_space: bool,
}

impl SwapchainBlitter {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: BlitterConfig,
    ) -> Result<Self, PresentError> {
        let cache = PipelineCache::new(device)?;
        let uploader = ResourceUploader::new(device, queue, config.gamma_lut_width)?;

        let sampler_nearest = create_sampler(device, "present nearest", wgpu::FilterMode::Nearest);
        let sampler_linear = create_sampler(device, "present linear", wgpu::FilterMode::Linear);
        let sampler_gamma = create_sampler(device, "gamma lut", wgpu::FilterMode::Linear);

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            cache,
            overlay: Arc::new(Mutex::new(OverlayState::default())),
            uploader,
            sampler_nearest,
            sampler_linear,
            sampler_gamma,
            state: PresentState::Idle,
            warned_unknown_space: false,
        })
    }

    /// Handle for mutating the gamma ramp and cursor from another thread.
    pub fn overlay(&self) -> OverlayHandle {
        OverlayHandle {
            state: self.overlay.clone(),
        }
    }

    /// Replaces the gamma ramp; an empty slice disables gamma correction.
    pub fn set_gamma_ramp(&self, control_points: &[GammaControlPoint]) {
        self.overlay().set_gamma_ramp(control_points);
    }

    /// Replaces the cursor image; see [`OverlayHandle::set_cursor_texture`].
    pub fn set_cursor_texture(
        &self,
        extent: Extent2d,
        format: wgpu::TextureFormat,
        data: &[u8],
    ) -> Result<(), PresentError> {
        self.overlay().set_cursor_texture(extent, format, data)
    }

    /// Moves the cursor without re-uploading its image.
    pub fn set_cursor_pos(&self, rect: Rect2d) {
        self.overlay().set_cursor_pos(rect);
    }

    /// Begins one present: flushes pending overlay uploads, composites
    /// `src_rect` of the source onto `dst_rect` of the destination, and
    /// overlays the cursor if one is visible.
    ///
    /// The destination stays bound in the returned render pass so the caller
    /// can layer additional rendering on top before [`Self::end_present`].
    /// The encoder must not be used for anything else until then.
    #[allow(clippy::too_many_arguments)]
    pub fn begin_present(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dst_texture: &wgpu::Texture,
        dst_color_space: ColorSpace,
        dst_rect: Rect2d,
        src_texture: &wgpu::Texture,
        src_color_space: ColorSpace,
        src_rect: Rect2d,
    ) -> Result<&mut wgpu::RenderPass<'static>, PresentError> {
        if matches!(self.state, PresentState::Presenting { .. }) {
            return Err(PresentError::NestedPresent);
        }

        let src = ImageDesc::of(src_texture);
        let dst = ImageDesc::of(dst_texture);

        if (src_color_space == ColorSpace::Unknown || dst_color_space == ColorSpace::Unknown)
            && !self.warned_unknown_space
        {
            self.warned_unknown_space = true;
            tracing::warn!(
                ?src_color_space,
                ?dst_color_space,
                "unrecognized color space; treating it as linear"
            );
        }

        // Snapshot overlay state and flush dirty uploads under one lock so a
        // present never observes a half-applied cursor or gamma update.
        let (snapshot, gamma_view, cursor_draw) = {
            let mut state = lock_overlay(&self.overlay);
            self.uploader
                .flush(&self.device, &self.queue, encoder, &mut state)?;
            let snapshot = state.snapshot();

            let cursor_draw = snapshot.cursor.and_then(|cursor| {
                self.prepare_cursor_draw(&cursor, &dst, dst_color_space, dst_rect, snapshot.gamma_active)
            });

            (snapshot, self.uploader.gamma_lut_view().clone(), cursor_draw)
        };

        debug_assert_eq!(snapshot.gamma_active, self.uploader.gamma_bound());

        let key = classify_present(
            &src,
            src_color_space,
            src_rect,
            &dst,
            dst_color_space,
            dst_rect,
            snapshot.gamma_active,
            cursor_draw.is_some(),
        );
        let pipeline = self.cache.get_or_create(&self.device, &key)?;

        let src_view = src_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let main_bind_group = self.create_bind_group(
            key.variant(),
            "present bind group",
            &src_view,
            &self.sampler_linear,
            &gamma_view,
        );

        let dst_view = dst_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            })
            .forget_lifetime();

        let dst_bounds = Rect2d::new(0, 0, dst.extent.width, dst.extent.height);
        let main_viewport = dst_rect.intersection(dst_bounds);

        if !main_viewport.extent.is_empty() {
            set_draw_region(&mut pass, main_viewport);
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &main_bind_group, &[]);
            push_args(
                &mut pass,
                PushArgs {
                    src_offset: [src_rect.offset.x, src_rect.offset.y],
                    src_extent: [src_rect.extent.width, src_rect.extent.height],
                    dst_offset: [dst_rect.offset.x, dst_rect.offset.y],
                },
            );
            pass.draw(0..3, 0..1);
        }

        if let Some(draw) = cursor_draw {
            let cursor_pipeline = self.cache.get_or_create(&self.device, &draw.key)?;
            let sampler = match cursor_filter(draw.texture_extent, draw.rect.extent) {
                wgpu::FilterMode::Nearest => &self.sampler_nearest,
                _ => &self.sampler_linear,
            };
            let cursor_bind_group = self.create_bind_group(
                draw.key.variant(),
                "cursor bind group",
                &draw.view,
                sampler,
                &gamma_view,
            );

            set_draw_region(&mut pass, draw.visible);
            pass.set_pipeline(&cursor_pipeline);
            pass.set_bind_group(0, &cursor_bind_group, &[]);
            push_args(&mut pass, draw.args);
            pass.draw(0..3, 0..1);

            // Restore the main region for whatever the caller layers on top.
            if !main_viewport.extent.is_empty() {
                set_draw_region(&mut pass, main_viewport);
            }
        }

        self.state = PresentState::Presenting { pass };
        match &mut self.state {
            PresentState::Presenting { pass } => Ok(pass),
            PresentState::Idle => unreachable!("state set to Presenting above"),
        }
    }

    /// Finishes the present: ends the render pass, leaving the image ready
    /// for display hand-off at submit.
    pub fn end_present(&mut self) -> Result<(), PresentError> {
        match std::mem::replace(&mut self.state, PresentState::Idle) {
            PresentState::Presenting { pass } => {
                drop(pass);
                Ok(())
            }
            PresentState::Idle => Err(PresentError::NotPresenting),
        }
    }

    fn create_bind_group(
        &self,
        variant: BlitVariant,
        label: &str,
        source_view: &wgpu::TextureView,
        source_sampler: &wgpu::Sampler,
        gamma_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: self.cache.bind_group_layout(variant),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(source_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(gamma_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler_gamma),
                },
            ],
        })
    }

    /// Works out whether and how the cursor is drawn this present. Clips the
    /// cursor rectangle against the destination rectangle and shifts the
    /// sampled region accordingly, so partially off-screen cursors stay
    /// valid viewports.
    fn prepare_cursor_draw(
        &self,
        cursor: &CursorSnapshot,
        dst: &ImageDesc,
        dst_color_space: ColorSpace,
        dst_rect: Rect2d,
        gamma_active: bool,
    ) -> Option<CursorDraw> {
        if cursor.rect.extent.is_empty() {
            return None;
        }
        let view = self.uploader.cursor_view()?.clone();

        let dst_bounds = Rect2d::new(0, 0, dst.extent.width, dst.extent.height);
        let visible = cursor.rect.intersection(dst_rect).intersection(dst_bounds);
        if visible.extent.is_empty() {
            return None;
        }

        let scale_x = f64::from(cursor.extent.width) / f64::from(cursor.rect.extent.width);
        let scale_y = f64::from(cursor.extent.height) / f64::from(cursor.rect.extent.height);
        let clipped_x = f64::from(visible.offset.x - cursor.rect.offset.x);
        let clipped_y = f64::from(visible.offset.y - cursor.rect.offset.y);

        let args = PushArgs {
            src_offset: [
                (clipped_x * scale_x).round() as i32,
                (clipped_y * scale_y).round() as i32,
            ],
            src_extent: [
                ((f64::from(visible.extent.width) * scale_x).round() as u32).max(1),
                ((f64::from(visible.extent.height) * scale_y).round() as u32).max(1),
            ],
            dst_offset: [visible.offset.x, visible.offset.y],
        };

        let key = classify_cursor(
            cursor.format,
            cursor.extent,
            cursor.rect,
            dst,
            dst_color_space,
            gamma_active,
        );

        Some(CursorDraw {
            key,
            view,
            texture_extent: cursor.extent,
            rect: cursor.rect,
            visible,
            args,
        })
    }

    #[cfg(test)]
    pub(crate) fn cached_pipeline_count(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    pub(crate) fn gamma_texture_bound(&self) -> bool {
        self.uploader.gamma_bound()
    }
}

struct CursorDraw {
    key: PipelineKey,
    view: wgpu::TextureView,
    texture_extent: Extent2d,
    rect: Rect2d,
    visible: Rect2d,
    args: PushArgs,
}

fn create_sampler(device: &wgpu::Device, label: &str, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn set_draw_region(pass: &mut wgpu::RenderPass<'_>, rect: Rect2d) {
    pass.set_viewport(
        rect.offset.x as f32,
        rect.offset.y as f32,
        rect.extent.width as f32,
        rect.extent.height as f32,
        0.0,
        1.0,
    );
    pass.set_scissor_rect(
        rect.offset.x.max(0) as u32,
        rect.offset.y.max(0) as u32,
        rect.extent.width,
        rect.extent.height,
    );
}

fn push_args(pass: &mut wgpu::RenderPass<'_>, args: PushArgs) {
    pass.set_push_constants(wgpu::ShaderStages::FRAGMENT, 0, bytemuck::bytes_of(&args));
}
