//! Swapchain presentation blitter for `wgpu`.
//!
//! `presenter` composites a rendered source image onto an acquired surface
//! texture immediately before it reaches the display: color-space
//! reconciliation, an optional blit/resolve, gamma correction, and a
//! software cursor overlay. The overall flow is:
//!
//! ```text
//!   render thread                          input/UI thread
//!        │                                       │
//!        │ begin_present ──▶ classify ──▶ key    │ set_gamma_ramp
//!        │        │                        │     │ set_cursor_texture
//!        │        │                 PipelineCache│ set_cursor_pos
//!        │        ▼                        │     ▼
//!        │  flush overlay uploads ◀─── OverlayState (one mutex)
//!        │        │
//!        │        └──▶ composite draw(s) into the open render pass
//!        │ end_present ──▶ pass ends, image ready for hand-off
//! ```
//!
//! [`SwapchainBlitter`] owns the pipeline cache, the overlay resources, and
//! the present state machine; [`OverlayHandle`] lets another thread replace
//! the gamma ramp and cursor without ever tearing a present.
//!
//! The blitter records into a caller-provided [`wgpu::CommandEncoder`] and
//! renders to a caller-acquired texture; device creation, surface
//! acquisition, and submission stay with the owning runtime. The device must
//! enable [`wgpu::Features::PUSH_CONSTANTS`] (at least 24 bytes of
//! push-constant space) and [`wgpu::Features::TEXTURE_FORMAT_16BIT_NORM`].

mod error;
mod gpu;
mod types;

pub use error::PresentError;
pub use gpu::blitter::SwapchainBlitter;
pub use gpu::overlay::OverlayHandle;
pub use types::{
    BlitterConfig, ColorSpace, Extent2d, GammaControlPoint, Offset2d, Rect2d,
    DEFAULT_GAMMA_LUT_WIDTH,
};
