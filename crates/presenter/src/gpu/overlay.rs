//! CPU-side overlay state: the gamma ramp and the software cursor.
//!
//! Both sub-states are plain data guarded by one mutex, so a setter replaces
//! them wholesale and a present snapshots them atomically. GPU uploads are
//! deferred to the next `begin_present`, which flushes dirty state under the
//! same lock; an update therefore never blocks an in-flight present and
//! becomes visible on the next one.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PresentError;
use crate::types::{Extent2d, GammaControlPoint, Rect2d};

/// Gamma ramp control points as last handed to `set_gamma_ramp`.
#[derive(Clone, Debug)]
pub(crate) struct GammaRamp {
    pub points: Vec<GammaControlPoint>,
    pub dirty: bool,
}

/// Cursor image and placement as last handed to the cursor setters.
#[derive(Clone, Debug)]
pub(crate) struct CursorImage {
    pub extent: Extent2d,
    pub format: wgpu::TextureFormat,
    pub pixels: Vec<u8>,
    pub dirty: bool,
}

#[derive(Debug, Default)]
pub(crate) struct OverlayState {
    pub gamma: Option<GammaRamp>,
    pub cursor: Option<CursorImage>,
    pub cursor_rect: Rect2d,
}

/// Consistent view of the overlay taken under the lock; everything a present
/// needs to classify its pipeline keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct OverlaySnapshot {
    pub gamma_active: bool,
    pub cursor: Option<CursorSnapshot>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CursorSnapshot {
    pub extent: Extent2d,
    pub format: wgpu::TextureFormat,
    pub rect: Rect2d,
}

impl OverlayState {
    pub(crate) fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            gamma_active: self.gamma.is_some(),
            cursor: self.cursor.as_ref().map(|cursor| CursorSnapshot {
                extent: cursor.extent,
                format: cursor.format,
                rect: self.cursor_rect,
            }),
        }
    }
}

pub(crate) type SharedOverlay = Arc<Mutex<OverlayState>>;

pub(crate) fn lock_overlay(state: &SharedOverlay) -> MutexGuard<'_, OverlayState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Bytes per texel for the cursor formats the uploader accepts.
pub(crate) fn cursor_texel_size(format: wgpu::TextureFormat) -> Option<u32> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm
        | wgpu::TextureFormat::Rgba8UnormSrgb
        | wgpu::TextureFormat::Bgra8Unorm
        | wgpu::TextureFormat::Bgra8UnormSrgb => Some(4),
        wgpu::TextureFormat::Rgba16Float => Some(8),
        _ => None,
    }
}

/// Cursor filter rule: nearest exactly when the cursor is drawn at its
/// native size, linear otherwise. Computed at draw time, never cached.
pub(crate) fn cursor_filter(texture_extent: Extent2d, rect_extent: Extent2d) -> wgpu::FilterMode {
    if texture_extent == rect_extent {
        wgpu::FilterMode::Nearest
    } else {
        wgpu::FilterMode::Linear
    }
}

/// Clone-able handle for mutating the gamma ramp and cursor from a thread
/// other than the one recording presents (an input or UI thread, typically).
///
/// Every mutation takes the shared lock, so a concurrent present observes
/// either the previous state or the new one, never a torn mix.
#[derive(Clone)]
pub struct OverlayHandle {
    pub(crate) state: SharedOverlay,
}

impl OverlayHandle {
    /// Replaces the gamma ramp. An empty slice disables gamma correction
    /// entirely; the lookup texture is released at the next present.
    pub fn set_gamma_ramp(&self, control_points: &[GammaControlPoint]) {
        let mut state = lock_overlay(&self.state);
        if control_points.is_empty() {
            state.gamma = None;
        } else {
            state.gamma = Some(GammaRamp {
                points: control_points.to_vec(),
                dirty: true,
            });
        }
    }

    /// Replaces the cursor image. `data` must be tightly packed according to
    /// `format`; an empty extent clears the cursor.
    pub fn set_cursor_texture(
        &self,
        extent: Extent2d,
        format: wgpu::TextureFormat,
        data: &[u8],
    ) -> Result<(), PresentError> {
        if extent.is_empty() {
            lock_overlay(&self.state).cursor = None;
            return Ok(());
        }

        let texel_size = cursor_texel_size(format)
            .ok_or(PresentError::UnsupportedCursorFormat(format))?;
        let expected = extent.width as usize * extent.height as usize * texel_size as usize;
        if data.len() != expected {
            return Err(PresentError::CursorDataSize {
                width: extent.width,
                height: extent.height,
                format,
                expected,
                actual: data.len(),
            });
        }

        let mut state = lock_overlay(&self.state);
        state.cursor = Some(CursorImage {
            extent,
            format,
            pixels: data.to_vec(),
            dirty: true,
        });
        Ok(())
    }

    /// Moves the cursor without re-uploading its image.
    pub fn set_cursor_pos(&self, rect: Rect2d) {
        lock_overlay(&self.state).cursor_rect = rect;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> OverlayHandle {
        OverlayHandle {
            state: Arc::new(Mutex::new(OverlayState::default())),
        }
    }

    #[test]
    fn empty_ramp_disables_gamma() {
        let overlay = handle();
        overlay.set_gamma_ramp(&[
            GammaControlPoint::default(),
            GammaControlPoint { r: u16::MAX, g: u16::MAX, b: u16::MAX, a: u16::MAX },
        ]);
        assert!(lock_overlay(&overlay.state).snapshot().gamma_active);

        overlay.set_gamma_ramp(&[]);
        assert!(!lock_overlay(&overlay.state).snapshot().gamma_active);
    }

    #[test]
    fn cursor_filter_matches_native_size_only() {
        assert_eq!(
            cursor_filter(Extent2d::new(32, 32), Extent2d::new(32, 32)),
            wgpu::FilterMode::Nearest
        );
        assert_eq!(
            cursor_filter(Extent2d::new(32, 32), Extent2d::new(64, 64)),
            wgpu::FilterMode::Linear
        );
    }

    #[test]
    fn cursor_data_size_is_validated() {
        let overlay = handle();
        let err = overlay
            .set_cursor_texture(
                Extent2d::new(8, 8),
                wgpu::TextureFormat::Rgba8UnormSrgb,
                &[0u8; 16],
            )
            .unwrap_err();
        assert!(matches!(err, PresentError::CursorDataSize { expected: 256, actual: 16, .. }));
    }

    #[test]
    fn unsupported_cursor_format_is_rejected() {
        let overlay = handle();
        let err = overlay
            .set_cursor_texture(
                Extent2d::new(4, 4),
                wgpu::TextureFormat::Depth32Float,
                &[0u8; 64],
            )
            .unwrap_err();
        assert!(matches!(err, PresentError::UnsupportedCursorFormat(_)));
    }

    #[test]
    fn empty_extent_clears_cursor() {
        let overlay = handle();
        overlay
            .set_cursor_texture(
                Extent2d::new(2, 2),
                wgpu::TextureFormat::Rgba8UnormSrgb,
                &[0u8; 16],
            )
            .unwrap();
        assert!(lock_overlay(&overlay.state).cursor.is_some());

        overlay
            .set_cursor_texture(Extent2d::default(), wgpu::TextureFormat::Rgba8UnormSrgb, &[])
            .unwrap();
        assert!(lock_overlay(&overlay.state).cursor.is_none());
    }

    #[test]
    fn concurrent_updates_never_tear_the_state() {
        let overlay = handle();
        let writer = overlay.clone();

        let thread = std::thread::spawn(move || {
            for i in 0..1000u32 {
                let side = 1 + (i % 16);
                let bytes = vec![0u8; (side * side * 4) as usize];
                writer
                    .set_cursor_texture(
                        Extent2d::new(side, side),
                        wgpu::TextureFormat::Rgba8UnormSrgb,
                        &bytes,
                    )
                    .unwrap();
                writer.set_cursor_pos(Rect2d::new(i as i32, i as i32, side, side));
            }
        });

        for _ in 0..1000 {
            let state = lock_overlay(&overlay.state);
            if let Some(cursor) = state.cursor.as_ref() {
                // A snapshot must never pair an extent with a pixel buffer
                // from a different setter call.
                assert_eq!(
                    cursor.pixels.len(),
                    (cursor.extent.width * cursor.extent.height * 4) as usize
                );
            }
        }

        thread.join().unwrap();

        let state = lock_overlay(&overlay.state);
        let cursor = state.cursor.as_ref().unwrap();
        // Last writer wins, observed as a whole: i = 999 gives side 8.
        assert_eq!(cursor.extent, Extent2d::new(8, 8));
        assert_eq!(state.cursor_rect.offset, crate::types::Offset2d::new(999, 999));
    }
}
