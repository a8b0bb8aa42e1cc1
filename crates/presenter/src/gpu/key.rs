//! Pipeline keys: the full set of request attributes that select one
//! compiled pipeline variant, plus the pure classification rules that derive
//! them from a present request.

use crate::types::{ColorSpace, Extent2d, Rect2d};

/// Fragment-stage variant baked into a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum BlitVariant {
    /// Single-sampled source, matching rectangles: direct texel copy.
    Copy,
    /// Single-sampled source, rectangles differ: filtered rescale.
    Blit,
    /// Multisampled source, matching rectangles: sample average.
    MsResolve,
    /// Multisampled source, rectangles differ: resolve while rescaling.
    MsBlit,
}

impl BlitVariant {
    pub(crate) fn label(self) -> &'static str {
        match self {
            BlitVariant::Copy => "present copy",
            BlitVariant::Blit => "present blit",
            BlitVariant::MsResolve => "present resolve",
            BlitVariant::MsBlit => "present resolve blit",
        }
    }

    pub(crate) fn is_multisampled(self) -> bool {
        matches!(self, BlitVariant::MsResolve | BlitVariant::MsBlit)
    }
}

/// Identity of one compositing pipeline. Keys are produced fresh per present
/// call and never mutated; the derived `Hash`/`Eq` make equality and hashing
/// pure functions of every field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub src_space: ColorSpace,
    pub src_samples: u32,
    pub src_is_srgb: bool,
    pub dst_space: ColorSpace,
    pub dst_format: wgpu::TextureFormat,
    pub needs_blit: bool,
    pub needs_gamma: bool,
    pub needs_blending: bool,
}

impl PipelineKey {
    pub(crate) fn variant(&self) -> BlitVariant {
        match (self.src_samples > 1, self.needs_blit) {
            (false, false) => BlitVariant::Copy,
            (false, true) => BlitVariant::Blit,
            (true, false) => BlitVariant::MsResolve,
            (true, true) => BlitVariant::MsBlit,
        }
    }
}

/// Attributes of a source or destination image relevant to classification.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ImageDesc {
    pub format: wgpu::TextureFormat,
    pub sample_count: u32,
    pub extent: Extent2d,
}

impl ImageDesc {
    pub(crate) fn of(texture: &wgpu::Texture) -> Self {
        Self {
            format: texture.format(),
            sample_count: texture.sample_count(),
            extent: Extent2d::new(texture.width(), texture.height()),
        }
    }
}

/// Classifies the main composite draw of a present request.
#[allow(clippy::too_many_arguments)]
pub(crate) fn classify_present(
    src: &ImageDesc,
    src_space: ColorSpace,
    src_rect: Rect2d,
    dst: &ImageDesc,
    dst_space: ColorSpace,
    dst_rect: Rect2d,
    gamma_active: bool,
    cursor_visible: bool,
) -> PipelineKey {
    let needs_blit = src_rect.offset != dst_rect.offset
        || src_rect.extent != dst_rect.extent
        || src.extent != dst.extent;

    PipelineKey {
        src_space,
        src_samples: src.sample_count,
        src_is_srgb: src.format.is_srgb(),
        dst_space,
        dst_format: dst.format,
        needs_blit,
        needs_gamma: gamma_active,
        needs_blending: cursor_visible,
    }
}

/// Classifies the cursor composite draw. The cursor image plays the role of
/// the source, placed at the cursor rectangle; it is assumed sRGB.
pub(crate) fn classify_cursor(
    cursor_format: wgpu::TextureFormat,
    cursor_extent: Extent2d,
    cursor_rect: Rect2d,
    dst: &ImageDesc,
    dst_space: ColorSpace,
    gamma_active: bool,
) -> PipelineKey {
    let needs_blit = cursor_rect.offset.x != 0
        || cursor_rect.offset.y != 0
        || cursor_rect.extent != cursor_extent;

    PipelineKey {
        src_space: ColorSpace::Srgb,
        src_samples: 1,
        src_is_srgb: cursor_format.is_srgb(),
        dst_space,
        dst_format: dst.format,
        needs_blit,
        needs_gamma: gamma_active,
        needs_blending: true,
    }
}

/// Compile-time parameters baked into one pipeline variant, derived entirely
/// from its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SpecConstants {
    pub sample_count: u32,
    pub gamma_bound: bool,
    pub convert_color_space: bool,
    pub src_space: u32,
    pub src_is_srgb: bool,
    pub dst_space: u32,
    pub dst_is_srgb: bool,
}

impl SpecConstants {
    pub(crate) fn from_key(key: &PipelineKey) -> Self {
        let src_space = key.src_space.shader_id();
        let dst_space = key.dst_space.shader_id();
        Self {
            sample_count: key.src_samples,
            gamma_bound: key.needs_gamma,
            // Matching spaces never schedule a conversion, regardless of the
            // per-format sRGB flags; those only reconcile encoding.
            convert_color_space: src_space != dst_space,
            src_space,
            src_is_srgb: key.src_is_srgb,
            dst_space,
            dst_is_srgb: key.dst_format.is_srgb(),
        }
    }

    /// Renders the constants as a WGSL header prepended to the fragment
    /// source, so every value is folded at pipeline build time.
    pub(crate) fn to_wgsl_header(&self) -> String {
        format!(
            "const SAMPLE_COUNT: u32 = {}u;\n\
             const GAMMA_BOUND: bool = {};\n\
             const CONVERT_COLOR_SPACE: bool = {};\n\
             const SRC_SPACE: u32 = {}u;\n\
             const SRC_IS_SRGB: bool = {};\n\
             const DST_SPACE: u32 = {}u;\n\
             const DST_IS_SRGB: bool = {};\n",
            self.sample_count,
            self.gamma_bound,
            self.convert_color_space,
            self.src_space,
            self.src_is_srgb,
            self.dst_space,
            self.dst_is_srgb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn base_key() -> PipelineKey {
        PipelineKey {
            src_space: ColorSpace::Srgb,
            src_samples: 1,
            src_is_srgb: false,
            dst_space: ColorSpace::Srgb,
            dst_format: wgpu::TextureFormat::Bgra8UnormSrgb,
            needs_blit: false,
            needs_gamma: false,
            needs_blending: false,
        }
    }

    fn hash_of(key: &PipelineKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equal_keys_hash_equal() {
        let a = base_key();
        let b = base_key();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn any_single_field_difference_breaks_equality() {
        let base = base_key();
        let variants = [
            PipelineKey { src_space: ColorSpace::Hdr10Pq, ..base },
            PipelineKey { src_samples: 4, ..base },
            PipelineKey { src_is_srgb: true, ..base },
            PipelineKey { dst_space: ColorSpace::LinearScRgb, ..base },
            PipelineKey { dst_format: wgpu::TextureFormat::Rgba8Unorm, ..base },
            PipelineKey { needs_blit: true, ..base },
            PipelineKey { needs_gamma: true, ..base },
            PipelineKey { needs_blending: true, ..base },
        ];
        for changed in variants {
            assert_ne!(base, changed, "changed field must break equality: {changed:?}");
        }
    }

    #[test]
    fn variant_follows_sample_count_and_blit_flag() {
        let base = base_key();
        assert_eq!(base.variant(), BlitVariant::Copy);
        assert_eq!(PipelineKey { needs_blit: true, ..base }.variant(), BlitVariant::Blit);
        assert_eq!(PipelineKey { src_samples: 4, ..base }.variant(), BlitVariant::MsResolve);
        assert_eq!(
            PipelineKey { src_samples: 4, needs_blit: true, ..base }.variant(),
            BlitVariant::MsBlit
        );
    }

    fn desc(format: wgpu::TextureFormat, samples: u32, w: u32, h: u32) -> ImageDesc {
        ImageDesc {
            format,
            sample_count: samples,
            extent: Extent2d::new(w, h),
        }
    }

    #[test]
    fn identical_rects_classify_as_copy() {
        let src = desc(wgpu::TextureFormat::Rgba8Unorm, 1, 800, 600);
        let dst = desc(wgpu::TextureFormat::Bgra8UnormSrgb, 1, 800, 600);
        let rect = Rect2d::new(0, 0, 800, 600);
        let key = classify_present(
            &src,
            ColorSpace::Srgb,
            rect,
            &dst,
            ColorSpace::Srgb,
            rect,
            false,
            false,
        );
        assert!(!key.needs_blit);
        assert!(!key.needs_gamma);
        assert!(!key.needs_blending);
        assert_eq!(key.variant(), BlitVariant::Copy);
    }

    #[test]
    fn differing_rects_or_extents_classify_as_blit() {
        let src = desc(wgpu::TextureFormat::Rgba8Unorm, 1, 800, 600);
        let dst = desc(wgpu::TextureFormat::Bgra8UnormSrgb, 1, 800, 600);
        let rect = Rect2d::new(0, 0, 800, 600);

        let offset = classify_present(
            &src,
            ColorSpace::Srgb,
            rect,
            &dst,
            ColorSpace::Srgb,
            Rect2d::new(10, 0, 800, 600),
            false,
            false,
        );
        assert!(offset.needs_blit);

        let scaled = classify_present(
            &src,
            ColorSpace::Srgb,
            rect,
            &dst,
            ColorSpace::Srgb,
            Rect2d::new(0, 0, 1920, 1080),
            false,
            false,
        );
        assert!(scaled.needs_blit);

        let bigger_dst = desc(wgpu::TextureFormat::Bgra8UnormSrgb, 1, 1920, 1080);
        let extents = classify_present(
            &src,
            ColorSpace::Srgb,
            rect,
            &bigger_dst,
            ColorSpace::Srgb,
            rect,
            false,
            false,
        );
        assert!(extents.needs_blit);
    }

    #[test]
    fn multisampled_source_selects_resolve_with_sample_constant() {
        let src = desc(wgpu::TextureFormat::Rgba8Unorm, 4, 800, 600);
        let dst = desc(wgpu::TextureFormat::Bgra8UnormSrgb, 1, 800, 600);
        let rect = Rect2d::new(0, 0, 800, 600);
        let key = classify_present(
            &src,
            ColorSpace::Srgb,
            rect,
            &dst,
            ColorSpace::Srgb,
            rect,
            false,
            false,
        );
        assert_eq!(key.variant(), BlitVariant::MsResolve);
        assert_eq!(SpecConstants::from_key(&key).sample_count, 4);
    }

    #[test]
    fn matching_spaces_never_schedule_conversion() {
        let base = base_key();
        for (src_srgb, dst_format) in [
            (false, wgpu::TextureFormat::Bgra8UnormSrgb),
            (true, wgpu::TextureFormat::Bgra8UnormSrgb),
            (false, wgpu::TextureFormat::Bgra8Unorm),
            (true, wgpu::TextureFormat::Bgra8Unorm),
        ] {
            let key = PipelineKey {
                src_is_srgb: src_srgb,
                dst_format,
                ..base
            };
            let constants = SpecConstants::from_key(&key);
            assert!(
                !constants.convert_color_space,
                "matching spaces must not convert: {key:?}"
            );
        }
    }

    #[test]
    fn differing_spaces_schedule_conversion() {
        let key = PipelineKey {
            src_space: ColorSpace::Hdr10Pq,
            ..base_key()
        };
        assert!(SpecConstants::from_key(&key).convert_color_space);
    }

    #[test]
    fn unknown_space_is_treated_as_linear() {
        let key = PipelineKey {
            src_space: ColorSpace::Unknown,
            dst_space: ColorSpace::LinearScRgb,
            ..base_key()
        };
        // Unknown folds to linear, so no conversion against a linear target.
        assert!(!SpecConstants::from_key(&key).convert_color_space);
    }

    #[test]
    fn cursor_draw_at_native_size_still_blits_when_offset() {
        let dst = desc(wgpu::TextureFormat::Bgra8UnormSrgb, 1, 800, 600);
        let key = classify_cursor(
            wgpu::TextureFormat::Rgba8UnormSrgb,
            Extent2d::new(32, 32),
            Rect2d::new(100, 100, 32, 32),
            &dst,
            ColorSpace::Srgb,
            false,
        );
        assert!(key.needs_blending);
        assert!(key.needs_blit);
        assert_eq!(key.src_samples, 1);
        assert_eq!(key.src_space, ColorSpace::Srgb);
    }
}
