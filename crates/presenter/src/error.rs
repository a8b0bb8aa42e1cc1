use thiserror::Error;

/// Errors surfaced by the presentation blitter.
///
/// Resource errors (`PipelineCompilation`, `Allocation`) abort the present
/// that triggered them and are never retried internally; recovery, if any,
/// is device-loss handling in the owning runtime. The remaining variants are
/// usage errors: caller bugs that are rejected explicitly instead of being
/// ignored.
#[derive(Debug, Error)]
pub enum PresentError {
    #[error("begin_present called while a present is already being recorded")]
    NestedPresent,

    #[error("end_present called without a matching begin_present")]
    NotPresenting,

    #[error("pipeline compilation failed: {0}")]
    PipelineCompilation(wgpu::Error),

    #[error("GPU resource allocation failed: {0}")]
    Allocation(wgpu::Error),

    #[error(
        "cursor pixel data is {actual} bytes, expected {expected} for \
         {width}x{height} {format:?}"
    )]
    CursorDataSize {
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        expected: usize,
        actual: usize,
    },

    #[error("cursor texture format {0:?} is not supported for overlay upload")]
    UnsupportedCursorFormat(wgpu::TextureFormat),
}
